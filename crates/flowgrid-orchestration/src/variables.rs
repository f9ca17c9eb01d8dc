//! Shared variable boundary
//!
//! Batch items are written to a shared variable before each child
//! execution starts, coerced to the variable's declared data type. The
//! store itself lives elsewhere; this module defines the boundary trait,
//! the coercion rules, and an in-memory implementation.

use crate::{OrchestrationError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Declared data type of a shared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Boolean,
    Number,
    Text,
    Date,
    Json,
}

/// A shared variable's declaration plus current value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub id: String,
    pub data_type: VariableType,
    pub value: Value,
}

impl VariableDefinition {
    pub fn new(id: impl Into<String>, data_type: VariableType) -> Self {
        Self {
            id: id.into(),
            data_type,
            value: Value::Null,
        }
    }
}

/// Coerce a raw value to a declared variable type.
///
/// Failure is a per-item error at the batch level, never a panic.
pub fn coerce_value(raw: &Value, data_type: VariableType) -> Result<Value> {
    match data_type {
        VariableType::Boolean => match raw {
            Value::Bool(_) => Ok(raw.clone()),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(coercion_error(raw, "boolean")),
            },
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(coercion_error(raw, "boolean")),
            },
            _ => Err(coercion_error(raw, "boolean")),
        },
        VariableType::Number => match raw {
            Value::Number(_) => Ok(raw.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| coercion_error(raw, "number")),
            _ => Err(coercion_error(raw, "number")),
        },
        VariableType::Text => match raw {
            Value::String(_) => Ok(raw.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(coercion_error(raw, "text")),
        },
        VariableType::Date => match raw {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|parsed| Value::String(parsed.with_timezone(&Utc).to_rfc3339()))
                .map_err(|_| coercion_error(raw, "date")),
            Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(|parsed| Value::String(parsed.to_rfc3339()))
                .ok_or_else(|| coercion_error(raw, "date")),
            _ => Err(coercion_error(raw, "date")),
        },
        VariableType::Json => Ok(raw.clone()),
    }
}

fn coercion_error(raw: &Value, wanted: &str) -> OrchestrationError {
    OrchestrationError::Coercion(format!("{raw} is not a valid {wanted}"))
}

/// Variable store boundary.
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// Declared type of a variable, or `None` if it does not exist.
    async fn variable_type(&self, variable_id: &str) -> Result<Option<VariableType>>;

    /// Persist a (already coerced) value.
    async fn set_value(&self, variable_id: &str, value: Value) -> Result<()>;

    /// Current value of a variable.
    async fn get_value(&self, variable_id: &str) -> Result<Option<Value>>;
}

/// In-memory variable store
pub struct InMemoryVariableStore {
    variables: RwLock<HashMap<String, VariableDefinition>>,
}

impl InMemoryVariableStore {
    pub fn new() -> Self {
        Self {
            variables: RwLock::new(HashMap::new()),
        }
    }

    pub async fn declare(&self, definition: VariableDefinition) {
        let mut variables = self.variables.write().await;
        variables.insert(definition.id.clone(), definition);
    }
}

impl Default for InMemoryVariableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VariableStore for InMemoryVariableStore {
    async fn variable_type(&self, variable_id: &str) -> Result<Option<VariableType>> {
        let variables = self.variables.read().await;
        Ok(variables.get(variable_id).map(|v| v.data_type))
    }

    async fn set_value(&self, variable_id: &str, value: Value) -> Result<()> {
        let mut variables = self.variables.write().await;
        let variable = variables
            .get_mut(variable_id)
            .ok_or_else(|| OrchestrationError::VariableNotFound(variable_id.to_string()))?;
        variable.value = value;
        Ok(())
    }

    async fn get_value(&self, variable_id: &str) -> Result<Option<Value>> {
        let variables = self.variables.read().await;
        Ok(variables.get(variable_id).map(|v| v.value.clone()))
    }
}
