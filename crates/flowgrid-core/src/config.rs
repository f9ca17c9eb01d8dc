use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub dedupe: DedupeConfig,
    pub wait: WaitSettings,
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("FLOWGRID")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("scheduler.poll_interval_seconds", 30)?
            .set_default("scheduler.firing_buffer_size", 1024)?
            .set_default("dedupe.history_bound", 1000)?
            .set_default("wait.max_polls", 60)?
            .set_default("wait.interval_seconds", 1)?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("FLOWGRID").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            dedupe: DedupeConfig::default(),
            wait: WaitSettings::default(),
        }
    }
}

/// Scheduler tick configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_firing_buffer_size")]
    pub firing_buffer_size: usize,
}

impl SchedulerConfig {
    pub fn with_poll_interval(mut self, seconds: u64) -> Self {
        self.poll_interval_seconds = seconds;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            firing_buffer_size: default_firing_buffer_size(),
        }
    }
}

fn default_poll_interval_seconds() -> u64 {
    30
}

fn default_firing_buffer_size() -> usize {
    1024
}

/// Dedupe strategy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DedupeConfig {
    /// Retention window for item-based identifier history
    #[serde(default = "default_history_bound")]
    pub history_bound: usize,
}

impl DedupeConfig {
    pub fn with_history_bound(mut self, bound: usize) -> Self {
        self.history_bound = bound;
        self
    }
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            history_bound: default_history_bound(),
        }
    }
}

fn default_history_bound() -> usize {
    1000
}

/// Default wait-protocol settings for awaiting child executions
#[derive(Debug, Clone, Deserialize)]
pub struct WaitSettings {
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

impl WaitSettings {
    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.interval_seconds = seconds;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            max_polls: default_max_polls(),
            interval_seconds: default_interval_seconds(),
        }
    }
}

fn default_max_polls() -> u32 {
    60
}

fn default_interval_seconds() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.poll_interval_seconds, 30);
        assert_eq!(config.dedupe.history_bound, 1000);
        assert_eq!(config.wait.max_polls, 60);
        assert_eq!(config.wait.interval_seconds, 1);
    }

    #[test]
    fn test_load_from_env_defaults() {
        // A prefix no test sets, so only the set_default chain applies.
        let config = EngineConfig::load_from_env("FLOWGRID_TEST_UNSET").unwrap();
        assert_eq!(config.scheduler.poll_interval_seconds, 30);
        assert_eq!(config.scheduler.firing_buffer_size, 1024);
        assert_eq!(config.dedupe.history_bound, 1000);
    }

    #[test]
    fn test_builders() {
        let scheduler = SchedulerConfig::default().with_poll_interval(5);
        assert_eq!(scheduler.poll_interval(), Duration::from_secs(5));

        let wait = WaitSettings::default().with_max_polls(10).with_interval(2);
        assert_eq!(wait.max_polls, 10);
        assert_eq!(wait.interval(), Duration::from_secs(2));
    }
}
