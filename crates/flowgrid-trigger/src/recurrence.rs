//! Recurrence computation
//!
//! Computes exact next-fire instants from RFC 5545 recurrence rules.
//! Structured authoring specs compile deterministically to a rule string,
//! so evaluation has a single path regardless of how a schedule was
//! authored. Fire times are minute-granular: the returned instant always
//! has a zero seconds component.

use crate::{Result, TriggerError};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Period for the structured authoring form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePeriod {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

/// A recurrence specification, in either authoring mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurrenceSpec {
    /// An opaque RFC 5545 recurrence-rule string
    Rule { rule: String },
    /// Structured period/frequency/weekday description
    Structured {
        period: RecurrencePeriod,
        #[serde(default = "default_interval")]
        interval: u32,
        /// Weekly only; defaults to Mon-Fri when empty
        #[serde(default)]
        weekdays: Vec<Weekday>,
        /// Defaults to the start instant's hour
        #[serde(default)]
        anchor_hour: Option<u32>,
        /// Defaults to the start instant's minute
        #[serde(default)]
        anchor_minute: Option<u32>,
    },
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceSpec {
    /// Convenience constructor for an opaque rule string.
    pub fn rule(rule: impl Into<String>) -> Self {
        Self::Rule { rule: rule.into() }
    }

    /// Convenience constructor for a structured spec with default anchors.
    pub fn every(period: RecurrencePeriod, interval: u32) -> Self {
        Self::Structured {
            period,
            interval,
            weekdays: Vec::new(),
            anchor_hour: None,
            anchor_minute: None,
        }
    }

    /// Compile to RFC 5545 rule text, deriving missing anchors from `start`.
    ///
    /// The compilation is deterministic: identical `(spec, start)` inputs
    /// always yield the identical rule string.
    pub fn compile(&self, start: DateTime<Utc>) -> Result<String> {
        match self {
            Self::Rule { rule } => Ok(rule.clone()),
            Self::Structured {
                period,
                interval,
                weekdays,
                anchor_hour,
                anchor_minute,
            } => {
                if *interval == 0 {
                    return Err(TriggerError::InvalidRecurrence(
                        "interval must be at least 1".to_string(),
                    ));
                }

                let hour = anchor_hour.unwrap_or_else(|| start.hour());
                let minute = anchor_minute.unwrap_or_else(|| start.minute());
                if hour > 23 || minute > 59 {
                    return Err(TriggerError::InvalidRecurrence(format!(
                        "anchor {hour:02}:{minute:02} out of range"
                    )));
                }

                let rule = match period {
                    RecurrencePeriod::Minute => {
                        format!("FREQ=MINUTELY;INTERVAL={interval}")
                    }
                    RecurrencePeriod::Hour => {
                        format!("FREQ=HOURLY;INTERVAL={interval};BYMINUTE={minute}")
                    }
                    RecurrencePeriod::Day => {
                        format!("FREQ=DAILY;INTERVAL={interval};BYHOUR={hour};BYMINUTE={minute}")
                    }
                    RecurrencePeriod::Week => {
                        let days = if weekdays.is_empty() {
                            vec![
                                Weekday::Mon,
                                Weekday::Tue,
                                Weekday::Wed,
                                Weekday::Thu,
                                Weekday::Fri,
                            ]
                        } else {
                            let mut days = weekdays.clone();
                            days.sort_by_key(|d| d.num_days_from_monday());
                            days.dedup();
                            days
                        };
                        let by_day: Vec<&str> = days.iter().map(|d| weekday_code(*d)).collect();
                        format!(
                            "FREQ=WEEKLY;INTERVAL={interval};BYDAY={};BYHOUR={hour};BYMINUTE={minute}",
                            by_day.join(",")
                        )
                    }
                    RecurrencePeriod::Month => {
                        format!(
                            "FREQ=MONTHLY;INTERVAL={interval};BYMONTHDAY={};BYHOUR={hour};BYMINUTE={minute}",
                            start.day()
                        )
                    }
                };

                Ok(rule)
            }
        }
    }
}

/// Evaluation frequency of a parsed rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frequency {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// A parsed RFC 5545 recurrence rule, restricted to the grammar the
/// structured authoring form compiles to. Parts outside that subset are
/// rejected rather than silently mis-evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrenceRule {
    freq: Frequency,
    interval: u32,
    by_day: Vec<Weekday>,
    by_hour: Option<u32>,
    by_minute: Option<u32>,
    by_month_day: Option<u32>,
}

impl FromStr for RecurrenceRule {
    type Err = TriggerError;

    fn from_str(text: &str) -> Result<Self> {
        let body = text.trim().strip_prefix("RRULE:").unwrap_or(text.trim());
        if body.is_empty() {
            return Err(TriggerError::InvalidRecurrence("empty rule".to_string()));
        }

        let mut freq = None;
        let mut interval = 1u32;
        let mut by_day = Vec::new();
        let mut by_hour = None;
        let mut by_minute = None;
        let mut by_month_day = None;

        for part in body.split(';') {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                TriggerError::InvalidRecurrence(format!("malformed rule part: {part}"))
            })?;

            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    freq = Some(match value.trim().to_ascii_uppercase().as_str() {
                        "MINUTELY" => Frequency::Minutely,
                        "HOURLY" => Frequency::Hourly,
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        other => {
                            return Err(TriggerError::InvalidRecurrence(format!(
                                "unsupported frequency: {other}"
                            )))
                        }
                    });
                }
                "INTERVAL" => {
                    interval = value.trim().parse::<u32>().map_err(|_| {
                        TriggerError::InvalidRecurrence(format!("invalid interval: {value}"))
                    })?;
                    if interval == 0 {
                        return Err(TriggerError::InvalidRecurrence(
                            "interval must be at least 1".to_string(),
                        ));
                    }
                }
                "BYDAY" => {
                    for code in value.split(',') {
                        let day = parse_weekday(code.trim()).ok_or_else(|| {
                            TriggerError::InvalidRecurrence(format!("invalid weekday: {code}"))
                        })?;
                        by_day.push(day);
                    }
                    by_day.sort_by_key(|d| d.num_days_from_monday());
                    by_day.dedup();
                }
                "BYHOUR" => {
                    let hour: u32 = value.trim().parse().map_err(|_| {
                        TriggerError::InvalidRecurrence(format!("invalid hour: {value}"))
                    })?;
                    if hour > 23 {
                        return Err(TriggerError::InvalidRecurrence(format!(
                            "hour out of range: {hour}"
                        )));
                    }
                    by_hour = Some(hour);
                }
                "BYMINUTE" => {
                    let minute: u32 = value.trim().parse().map_err(|_| {
                        TriggerError::InvalidRecurrence(format!("invalid minute: {value}"))
                    })?;
                    if minute > 59 {
                        return Err(TriggerError::InvalidRecurrence(format!(
                            "minute out of range: {minute}"
                        )));
                    }
                    by_minute = Some(minute);
                }
                "BYMONTHDAY" => {
                    let day: u32 = value.trim().parse().map_err(|_| {
                        TriggerError::InvalidRecurrence(format!("invalid month day: {value}"))
                    })?;
                    if !(1..=31).contains(&day) {
                        return Err(TriggerError::InvalidRecurrence(format!(
                            "month day out of range: {day}"
                        )));
                    }
                    by_month_day = Some(day);
                }
                // Week-start does not affect the supported grammar subset.
                "WKST" => {}
                other => {
                    return Err(TriggerError::InvalidRecurrence(format!(
                        "unsupported rule part: {other}"
                    )));
                }
            }
        }

        let freq = freq.ok_or_else(|| {
            TriggerError::InvalidRecurrence("rule is missing FREQ".to_string())
        })?;

        if !by_day.is_empty() && freq != Frequency::Weekly {
            return Err(TriggerError::InvalidRecurrence(
                "BYDAY is only supported with FREQ=WEEKLY".to_string(),
            ));
        }
        if by_month_day.is_some() && freq != Frequency::Monthly {
            return Err(TriggerError::InvalidRecurrence(
                "BYMONTHDAY is only supported with FREQ=MONTHLY".to_string(),
            ));
        }
        if by_minute.is_some() && freq == Frequency::Minutely {
            return Err(TriggerError::InvalidRecurrence(
                "BYMINUTE does not apply to FREQ=MINUTELY".to_string(),
            ));
        }
        if by_hour.is_some() && matches!(freq, Frequency::Minutely | Frequency::Hourly) {
            return Err(TriggerError::InvalidRecurrence(
                "BYHOUR does not apply to sub-daily frequencies".to_string(),
            ));
        }

        Ok(Self {
            freq,
            interval,
            by_day,
            by_hour,
            by_minute,
            by_month_day,
        })
    }
}

impl RecurrenceRule {
    /// First occurrence at-or-after `max(start, now)`, floored to the
    /// minute. Pure: identical inputs always return the identical instant.
    pub fn next_occurrence(
        &self,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let start = truncate_subsec(start);
        let target = truncate_subsec(if now > start { now } else { start });

        let found = match self.freq {
            Frequency::Minutely => self.next_minutely(start, target),
            Frequency::Hourly => self.next_hourly(start, target),
            Frequency::Daily => self.next_daily(start, target),
            Frequency::Weekly => self.next_weekly(start, target),
            Frequency::Monthly => self.next_monthly(start, target),
        };

        found.map(floor_to_minute).ok_or_else(|| {
            TriggerError::InvalidRecurrence("rule produced no next occurrence".to_string())
        })
    }

    fn next_minutely(&self, start: DateTime<Utc>, target: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = i64::from(self.interval) * 60;
        let diff = (target - start).num_seconds();
        let k = ceil_div(diff, step);
        start.checked_add_signed(Duration::seconds(k * step))
    }

    fn next_hourly(&self, start: DateTime<Utc>, target: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = i64::from(self.interval) * 3600;
        let diff = (target - start).num_seconds();
        let kc = ceil_div(diff, step);

        // BYMINUTE shifts each grid point by less than one step, so the
        // match is within one interval of the arithmetic estimate.
        for k in kc.saturating_sub(1)..=kc + 1 {
            if k < 0 {
                continue;
            }
            let base = start.checked_add_signed(Duration::seconds(k * step))?;
            let candidate = match self.by_minute {
                Some(minute) => base.with_minute(minute)?,
                None => base,
            };
            if candidate >= target {
                return Some(candidate);
            }
        }
        None
    }

    fn next_daily(&self, start: DateTime<Utc>, target: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step_days = i64::from(self.interval);
        let diff_days = (target.date_naive() - start.date_naive()).num_days();
        let kc = ceil_div(diff_days, step_days);

        for k in kc.saturating_sub(1)..=kc + 1 {
            if k < 0 {
                continue;
            }
            let date = start
                .date_naive()
                .checked_add_signed(Duration::days(k * step_days))?;
            let candidate = self.anchored_instant(date, start)?;
            if candidate >= target {
                return Some(candidate);
            }
        }
        None
    }

    fn next_weekly(&self, start: DateTime<Utc>, target: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = if self.by_day.is_empty() {
            vec![start.weekday()]
        } else {
            self.by_day.clone()
        };

        // Anchor at the Monday of the start instant's week; active weeks
        // repeat every `interval` weeks from there.
        let anchor = start.date_naive()
            - Duration::days(i64::from(start.weekday().num_days_from_monday()));
        let span_days = i64::from(self.interval) * 7;
        let offset = (target.date_naive() - anchor).num_days();
        let j0 = offset.div_euclid(span_days).max(0);

        for j in j0..=j0 + 1 {
            for day in &days {
                let date = anchor.checked_add_signed(Duration::days(
                    j * span_days + i64::from(day.num_days_from_monday()),
                ))?;
                let candidate = self.anchored_instant(date, start)?;
                if candidate >= target {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn next_monthly(&self, start: DateTime<Utc>, target: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let day = self.by_month_day.unwrap_or_else(|| start.day());
        let months_ahead = i64::from(target.year() - start.year()) * 12
            + i64::from(target.month() as i32 - start.month() as i32);
        let k0 = months_ahead.div_euclid(i64::from(self.interval)).max(0);

        for k in k0..=k0 + 1 {
            let total = i64::from(start.month0()) + k * i64::from(self.interval);
            let year = start.year() + i32::try_from(total.div_euclid(12)).ok()?;
            let month = u32::try_from(total.rem_euclid(12)).ok()? + 1;
            // Anchor days beyond a month's length clamp to its last day.
            let date =
                NaiveDate::from_ymd_opt(year, month, day.min(days_in_month(year, month)))?;
            let candidate = self.anchored_instant(date, start)?;
            if candidate >= target {
                return Some(candidate);
            }
        }
        None
    }

    /// Place the anchor time (or the start instant's time-of-day) on the
    /// given date, keeping the start's seconds so that an untouched start
    /// compares equal to its own first occurrence.
    fn anchored_instant(&self, date: NaiveDate, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let hour = self.by_hour.unwrap_or_else(|| start.hour());
        let minute = self.by_minute.unwrap_or_else(|| start.minute());
        let time = NaiveTime::from_hms_opt(hour, minute, start.second())?;
        Some(Utc.from_utc_datetime(&date.and_time(time)))
    }
}

/// Compute the next fire instant for a trigger schedule.
///
/// Compiles structured specs, evaluates the rule against
/// `max(start, now)`, and floors the result to the minute. If `start` is
/// in the future the first fire is `start` itself.
pub fn next_fire_time(
    start: DateTime<Utc>,
    spec: &RecurrenceSpec,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let rule: RecurrenceRule = spec.compile(start)?.parse()?;
    rule.next_occurrence(start, now)
}

fn ceil_div(value: i64, step: i64) -> i64 {
    if value <= 0 {
        0
    } else {
        (value + step - 1).div_euclid(step)
    }
}

fn truncate_subsec(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant - Duration::nanoseconds(i64::from(instant.nanosecond()))
}

fn floor_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    truncate_subsec(instant) - Duration::seconds(i64::from(instant.second()))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(first), Some(next)) => (next - first).num_days() as u32,
        _ => 30,
    }
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn parse_weekday(code: &str) -> Option<Weekday> {
    match code.to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}
