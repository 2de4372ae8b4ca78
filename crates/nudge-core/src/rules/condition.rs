//! Trigger condition parsing.
//!
//! A trigger condition arrives as an untyped JSON mapping. Recognized keys
//! are parsed into a closed [`Condition`] sum type; unknown keys are kept
//! aside and logged, never failed on. A recognized key whose value is
//! malformed still counts as recognized but can never match.

use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context::ActivityType;
use crate::extract::{ActivityState, LocationCategory};

/// Tolerance for exact `time` matches, in minutes either side.
pub const TIME_TOLERANCE_MINUTES: i64 = 15;

/// A wall-clock interval, possibly wrapping across midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Parse `"HH:MM-HH:MM"`.
    pub fn parse(s: &str) -> Option<Self> {
        let (start, end) = s.split_once('-')?;
        Some(TimeWindow {
            start: NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?,
            end: NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?,
        })
    }

    /// Whether `t` falls inside the window, inclusive on both ends.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            // Crosses midnight
            t >= self.start || t <= self.end
        }
    }
}

/// Whether two wall-clock times are within `tolerance` minutes of each
/// other, accounting for wrap across midnight.
pub fn within_tolerance(a: NaiveTime, b: NaiveTime, tolerance: i64) -> bool {
    use chrono::Timelike;
    let a = (a.num_seconds_from_midnight() / 60) as i64;
    let b = (b.num_seconds_from_midnight() / 60) as i64;
    let diff = (a - b).abs();
    diff.min(1440 - diff) <= tolerance
}

/// One recognized condition kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Normalized activity state equals the given state.
    Activity(ActivityState),
    /// Raw activity type equals the given type.
    ActivityType(ActivityType),
    /// Current wall-clock time within the window (wrap allowed).
    TimeRange(TimeWindow),
    /// Current wall-clock time within ±15 minutes of the given time.
    Time(NaiveTime),
    /// ISO day of week (Monday = 1) equals.
    DayOfWeek(u8),
    IsWeekday(bool),
    /// Raw location vector equals (case-insensitive).
    LocationVector(String),
    /// Normalized location category equals.
    LocationCategory(LocationCategory),
    /// Raw WiFi SSID equals; "disconnected"/"not_connected" match no WiFi.
    WifiSsid(String),
    CarBluetooth(bool),
    MinSpeed(f64),
    MaxSpeed(f64),
    /// Equality against `extras[name]` on the snapshot.
    Extra { name: String, value: Value },
}

/// The result of parsing a raw trigger mapping. Each recognized entry keeps
/// its original key; a `None` condition means the value was malformed and
/// the entry counts toward the denominator without ever matching.
#[derive(Debug, Clone, Default)]
pub struct ParsedTrigger {
    pub conditions: Vec<(String, Option<Condition>)>,
    pub unknown_keys: Vec<String>,
}

impl ParsedTrigger {
    /// Number of recognized condition keys.
    pub fn recognized(&self) -> usize {
        self.conditions.len()
    }
}

/// Untyped trigger condition mapping, preserved as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerCondition {
    entries: BTreeMap<String, Value>,
}

impl TriggerCondition {
    pub fn new(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }

    /// Convenience constructor from key/value pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            entries: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// Parse the mapping into recognized conditions and unknown keys.
    pub fn parse(&self) -> ParsedTrigger {
        let mut parsed = ParsedTrigger::default();

        for (key, value) in &self.entries {
            if let Some(name) = key.strip_prefix("extras.") {
                parsed.conditions.push((
                    key.clone(),
                    Some(Condition::Extra {
                        name: name.to_string(),
                        value: value.clone(),
                    }),
                ));
                continue;
            }

            let condition = match key.as_str() {
                "activity" => value
                    .as_str()
                    .and_then(ActivityState::parse)
                    .map(Condition::Activity),
                "activity_type" => value
                    .as_str()
                    .and_then(ActivityType::parse)
                    .map(Condition::ActivityType),
                "time_range" => value
                    .as_str()
                    .and_then(TimeWindow::parse)
                    .map(Condition::TimeRange),
                "time" => value
                    .as_str()
                    .and_then(|s| NaiveTime::parse_from_str(s.trim(), "%H:%M").ok())
                    .map(Condition::Time),
                "day_of_week" => parse_day_of_week(value).map(Condition::DayOfWeek),
                "is_weekday" => value.as_bool().map(Condition::IsWeekday),
                "location_vector" => value
                    .as_str()
                    .map(|s| Condition::LocationVector(s.to_string())),
                "location_category" => value
                    .as_str()
                    .and_then(LocationCategory::parse)
                    .map(Condition::LocationCategory),
                "wifi_ssid" => value.as_str().map(|s| Condition::WifiSsid(s.to_string())),
                "car_bluetooth" => value.as_bool().map(Condition::CarBluetooth),
                "min_speed" => value.as_f64().map(Condition::MinSpeed),
                "max_speed" => value.as_f64().map(Condition::MaxSpeed),
                _ => {
                    debug!(key = %key, "ignoring unknown trigger condition key");
                    parsed.unknown_keys.push(key.clone());
                    continue;
                }
            };

            if condition.is_none() {
                debug!(key = %key, value = %value, "malformed trigger condition value");
            }
            parsed.conditions.push((key.clone(), condition));
        }

        parsed
    }
}

fn parse_day_of_week(value: &Value) -> Option<u8> {
    if let Some(n) = value.as_u64() {
        return (1..=7).contains(&n).then_some(n as u8);
    }
    let name = value.as_str()?;
    match name.to_ascii_lowercase().as_str() {
        "monday" => Some(1),
        "tuesday" => Some(2),
        "wednesday" => Some(3),
        "thursday" => Some(4),
        "friday" => Some(5),
        "saturday" => Some(6),
        "sunday" => Some(7),
        other => other.parse::<u8>().ok().filter(|n| (1..=7).contains(n)),
    }
}
