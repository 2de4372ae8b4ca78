//! Rule matching.
//!
//! Scores a single rule against an extracted context. The base score is the
//! fraction of recognized condition keys that match; a rule with no
//! recognized keys scores zero and is never suggested.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::extract::ExtractedContext;

use super::condition::{within_tolerance, Condition, TIME_TOLERANCE_MINUTES};
use super::rule::Rule;

/// Result of matching one rule against one context.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Fraction of recognized keys that matched, in [0, 1].
    pub base_score: f64,
    /// Count of recognized condition keys.
    pub recognized: usize,
    /// Count of recognized keys that matched.
    pub matched: usize,
    /// The subset of the trigger condition that matched, keyed as written.
    pub matched_conditions: BTreeMap<String, Value>,
    /// Human-readable fragments for each matched condition.
    pub reasons: Vec<String>,
}

impl MatchOutcome {
    /// Summary line enumerating matched keys and counts.
    pub fn reasoning(&self) -> String {
        if self.reasons.is_empty() {
            format!("Conditions not met ({}/{} matched)", self.matched, self.recognized)
        } else {
            format!(
                "{} ({}/{} conditions matched)",
                self.reasons.join(" • "),
                self.matched,
                self.recognized
            )
        }
    }
}

/// Score one rule against one extracted context.
pub fn match_rule(rule: &Rule, ec: &ExtractedContext) -> MatchOutcome {
    let parsed = rule.trigger_condition.parse();
    if !parsed.unknown_keys.is_empty() {
        debug!(
            rule_id = rule.id,
            keys = ?parsed.unknown_keys,
            "rule carries unrecognized condition keys"
        );
    }

    let mut matched_conditions = BTreeMap::new();
    let mut reasons = Vec::new();
    let mut matched = 0usize;

    for (key, condition) in &parsed.conditions {
        let Some(condition) = condition else {
            continue; // malformed value: recognized, never matches
        };
        if let Some(reason) = evaluate(condition, ec) {
            matched += 1;
            matched_conditions.insert(
                key.clone(),
                rule.trigger_condition.get(key).cloned().unwrap_or(Value::Null),
            );
            reasons.push(reason);
        }
    }

    let recognized = parsed.recognized();
    let base_score = matched as f64 / recognized.max(1) as f64;

    MatchOutcome {
        base_score,
        recognized,
        matched,
        matched_conditions,
        reasons,
    }
}

/// Evaluate one condition; `Some(reason)` on match.
fn evaluate(condition: &Condition, ec: &ExtractedContext) -> Option<String> {
    let current_time = ec.timestamp.time();

    match condition {
        Condition::Activity(state) => (*state == ec.activity_state)
            .then(|| format!("You are {}", ec.activity.humanize())),
        Condition::ActivityType(activity) => (*activity == ec.activity)
            .then(|| format!("You are {}", ec.activity.humanize())),
        Condition::TimeRange(window) => window
            .contains(current_time)
            .then(|| format!("Time is {}", current_time.format("%H:%M"))),
        Condition::Time(at) => within_tolerance(current_time, *at, TIME_TOLERANCE_MINUTES)
            .then(|| format!("Around {}", at.format("%H:%M"))),
        Condition::DayOfWeek(day) => (*day == ec.day_of_week)
            .then(|| format!("Day of week matches ({})", day_name(*day))),
        Condition::IsWeekday(expected) => (*expected == ec.is_weekday).then(|| {
            if ec.is_weekday {
                "It is a weekday".to_string()
            } else {
                "It is the weekend".to_string()
            }
        }),
        Condition::LocationVector(expected) => ec
            .location_vector
            .as_deref()
            .is_some_and(|actual| actual.eq_ignore_ascii_case(expected))
            .then(|| format!("Location: {}", humanize_token(expected))),
        Condition::LocationCategory(category) => (*category == ec.location_category)
            .then(|| format!("Location: {}", humanize_token(category.token()))),
        Condition::WifiSsid(expected) => {
            let expects_disconnected =
                matches!(expected.as_str(), "disconnected" | "not_connected");
            if expects_disconnected {
                (!ec.wifi_connected()).then(|| "WiFi disconnected".to_string())
            } else {
                ec.wifi_ssid
                    .as_deref()
                    .is_some_and(|actual| actual.eq_ignore_ascii_case(expected))
                    .then(|| format!("Connected to {expected}"))
            }
        }
        Condition::CarBluetooth(expected) => (*expected == ec.car_connected).then(|| {
            if ec.car_connected {
                "Connected to car Bluetooth".to_string()
            } else {
                "Not connected to car Bluetooth".to_string()
            }
        }),
        Condition::MinSpeed(min) => {
            (ec.speed_kmh >= *min).then(|| format!("Speed: {:.1} km/h", ec.speed_kmh))
        }
        Condition::MaxSpeed(max) => {
            (ec.speed_kmh <= *max).then(|| format!("Speed: {:.1} km/h", ec.speed_kmh))
        }
        Condition::Extra { name, value } => ec
            .extras
            .get(name)
            .is_some_and(|actual| actual == value)
            .then(|| format!("{}: {}", humanize_token(name), value)),
    }
}

fn day_name(day: u8) -> &'static str {
    match day {
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        6 => "Saturday",
        _ => "Sunday",
    }
}

fn humanize_token(token: &str) -> String {
    token.replace('_', " ")
}
