//! Context extraction.
//!
//! Converts a raw [`ContextSnapshot`] into categorical features suitable for
//! rule matching and Bayesian slot lookup. Extraction is a pure function:
//! identical snapshots always yield identical [`ExtractedContext`] values.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{ActivityType, ContextSnapshot};

/// Penalty subtracted from the confidence score per missing primary field.
const MISSING_FIELD_PENALTY: f64 = 0.2;

/// Time-of-day bucket derived from the hour of the timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// Bucket an hour (0-23).
    pub fn from_hour(hour: u32) -> Self {
        if hour < 12 {
            TimeOfDay::Morning
        } else if hour < 17 {
            TimeOfDay::Afternoon
        } else if hour < 21 {
            TimeOfDay::Evening
        } else {
            TimeOfDay::Night
        }
    }

    /// Lowercase token used in context keys.
    pub fn token(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }
}

/// Normalized location category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationCategory {
    Home,
    Work,
    Campus,
    Commute,
    NearHome,
    InParkedVehicle,
    Unknown,
}

impl LocationCategory {
    /// Lowercase token used in context keys.
    pub fn token(&self) -> &'static str {
        match self {
            LocationCategory::Home => "home",
            LocationCategory::Work => "work",
            LocationCategory::Campus => "campus",
            LocationCategory::Commute => "commute",
            LocationCategory::NearHome => "near_home",
            LocationCategory::InParkedVehicle => "in_parked_vehicle",
            LocationCategory::Unknown => "unknown",
        }
    }

    /// Parse the wire token (case-insensitive).
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "HOME" => Some(LocationCategory::Home),
            "WORK" => Some(LocationCategory::Work),
            "CAMPUS" => Some(LocationCategory::Campus),
            "COMMUTE" => Some(LocationCategory::Commute),
            "NEAR_HOME" => Some(LocationCategory::NearHome),
            "IN_PARKED_VEHICLE" => Some(LocationCategory::InParkedVehicle),
            "UNKNOWN" => Some(LocationCategory::Unknown),
            _ => None,
        }
    }
}

/// Normalized activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityState {
    Stationary,
    Traveling,
    Walking,
    Unknown,
}

impl ActivityState {
    /// Map a raw activity type to its normalized state.
    pub fn from_activity(activity: ActivityType) -> Self {
        match activity {
            ActivityType::Still => ActivityState::Stationary,
            ActivityType::Walking | ActivityType::Running | ActivityType::OnFoot => {
                ActivityState::Walking
            }
            ActivityType::InVehicle | ActivityType::OnBicycle => ActivityState::Traveling,
            ActivityType::Unknown => ActivityState::Unknown,
        }
    }

    /// Lowercase token used in context keys.
    pub fn token(&self) -> &'static str {
        match self {
            ActivityState::Stationary => "stationary",
            ActivityState::Traveling => "traveling",
            ActivityState::Walking => "walking",
            ActivityState::Unknown => "unknown",
        }
    }

    /// Parse the wire token (case-insensitive).
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "STATIONARY" => Some(ActivityState::Stationary),
            "TRAVELING" => Some(ActivityState::Traveling),
            "WALKING" => Some(ActivityState::Walking),
            "UNKNOWN" => Some(ActivityState::Unknown),
            _ => None,
        }
    }
}

/// Categorical context features produced by extraction.
///
/// Raw fields needed by the rule matcher (`activity`, `wifi_ssid`,
/// `location_vector`, `extras`, `speed_kmh`) are retained verbatim alongside
/// the derived categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContext {
    pub timestamp: DateTime<Utc>,
    pub time_of_day: TimeOfDay,
    /// ISO day of week: Monday = 1 .. Sunday = 7.
    pub day_of_week: u8,
    pub is_weekday: bool,
    pub location_category: LocationCategory,
    pub activity_state: ActivityState,
    pub activity: ActivityType,
    pub car_connected: bool,
    pub wifi_ssid: Option<String>,
    pub location_vector: Option<String>,
    pub speed_kmh: f64,
    pub extras: BTreeMap<String, serde_json::Value>,
    /// Data-quality indicator in [0, 1].
    pub confidence_score: f64,
}

impl ExtractedContext {
    /// Whether a WiFi network is connected (non-empty SSID).
    pub fn wifi_connected(&self) -> bool {
        self.wifi_ssid.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Canonical slot-lookup key: activity state, time-of-day bucket,
    /// weekday flag, and location category, joined by `_` in that order.
    pub fn context_key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.activity_state.token(),
            self.time_of_day.token(),
            if self.is_weekday { "weekday" } else { "weekend" },
            self.location_category.token(),
        )
    }
}

/// Extract categorical features from a raw snapshot. Pure; no side effects.
pub fn extract(snapshot: &ContextSnapshot) -> ExtractedContext {
    let hour = snapshot.timestamp.hour();
    let day_of_week = snapshot.timestamp.weekday().number_from_monday() as u8;
    let is_weekday = day_of_week <= 5;

    let activity_state = ActivityState::from_activity(snapshot.activity);
    let location_category = infer_location(snapshot);
    let confidence_score = confidence_score(snapshot);

    ExtractedContext {
        timestamp: snapshot.timestamp,
        time_of_day: TimeOfDay::from_hour(hour),
        day_of_week,
        is_weekday,
        location_category,
        activity_state,
        activity: snapshot.activity,
        car_connected: snapshot.car_bluetooth_connected,
        wifi_ssid: snapshot.wifi_ssid.clone(),
        location_vector: snapshot.location_vector.clone(),
        speed_kmh: snapshot.speed_kmh,
        extras: snapshot.extras.clone(),
        confidence_score,
    }
}

fn wifi_matches(snapshot: &ContextSnapshot, patterns: &[&str]) -> bool {
    let Some(ssid) = snapshot.wifi_ssid.as_deref() else {
        return false;
    };
    let lower = ssid.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

/// Infer the location category from connectivity and motion signals.
/// Rules are evaluated in order; the first match wins.
fn infer_location(snapshot: &ContextSnapshot) -> LocationCategory {
    let speed = snapshot.speed_kmh;
    let car = snapshot.car_bluetooth_connected;
    let wifi_empty = !snapshot.wifi_connected();

    if speed > 10.0 && car && snapshot.activity == ActivityType::InVehicle {
        return LocationCategory::Commute;
    }
    if speed < 5.0 && wifi_matches(snapshot, &["home"]) {
        return LocationCategory::Home;
    }
    if speed < 5.0 && wifi_matches(snapshot, &["office", "work"]) {
        return LocationCategory::Work;
    }
    if speed < 5.0 && wifi_matches(snapshot, &["campus", "university"]) {
        return LocationCategory::Campus;
    }
    if speed > 0.0 && speed < 10.0 && snapshot.activity == ActivityType::Walking && wifi_empty {
        return LocationCategory::NearHome;
    }
    if speed < 5.0 && car && snapshot.activity == ActivityType::Still {
        return LocationCategory::InParkedVehicle;
    }
    LocationCategory::Unknown
}

/// Data-quality score: starts at 1.0 and loses a fixed penalty for each
/// missing primary signal, clamped at 0.
fn confidence_score(snapshot: &ContextSnapshot) -> f64 {
    let mut score = 1.0;
    if snapshot.activity == ActivityType::Unknown {
        score -= MISSING_FIELD_PENALTY;
    }
    if !snapshot.wifi_connected() && !snapshot.car_bluetooth_connected {
        score -= MISSING_FIELD_PENALTY;
    }
    if !snapshot.has_location_vector() {
        score -= MISSING_FIELD_PENALTY;
    }
    score.max(0.0)
}
