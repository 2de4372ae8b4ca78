//! Raw context snapshot types.
//!
//! A [`ContextSnapshot`] is the wire-level input to inference: one moment of
//! sensor and connectivity state as reported by the device. The engine never
//! interprets it directly; extraction (see [`crate::extract`]) turns it into
//! categorical features first.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Raw device activity as reported by the motion recognition stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Still,
    Walking,
    Running,
    OnBicycle,
    InVehicle,
    OnFoot,
    Unknown,
}

impl ActivityType {
    /// Human-readable form used in reasoning strings.
    pub fn humanize(&self) -> &'static str {
        match self {
            ActivityType::Still => "stationary",
            ActivityType::Walking => "walking",
            ActivityType::Running => "running",
            ActivityType::OnBicycle => "cycling",
            ActivityType::InVehicle => "driving",
            ActivityType::OnFoot => "on foot",
            ActivityType::Unknown => "in an unknown activity",
        }
    }

    /// Parse the wire token (case-insensitive). Returns `None` for tokens
    /// outside the vocabulary.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "STILL" => Some(ActivityType::Still),
            "WALKING" => Some(ActivityType::Walking),
            "RUNNING" => Some(ActivityType::Running),
            "ON_BICYCLE" => Some(ActivityType::OnBicycle),
            "IN_VEHICLE" => Some(ActivityType::InVehicle),
            "ON_FOOT" => Some(ActivityType::OnFoot),
            "UNKNOWN" => Some(ActivityType::Unknown),
            _ => None,
        }
    }
}

/// One snapshot of the user's situation.
///
/// Unknown `extras` fields are accepted and preserved untouched; rules may
/// reference them via `extras.<name>` condition keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub activity: ActivityType,
    #[serde(default)]
    pub speed_kmh: f64,
    #[serde(default)]
    pub car_bluetooth_connected: bool,
    #[serde(default)]
    pub wifi_ssid: Option<String>,
    #[serde(default)]
    pub location_vector: Option<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl ContextSnapshot {
    /// Validate the snapshot before inference or feedback.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.speed_kmh.is_finite() {
            return Err(ValidationError::NonFiniteSpeed(self.speed_kmh));
        }
        if self.speed_kmh < 0.0 {
            return Err(ValidationError::NegativeSpeed(self.speed_kmh));
        }
        Ok(())
    }

    /// Whether a WiFi network is currently connected (non-empty SSID).
    pub fn wifi_connected(&self) -> bool {
        self.wifi_ssid.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// WiFi state for context summaries: the SSID, or "disconnected".
    pub fn wifi_state(&self) -> &str {
        match self.wifi_ssid.as_deref() {
            Some(ssid) if !ssid.is_empty() => ssid,
            _ => "disconnected",
        }
    }

    /// Whether an explicit location vector is present.
    pub fn has_location_vector(&self) -> bool {
        self.location_vector.as_deref().is_some_and(|s| !s.is_empty())
    }
}
