//! Shared helpers for CLI commands.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Args;

use nudge_core::{
    ActivityType, ContextSnapshot, Database, EngineConfig, InferenceEngine, LearningService,
    RuleCatalog, TimingOptimizer,
};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// All engine components wired against the default data directory.
pub struct Runtime {
    pub catalog: Arc<RuleCatalog>,
    pub engine: InferenceEngine,
    pub learning: LearningService,
}

/// Open the database, load persisted state, and compose the engine.
pub fn open_runtime() -> Result<Runtime, Box<dyn std::error::Error>> {
    let config = EngineConfig::load()?;
    let db = Arc::new(Database::open_default()?);
    let catalog = Arc::new(RuleCatalog::load(Arc::clone(&db))?);
    let timing = Arc::new(TimingOptimizer::with_slots(&config, db.load_slots()?));
    let engine = InferenceEngine::new(
        Arc::clone(&catalog),
        Arc::clone(&timing),
        Arc::clone(&db),
        config,
    );
    let learning = LearningService::new(Arc::clone(&catalog), timing, db);
    Ok(Runtime {
        catalog,
        engine,
        learning,
    })
}

/// Context snapshot flags shared by `infer` and `feedback`.
#[derive(Args, Debug)]
pub struct ContextArgs {
    /// Raw activity (STILL, WALKING, RUNNING, ON_BICYCLE, IN_VEHICLE, ON_FOOT, UNKNOWN)
    #[arg(long, default_value = "STILL")]
    pub activity: String,
    /// Speed in km/h
    #[arg(long, default_value_t = 0.0)]
    pub speed: f64,
    /// Car Bluetooth connected
    #[arg(long)]
    pub car_bluetooth: bool,
    /// Current WiFi SSID
    #[arg(long)]
    pub wifi: Option<String>,
    /// Location vector tag (e.g. home, work, leaving_home)
    #[arg(long)]
    pub location: Option<String>,
    /// Snapshot timestamp (RFC 3339); defaults to now
    #[arg(long)]
    pub at: Option<String>,
    /// Extra facts as a JSON object (e.g. '{"has_upcoming_meeting": true}')
    #[arg(long)]
    pub extras: Option<String>,
    /// Read the full snapshot from a JSON file instead of flags
    #[arg(long)]
    pub file: Option<String>,
}

impl ContextArgs {
    pub fn to_snapshot(&self) -> Result<ContextSnapshot, Box<dyn std::error::Error>> {
        if let Some(path) = &self.file {
            let content = std::fs::read_to_string(path)?;
            let snapshot: ContextSnapshot = serde_json::from_str(&content)?;
            return Ok(snapshot);
        }

        let activity = ActivityType::parse(&self.activity)
            .ok_or_else(|| format!("unknown activity '{}'", self.activity))?;

        let timestamp = match &self.at {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| format!("invalid --at timestamp: {e}"))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        let extras: BTreeMap<String, serde_json::Value> = match &self.extras {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| format!("invalid --extras JSON: {e}"))?,
            None => BTreeMap::new(),
        };

        Ok(ContextSnapshot {
            timestamp,
            activity,
            speed_kmh: self.speed,
            car_bluetooth_connected: self.car_bluetooth,
            wifi_ssid: self.wifi.clone(),
            location_vector: self.location.clone(),
            extras,
        })
    }
}
