//! Calendar event ingestion.
//!
//! An external parser supplies events already enriched with priority and
//! preparation metadata; the core converts each into a catalog rule whose
//! trigger matches the event's start time and whose initial weight follows
//! the event priority. Re-ingesting a known event id updates the existing
//! rule in place.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::rules::{NewRule, Rule, RuleCatalog, RuleSource, TriggerCondition};

/// Priority assigned by the external calendar parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventPriority {
    High,
    Medium,
    Low,
}

impl EventPriority {
    /// Initial rule weight for events of this priority.
    pub fn initial_weight(&self) -> f64 {
        match self {
            EventPriority::High => 0.85,
            EventPriority::Medium => 0.75,
            EventPriority::Low => 0.65,
        }
    }
}

/// A calendar event as delivered by the external parser. The core trusts
/// these fields; it never parses event text itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub event_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub priority: EventPriority,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub preparation_time_minutes: u32,
    #[serde(default)]
    pub travel_time_minutes: u32,
}

impl ParsedEvent {
    /// Trigger condition matching the event's start time.
    fn trigger(&self) -> TriggerCondition {
        let start = format!(
            "{:02}:{:02}",
            self.start_time.hour(),
            self.start_time.minute()
        );
        TriggerCondition::from_pairs([("time", json!(start))])
    }

    fn description(&self) -> String {
        let mut description = self.title.clone();
        if let Some(location) = &self.location {
            description.push_str(&format!(" at {location}"));
        }
        if self.preparation_time_minutes > 0 {
            description.push_str(&format!(
                " ({} min preparation)",
                self.preparation_time_minutes
            ));
        }
        if self.travel_time_minutes > 0 {
            description.push_str(&format!(" ({} min travel)", self.travel_time_minutes));
        }
        description
    }
}

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub created: usize,
    pub updated: usize,
    /// Rules newly generated by this batch.
    pub rules_generated: usize,
}

/// Convert a batch of parsed events into catalog rules, upserting by event
/// id.
pub fn ingest_events(catalog: &RuleCatalog, events: &[ParsedEvent]) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for event in events {
        match catalog.find_by_event_id(&event.event_id) {
            Some(existing) => {
                let updated = Rule {
                    name: event.title.clone(),
                    description: event.description(),
                    trigger_condition: event.trigger(),
                    weight: event.priority.initial_weight(),
                    ..existing
                };
                catalog.update(updated)?;
                summary.updated += 1;
                debug!(event_id = %event.event_id, "calendar rule updated");
            }
            None => {
                let rule = catalog.create(NewRule {
                    name: event.title.clone(),
                    description: event.description(),
                    trigger_condition: event.trigger(),
                    weight: event.priority.initial_weight(),
                    is_active: true,
                    source: RuleSource::Calendar,
                    calendar_event_id: Some(event.event_id.clone()),
                })?;
                summary.created += 1;
                summary.rules_generated += 1;
                debug!(event_id = %event.event_id, rule_id = rule.id, "calendar rule created");
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn catalog() -> RuleCatalog {
        RuleCatalog::load(Arc::new(Database::open_memory().unwrap())).unwrap()
    }

    fn event(id: &str, title: &str, priority: EventPriority) -> ParsedEvent {
        ParsedEvent {
            event_id: id.to_string(),
            title: title.to_string(),
            start_time: Utc.with_ymd_and_hms(2025, 12, 2, 14, 30, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2025, 12, 2, 15, 30, 0).unwrap(),
            priority,
            is_all_day: false,
            location: None,
            preparation_time_minutes: 0,
            travel_time_minutes: 0,
        }
    }

    #[test]
    fn test_priority_weight_mapping() {
        assert_eq!(EventPriority::High.initial_weight(), 0.85);
        assert_eq!(EventPriority::Medium.initial_weight(), 0.75);
        assert_eq!(EventPriority::Low.initial_weight(), 0.65);
    }

    #[test]
    fn test_ingest_creates_rules() {
        let catalog = catalog();
        let events = vec![
            event("evt-1", "Dentist Appointment", EventPriority::High),
            event("evt-2", "Team Sync", EventPriority::Medium),
        ];
        let summary = ingest_events(&catalog, &events).unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.rules_generated, 2);

        let rule = catalog.find_by_event_id("evt-1").unwrap();
        assert_eq!(rule.weight, 0.85);
        assert_eq!(rule.source, RuleSource::Calendar);
        assert_eq!(
            rule.trigger_condition.get("time"),
            Some(&serde_json::json!("14:30"))
        );
    }

    #[test]
    fn test_reingest_updates_in_place() {
        let catalog = catalog();
        let first = vec![event("evt-1", "Dentist Appointment", EventPriority::Low)];
        ingest_events(&catalog, &first).unwrap();

        let mut changed = event("evt-1", "Dentist (rescheduled)", EventPriority::High);
        changed.start_time = Utc.with_ymd_and_hms(2025, 12, 3, 9, 0, 0).unwrap();
        let summary = ingest_events(&catalog, &[changed]).unwrap();

        assert_eq!(summary.created, 0);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.rules_generated, 0);
        assert_eq!(catalog.len(), 1);

        let rule = catalog.find_by_event_id("evt-1").unwrap();
        assert_eq!(rule.name, "Dentist (rescheduled)");
        assert_eq!(rule.weight, 0.85);
        assert_eq!(
            rule.trigger_condition.get("time"),
            Some(&serde_json::json!("09:00"))
        );
    }

    #[test]
    fn test_description_carries_prep_metadata() {
        let mut ev = event("evt-3", "Flight", EventPriority::High);
        ev.location = Some("Airport".to_string());
        ev.preparation_time_minutes = 45;
        ev.travel_time_minutes = 30;
        assert_eq!(
            ev.description(),
            "Flight at Airport (45 min preparation) (30 min travel)"
        );
    }

    #[test]
    fn test_wire_format() {
        let json = r#"{
            "event_id": "abc",
            "title": "Exam",
            "start_time": "2025-12-10T09:00:00Z",
            "end_time": "2025-12-10T11:00:00Z",
            "priority": "HIGH",
            "is_all_day": false,
            "preparation_time_minutes": 30,
            "travel_time_minutes": 15
        }"#;
        let event: ParsedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.priority, EventPriority::High);
        assert_eq!(event.preparation_time_minutes, 30);
        assert!(event.location.is_none());
    }
}
