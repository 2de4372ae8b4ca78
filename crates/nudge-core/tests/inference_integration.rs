//! End-to-end inference scenarios.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use nudge_core::{
    extract, ActivityType, ContextSnapshot, Database, EngineConfig, InferenceEngine, NewRule,
    RuleCatalog, RuleSource, TimingOptimizer, TriggerCondition,
};

fn engine_with_rules(rules: Vec<NewRule>) -> (InferenceEngine, Vec<i64>) {
    let db = Arc::new(Database::open_memory().unwrap());
    let catalog = Arc::new(RuleCatalog::load(Arc::clone(&db)).unwrap());
    let config = EngineConfig::default();
    let timing = Arc::new(TimingOptimizer::from_config(&config));

    let ids = rules
        .into_iter()
        .map(|rule| catalog.create(rule).unwrap().id)
        .collect();

    (InferenceEngine::new(catalog, timing, db, config), ids)
}

fn fuel_rule(weight: f64) -> NewRule {
    NewRule {
        name: "Get Fuel".to_string(),
        description: "Stop at the gas station on the way".to_string(),
        trigger_condition: TriggerCondition::from_pairs([
            ("activity", json!("TRAVELING")),
            ("time_range", json!("07:00-10:00")),
        ]),
        weight,
        is_active: true,
        source: RuleSource::User,
        calendar_event_id: None,
    }
}

/// Monday 2025-12-01, 08:30, driving with car Bluetooth, no WiFi.
fn morning_commute() -> ContextSnapshot {
    ContextSnapshot {
        timestamp: Utc.with_ymd_and_hms(2025, 12, 1, 8, 30, 0).unwrap(),
        activity: ActivityType::InVehicle,
        speed_kmh: 45.0,
        car_bluetooth_connected: true,
        wifi_ssid: None,
        location_vector: Some("leaving_home".to_string()),
        extras: BTreeMap::new(),
    }
}

#[test]
fn morning_commute_surfaces_fuel_reminder() {
    let (engine, ids) = engine_with_rules(vec![fuel_rule(0.75)]);
    let response = engine.infer(&morning_commute(), true).unwrap();

    assert_eq!(response.suggested_tasks.len(), 1);
    let suggestion = &response.suggested_tasks[0];
    assert_eq!(suggestion.rule_id, ids[0]);
    assert!(suggestion.suggestion_score >= 0.75);
    assert_eq!(suggestion.base_score, 1.0);
    assert!(suggestion.reasoning.contains("2/2"));
    assert_eq!(response.total_rules_evaluated, 1);

    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["context_summary"]["location_category"], "COMMUTE");
    assert_eq!(value["context_summary"]["optimization_mode"], "A* search");
    assert_eq!(value["context_summary"]["wifi"], "disconnected");
    assert_eq!(value["context_summary"]["activity"], "IN_VEHICLE");
}

#[test]
fn below_threshold_rule_is_suppressed() {
    let (engine, _) = engine_with_rules(vec![fuel_rule(0.50)]);
    let response = engine.infer(&morning_commute(), true).unwrap();

    // base_score 1.0 but 1.0 × 0.50 < 0.60: nothing surfaces, no error.
    assert!(response.suggested_tasks.is_empty());
    assert_eq!(response.total_rules_evaluated, 1);
}

#[test]
fn every_returned_suggestion_clears_the_threshold() {
    let rules = vec![
        fuel_rule(0.95),
        fuel_rule(0.75),
        fuel_rule(0.61),
        fuel_rule(0.59),
        fuel_rule(0.10),
    ];
    let (engine, _) = engine_with_rules(rules);
    let response = engine.infer(&morning_commute(), false).unwrap();

    assert_eq!(response.suggested_tasks.len(), 3);
    for suggestion in &response.suggested_tasks {
        assert!(suggestion.suggestion_score >= 0.60);
    }
    // Ranked by suggestion score, highest first.
    let scores: Vec<f64> = response
        .suggested_tasks
        .iter()
        .map(|s| s.suggestion_score)
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn inactive_rules_are_never_evaluated() {
    let (engine, ids) = engine_with_rules(vec![fuel_rule(0.75)]);
    // Rebuild a catalog handle through a fresh engine call after deactivation.
    let db = Arc::new(Database::open_memory().unwrap());
    let catalog = Arc::new(RuleCatalog::load(Arc::clone(&db)).unwrap());
    let rule = catalog.create(fuel_rule(0.75)).unwrap();
    catalog.deactivate(rule.id).unwrap();
    let config = EngineConfig::default();
    let timing = Arc::new(TimingOptimizer::from_config(&config));
    let engine2 = InferenceEngine::new(catalog, timing, db, config);

    let response = engine2.infer(&morning_commute(), true).unwrap();
    assert!(response.suggested_tasks.is_empty());
    assert_eq!(response.total_rules_evaluated, 0);

    // The original engine still surfaces its active rule.
    let response = engine.infer(&morning_commute(), true).unwrap();
    assert_eq!(response.suggested_tasks[0].rule_id, ids[0]);
}

#[test]
fn empty_catalog_yields_empty_response() {
    let (engine, _) = engine_with_rules(Vec::new());
    let response = engine.infer(&morning_commute(), true).unwrap();
    assert!(response.suggested_tasks.is_empty());
    assert_eq!(response.total_rules_evaluated, 0);
}

#[test]
fn rule_with_only_unknown_keys_never_surfaces() {
    let weird = NewRule {
        name: "Weird".to_string(),
        description: String::new(),
        trigger_condition: TriggerCondition::from_pairs([("moon_phase", json!("full"))]),
        weight: 0.95,
        is_active: true,
        source: RuleSource::User,
        calendar_event_id: None,
    };
    let (engine, _) = engine_with_rules(vec![weird]);
    let response = engine.infer(&morning_commute(), true).unwrap();
    assert!(response.suggested_tasks.is_empty());
}

#[test]
fn negative_speed_is_rejected() {
    let (engine, _) = engine_with_rules(vec![fuel_rule(0.75)]);
    let mut snapshot = morning_commute();
    snapshot.speed_kmh = -3.0;
    let result = engine.infer(&snapshot, true);
    assert!(matches!(
        result,
        Err(nudge_core::CoreError::InvalidContext(_))
    ));
}

#[test]
fn greedy_mode_picks_smallest_lead_on_fresh_slots() {
    let (engine, _) = engine_with_rules(vec![fuel_rule(0.75)]);
    let response = engine.infer(&morning_commute(), false).unwrap();

    let suggestion = &response.suggested_tasks[0];
    // All slots at the uniform prior: equal UCB everywhere, ties break
    // toward the smaller lead time.
    assert_eq!(suggestion.chosen_lead_time, 10);
    assert_eq!(suggestion.timing_options.len(), 4);
    assert!(response.search.is_none());

    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["context_summary"]["optimization_mode"], "greedy");
}

#[test]
fn context_key_determinism_end_to_end() {
    let mut a = morning_commute();
    a.speed_kmh = 45.0;
    let mut b = morning_commute();
    b.speed_kmh = 95.0;
    b.timestamp = Utc.with_ymd_and_hms(2025, 12, 1, 10, 55, 0).unwrap();

    let ea = extract(&a);
    let eb = extract(&b);
    assert_eq!(ea.context_key(), eb.context_key());
    assert_eq!(ea.context_key(), "traveling_morning_weekday_commute");
}

#[test]
fn extras_pass_through_without_consumption() {
    // The has_upcoming_meeting flag rides along untouched unless a rule
    // names it explicitly.
    let (engine, _) = engine_with_rules(vec![fuel_rule(0.75)]);
    let mut snapshot = morning_commute();
    snapshot
        .extras
        .insert("has_upcoming_meeting".to_string(), json!(true));

    let response = engine.infer(&snapshot, true).unwrap();
    assert_eq!(response.suggested_tasks.len(), 1);
    assert!(!response.suggested_tasks[0]
        .matched_conditions
        .contains_key("extras.has_upcoming_meeting"));

    let meeting_rule = NewRule {
        name: "Prep Meeting".to_string(),
        description: String::new(),
        trigger_condition: TriggerCondition::from_pairs([
            ("extras.has_upcoming_meeting", json!(true)),
        ]),
        weight: 0.75,
        is_active: true,
        source: RuleSource::User,
        calendar_event_id: None,
    };
    let (engine, _) = engine_with_rules(vec![meeting_rule]);
    let response = engine.infer(&snapshot, true).unwrap();
    assert_eq!(response.suggested_tasks.len(), 1);
    assert!(response.suggested_tasks[0]
        .matched_conditions
        .contains_key("extras.has_upcoming_meeting"));
}

#[test]
fn cancellation_aborts_between_rule_evaluations() {
    let (engine, _) = engine_with_rules(vec![fuel_rule(0.75)]);
    let cancel = nudge_core::CancelToken::new();
    cancel.cancel();
    let result = engine.infer_with_cancel(&morning_commute(), true, &cancel);
    assert!(matches!(result, Err(nudge_core::CoreError::Cancelled)));
}
