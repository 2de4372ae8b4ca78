//! Joint schedule optimization scenarios, driven through the engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use nudge_core::{
    ActivityType, ContextSnapshot, Database, EngineConfig, InferenceEngine, NewRule,
    OptimizationQuality, RuleCatalog, RuleSource, SlotKey, TimingOptimizer, TimingSlot,
    TriggerCondition,
};

fn traveling_rule(name: &str) -> NewRule {
    NewRule {
        name: name.to_string(),
        description: String::new(),
        trigger_condition: TriggerCondition::from_pairs([("activity", json!("TRAVELING"))]),
        weight: 0.75,
        is_active: true,
        source: RuleSource::User,
        calendar_event_id: None,
    }
}

fn commute_snapshot() -> ContextSnapshot {
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

const COMMUTE_KEY: &str = "traveling_morning_weekday_commute";

/// Beta parameters that put the posterior mean at `confidence` with eight
/// feedback samples.
fn slot_with_confidence(confidence: f64) -> TimingSlot {
    let total = 10.0;
    TimingSlot {
        alpha: confidence * total,
        beta: (1.0 - confidence) * total,
        total_triggers: 8,
    }
}

#[test]
fn two_task_joint_optimization_beats_per_task_myopia() {
    // Candidate 1 prefers short leads, candidate 2 prefers long leads:
    // confidences [0.9, 0.7, 0.5, 0.3] and [0.3, 0.5, 0.7, 0.9] over
    // leads {10, 15, 30, 60}. The joint optimum is (10, 60).
    let db = Arc::new(Database::open_memory().unwrap());
    let catalog = Arc::new(RuleCatalog::load(Arc::clone(&db)).unwrap());
    let alpha = catalog.create(traveling_rule("Alpha Task")).unwrap();
    let beta = catalog.create(traveling_rule("Beta Task")).unwrap();

    let mut slots = HashMap::new();
    let confidences_short = [(10, 0.9), (15, 0.7), (30, 0.5), (60, 0.3)];
    let confidences_long = [(10, 0.3), (15, 0.5), (30, 0.7), (60, 0.9)];
    for (lead, conf) in confidences_short {
        slots.insert(
            SlotKey::new("alpha", COMMUTE_KEY, lead),
            slot_with_confidence(conf),
        );
    }
    for (lead, conf) in confidences_long {
        slots.insert(
            SlotKey::new("beta", COMMUTE_KEY, lead),
            slot_with_confidence(conf),
        );
    }

    let config = EngineConfig::default();
    let timing = Arc::new(TimingOptimizer::with_slots(&config, slots));
    let engine = InferenceEngine::new(catalog, timing, db, config);

    let response = engine.infer(&commute_snapshot(), true).unwrap();
    assert_eq!(response.suggested_tasks.len(), 2);

    let chosen: HashMap<i64, u32> = response
        .suggested_tasks
        .iter()
        .map(|s| (s.rule_id, s.chosen_lead_time))
        .collect();

    // Exhaustive argmax over every (i, j) pair.
    let mut best = (0u32, 0u32, f64::NEG_INFINITY);
    for (la, ca) in confidences_short {
        for (lb, cb) in confidences_long {
            if ca + cb > best.2 {
                best = (la, lb, ca + cb);
            }
        }
    }
    assert_eq!(best.0, 10);
    assert_eq!(best.1, 60);
    assert_eq!(chosen[&alpha.id], best.0);
    assert_eq!(chosen[&beta.id], best.1);

    let search = response.search.unwrap();
    assert!(search.search_completed);
    assert_eq!(search.optimization_quality, OptimizationQuality::Optimal);
    // Both rules share the suggestion score, so the joint reward is
    // 0.75 × (0.9 + 0.9).
    assert!((search.total_expected_reward - 0.75 * 1.8).abs() < 1e-9);
}

#[test]
fn completed_search_never_loses_to_greedy() {
    let db = Arc::new(Database::open_memory().unwrap());
    let catalog = Arc::new(RuleCatalog::load(Arc::clone(&db)).unwrap());
    for name in ["One Task", "Two Task", "Three Task"] {
        catalog.create(traveling_rule(name)).unwrap();
    }

    let mut slots = HashMap::new();
    let spreads = [
        ("one", [(10, 0.62), (15, 0.64), (30, 0.31), (60, 0.18)]),
        ("two", [(10, 0.55), (15, 0.12), (30, 0.73), (60, 0.44)]),
        ("three", [(10, 0.21), (15, 0.42), (30, 0.40), (60, 0.81)]),
    ];
    for (task_type, confidences) in spreads {
        for (lead, conf) in confidences {
            slots.insert(
                SlotKey::new(task_type, COMMUTE_KEY, lead),
                slot_with_confidence(conf),
            );
        }
    }

    let config = EngineConfig::default();
    let timing = Arc::new(TimingOptimizer::with_slots(&config, slots));
    let engine = InferenceEngine::new(catalog, timing, db, config);

    let optimized = engine.infer(&commute_snapshot(), true).unwrap();
    let search = optimized.search.unwrap();
    assert!(search.search_completed);

    // Greedy reward: per-candidate best confidence × shared score.
    let greedy_reward: f64 = 0.75 * (0.64 + 0.73 + 0.81);
    assert!(search.total_expected_reward >= greedy_reward - 1e-9);
}

#[test]
fn budget_exhaustion_downgrades_to_greedy() {
    // Eight candidates, four equal-confidence options each: the frontier
    // fans out level by level and 50 nodes are gone before any complete
    // schedule exists.
    let db = Arc::new(Database::open_memory().unwrap());
    let catalog = Arc::new(RuleCatalog::load(Arc::clone(&db)).unwrap());
    let names = [
        "Ada Task", "Bell Task", "Cray Task", "Dijkstra Task", "Erlang Task", "Floyd Task",
        "Gray Task", "Hoare Task",
    ];
    for name in names {
        catalog.create(traveling_rule(name)).unwrap();
    }

    let config = EngineConfig {
        max_search_nodes: 50,
        ..Default::default()
    };
    // Fresh slots everywhere: every option has confidence 0.5.
    let timing = Arc::new(TimingOptimizer::from_config(&config));
    let engine = InferenceEngine::new(catalog, timing, db, config);

    let response = engine.infer(&commute_snapshot(), true).unwrap();
    let search = response.search.unwrap();

    assert!(!search.search_completed);
    assert_eq!(
        search.optimization_quality,
        OptimizationQuality::GreedyFallback
    );
    assert_eq!(response.suggested_tasks.len(), 8);
    // The fallback is the per-candidate argmax; ties break toward the
    // smaller lead, so every choice is 10 minutes.
    for suggestion in &response.suggested_tasks {
        assert_eq!(suggestion.chosen_lead_time, 10);
    }
}

#[test]
fn search_results_are_deterministic() {
    let db = Arc::new(Database::open_memory().unwrap());
    let catalog = Arc::new(RuleCatalog::load(Arc::clone(&db)).unwrap());
    for name in ["First Task", "Second Task", "Third Task"] {
        catalog.create(traveling_rule(name)).unwrap();
    }
    let config = EngineConfig::default();
    let timing = Arc::new(TimingOptimizer::from_config(&config));
    let engine = InferenceEngine::new(catalog, timing, db, config);

    let first = engine.infer(&commute_snapshot(), true).unwrap();
    for _ in 0..5 {
        let again = engine.infer(&commute_snapshot(), true).unwrap();
        let picks: Vec<(i64, u32)> = again
            .suggested_tasks
            .iter()
            .map(|s| (s.rule_id, s.chosen_lead_time))
            .collect();
        let reference: Vec<(i64, u32)> = first
            .suggested_tasks
            .iter()
            .map(|s| (s.rule_id, s.chosen_lead_time))
            .collect();
        assert_eq!(picks, reference);
    }
}
