//! Rule catalog.
//!
//! A typed store of rules: an in-memory map behind a single reader-writer
//! lock with write-through SQLite persistence. Mutations are serialized by
//! holding the write lock across the database write; no business rules live
//! here.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::error::{CoreError, Result};
use crate::storage::Database;

use super::rule::{clamp_weight, NewRule, Rule};

/// Catalog of suggestion rules.
pub struct RuleCatalog {
    state: RwLock<BTreeMap<i64, Rule>>,
    db: Arc<Database>,
}

impl RuleCatalog {
    /// Load the catalog from the database.
    pub fn load(db: Arc<Database>) -> Result<Self> {
        let rules = db.load_rules()?;
        let state = rules.into_iter().map(|r| (r.id, r)).collect();
        Ok(Self {
            state: RwLock::new(state),
            db,
        })
    }

    /// Every rule, active or not, in id order.
    pub fn list(&self) -> Vec<Rule> {
        self.read_guard().values().cloned().collect()
    }

    /// Consistent snapshot of the active rules, in id order.
    pub fn active_snapshot(&self) -> Vec<Rule> {
        self.read_guard()
            .values()
            .filter(|r| r.is_active)
            .cloned()
            .collect()
    }

    /// Look up one rule by id.
    pub fn get(&self, id: i64) -> Option<Rule> {
        self.read_guard().get(&id).cloned()
    }

    /// Look up a calendar-derived rule by its source event id.
    pub fn find_by_event_id(&self, event_id: &str) -> Option<Rule> {
        self.read_guard()
            .values()
            .find(|r| r.calendar_event_id.as_deref() == Some(event_id))
            .cloned()
    }

    /// Create a rule; the weight is clamped on the way in.
    pub fn create(&self, new: NewRule) -> Result<Rule> {
        let now = Utc::now();
        let mut rule = Rule {
            id: 0,
            name: new.name,
            description: new.description,
            trigger_condition: new.trigger_condition,
            weight: clamp_weight(new.weight),
            is_active: new.is_active,
            source: new.source,
            calendar_event_id: new.calendar_event_id,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.write_guard();
        rule.id = self.db.insert_rule(&rule)?;
        state.insert(rule.id, rule.clone());
        Ok(rule)
    }

    /// Replace the mutable fields of an existing rule.
    pub fn update(&self, rule: Rule) -> Result<Rule> {
        let mut state = self.write_guard();
        if !state.contains_key(&rule.id) {
            return Err(CoreError::RuleNotFound(rule.id));
        }
        let mut rule = rule;
        rule.weight = clamp_weight(rule.weight);
        rule.updated_at = Utc::now();
        self.db.update_rule(&rule)?;
        state.insert(rule.id, rule.clone());
        Ok(rule)
    }

    /// Apply a weight delta, clamped to the allowed band.
    /// Returns `(old_weight, new_weight)`.
    pub fn update_weight(&self, id: i64, delta: f64) -> Result<(f64, f64)> {
        let now = Utc::now();
        let mut state = self.write_guard();
        let rule = state.get_mut(&id).ok_or(CoreError::RuleNotFound(id))?;
        let old = rule.weight;
        let new = clamp_weight(old + delta);
        self.db.set_rule_weight(id, new, now)?;
        rule.weight = new;
        rule.updated_at = now;
        Ok((old, new))
    }

    /// Retire a rule. Inactive rules are never evaluated.
    pub fn deactivate(&self, id: i64) -> Result<()> {
        let now = Utc::now();
        let mut state = self.write_guard();
        let rule = state.get_mut(&id).ok_or(CoreError::RuleNotFound(id))?;
        self.db.set_rule_active(id, false, now)?;
        rule.is_active = false;
        rule.updated_at = now;
        Ok(())
    }

    /// Number of rules in the catalog.
    pub fn len(&self) -> usize {
        self.read_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_guard().is_empty()
    }

    pub(crate) fn read_guard(&self) -> RwLockReadGuard<'_, BTreeMap<i64, Rule>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_guard(&self) -> RwLockWriteGuard<'_, BTreeMap<i64, Rule>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::condition::TriggerCondition;
    use crate::rules::rule::{RuleSource, WEIGHT_MAX, WEIGHT_MIN};
    use serde_json::json;

    fn catalog() -> RuleCatalog {
        RuleCatalog::load(Arc::new(Database::open_memory().unwrap())).unwrap()
    }

    fn new_rule(name: &str, weight: f64) -> NewRule {
        NewRule {
            name: name.to_string(),
            description: String::new(),
            trigger_condition: TriggerCondition::from_pairs([("activity", json!("WALKING"))]),
            weight,
            is_active: true,
            source: RuleSource::User,
            calendar_event_id: None,
        }
    }

    #[test]
    fn test_create_assigns_ids() {
        let catalog = catalog();
        let a = catalog.create(new_rule("First", 0.75)).unwrap();
        let b = catalog.create(new_rule("Second", 0.75)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_create_clamps_weight() {
        let catalog = catalog();
        let rule = catalog.create(new_rule("Over", 1.5)).unwrap();
        assert_eq!(rule.weight, WEIGHT_MAX);
        let rule = catalog.create(new_rule("Under", 0.0)).unwrap();
        assert_eq!(rule.weight, WEIGHT_MIN);
    }

    #[test]
    fn test_update_weight_clamps() {
        let catalog = catalog();
        let rule = catalog.create(new_rule("Rule", 0.90)).unwrap();

        let (old, new) = catalog.update_weight(rule.id, 0.05).unwrap();
        assert_eq!(old, 0.90);
        assert_eq!(new, WEIGHT_MAX);

        let (_, new) = catalog.update_weight(rule.id, 0.05).unwrap();
        assert_eq!(new, WEIGHT_MAX);

        for _ in 0..20 {
            catalog.update_weight(rule.id, -0.10).unwrap();
        }
        assert_eq!(catalog.get(rule.id).unwrap().weight, WEIGHT_MIN);
    }

    #[test]
    fn test_deactivated_rules_excluded_from_snapshot() {
        let catalog = catalog();
        let keep = catalog.create(new_rule("Keep", 0.75)).unwrap();
        let drop = catalog.create(new_rule("Drop", 0.75)).unwrap();

        catalog.deactivate(drop.id).unwrap();

        let active = catalog.active_snapshot();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, keep.id);
        assert_eq!(catalog.list().len(), 2);
    }

    #[test]
    fn test_missing_rule_errors() {
        let catalog = catalog();
        assert!(matches!(
            catalog.update_weight(999, 0.05),
            Err(CoreError::RuleNotFound(999))
        ));
        assert!(matches!(
            catalog.deactivate(999),
            Err(CoreError::RuleNotFound(999))
        ));
    }

    #[test]
    fn test_reload_from_database() {
        let db = Arc::new(Database::open_memory().unwrap());
        let catalog = RuleCatalog::load(Arc::clone(&db)).unwrap();
        let rule = catalog.create(new_rule("Persisted", 0.80)).unwrap();
        catalog.update_weight(rule.id, -0.10).unwrap();

        let reloaded = RuleCatalog::load(db).unwrap();
        let loaded = reloaded.get(rule.id).unwrap();
        assert!((loaded.weight - 0.70).abs() < 1e-9);
        assert_eq!(loaded.name, "Persisted");
    }

    #[test]
    fn test_find_by_event_id() {
        let catalog = catalog();
        let mut new = new_rule("Standup", 0.85);
        new.source = RuleSource::Calendar;
        new.calendar_event_id = Some("evt-42".to_string());
        let rule = catalog.create(new).unwrap();

        assert_eq!(catalog.find_by_event_id("evt-42").unwrap().id, rule.id);
        assert!(catalog.find_by_event_id("evt-missing").is_none());
    }
}
