//! Rule records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::TriggerCondition;

/// Lower bound of the learned rule weight.
pub const WEIGHT_MIN: f64 = 0.10;
/// Upper bound of the learned rule weight.
pub const WEIGHT_MAX: f64 = 0.95;
/// Initial weight for rules without priority metadata.
pub const DEFAULT_WEIGHT: f64 = 0.75;

/// Clamp a weight into the allowed band. Applied at every mutation.
pub fn clamp_weight(weight: f64) -> f64 {
    weight.clamp(WEIGHT_MIN, WEIGHT_MAX)
}

/// Where a rule came from. The engine treats both kinds identically; the
/// field exists for diagnostics and calendar upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    User,
    Calendar,
}

/// A persistent suggestion rule with a learned weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger_condition: TriggerCondition,
    /// Learned trust in this rule, clamped to [WEIGHT_MIN, WEIGHT_MAX].
    pub weight: f64,
    pub is_active: bool,
    pub source: RuleSource,
    /// Set for calendar-derived rules; used to upsert on re-ingestion.
    #[serde(default)]
    pub calendar_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Canonical task-type token for Bayesian slot lookup: the first word of
    /// the rule name, punctuation stripped, lowercased. Deterministic per rule.
    pub fn task_type(&self) -> String {
        let first = self.name.split_whitespace().next().unwrap_or("task");
        let token: String = first
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if token.is_empty() {
            "task".to_string()
        } else {
            token
        }
    }
}

/// Input for creating a rule; the catalog assigns the id and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger_condition: TriggerCondition,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_source")]
    pub source: RuleSource,
    #[serde(default)]
    pub calendar_event_id: Option<String>,
}

fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

fn default_true() -> bool {
    true
}

fn default_source() -> RuleSource {
    RuleSource::User
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_named(name: &str) -> Rule {
        Rule {
            id: 1,
            name: name.to_string(),
            description: String::new(),
            trigger_condition: TriggerCondition::default(),
            weight: DEFAULT_WEIGHT,
            is_active: true,
            source: RuleSource::User,
            calendar_event_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_clamp_weight() {
        assert_eq!(clamp_weight(0.5), 0.5);
        assert_eq!(clamp_weight(1.2), WEIGHT_MAX);
        assert_eq!(clamp_weight(0.0), WEIGHT_MIN);
    }

    #[test]
    fn test_task_type_normalization() {
        assert_eq!(rule_named("Get Fuel").task_type(), "get");
        assert_eq!(rule_named("Gym!").task_type(), "gym");
        assert_eq!(rule_named("  Call   Mom  ").task_type(), "call");
        assert_eq!(rule_named("***").task_type(), "task");
        assert_eq!(rule_named("").task_type(), "task");
    }

    #[test]
    fn test_task_type_is_deterministic() {
        let rule = rule_named("Dentist Appointment");
        assert_eq!(rule.task_type(), rule.task_type());
    }
}
