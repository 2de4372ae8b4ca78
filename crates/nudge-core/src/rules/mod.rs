//! Task rules: the persistent patterns that map context conditions to
//! reminder suggestions.

pub mod catalog;
pub mod condition;
pub mod matcher;
pub mod rule;

pub use catalog::RuleCatalog;
pub use condition::{Condition, ParsedTrigger, TimeWindow, TriggerCondition};
pub use matcher::{match_rule, MatchOutcome};
pub use rule::{clamp_weight, NewRule, Rule, RuleSource, DEFAULT_WEIGHT, WEIGHT_MAX, WEIGHT_MIN};
