//! Feedback learning service.
//!
//! Applies accept/reject feedback to both learned quantities: the rule's
//! trust weight and the Beta parameters of the `(task_type, context_key,
//! lead_time)` slot the notification was delivered under. Feedback
//! application is serialized; all mutations of one call commit together or
//! not at all.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::ContextSnapshot;
use crate::error::{CoreError, Result};
use crate::extract::extract;
use crate::rules::{clamp_weight, RuleCatalog};
use crate::storage::{Database, FeedbackEntry};
use crate::timing::{SlotKey, TimingOptimizer, TimingSlot};

/// Weight added on an accepted suggestion.
pub const ACCEPT_STEP: f64 = 0.05;
/// Weight removed on a rejected suggestion. Deliberately steeper than the
/// accept step.
pub const REJECT_STEP: f64 = 0.10;

/// Slots with at least this many samples count as well learned.
const WELL_LEARNED_SAMPLES: u64 = 5;

/// User verdict on a delivered suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackOutcome {
    Accept,
    Reject,
}

impl FeedbackOutcome {
    /// Parse a wire token; both bare and past-tense forms are accepted.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "accept" | "accepted" => Some(FeedbackOutcome::Accept),
            "reject" | "rejected" => Some(FeedbackOutcome::Reject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackOutcome::Accept => "accept",
            FeedbackOutcome::Reject => "reject",
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, FeedbackOutcome::Accept)
    }
}

/// Weight before and after one feedback application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightDelta {
    pub old: f64,
    pub new: f64,
}

/// Slot state after one feedback application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlotDelta {
    pub alpha: f64,
    pub beta: f64,
    pub total_triggers: u64,
    pub old_confidence: f64,
    pub new_confidence: f64,
}

/// What one feedback application changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackReceipt {
    pub rule_id: i64,
    pub task_type: String,
    pub context_key: String,
    pub chosen_lead_time: u32,
    pub outcome: FeedbackOutcome,
    pub rule_weight: WeightDelta,
    pub slot: SlotDelta,
    pub explanation: String,
}

/// Summary of one learned slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSummary {
    pub task_type: String,
    pub context_key: String,
    pub lead_time: u32,
    pub confidence: f64,
    pub uncertainty: f64,
    pub alpha: f64,
    pub beta: f64,
    pub evidence_strength: u64,
    pub total_triggers: u64,
}

/// All learned slots matching a filter, most confident first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSummary {
    pub total_distributions: usize,
    pub distributions: Vec<SlotSummary>,
}

/// Learned state of one candidate lead time for explanation purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowLearning {
    pub lead_time: u32,
    pub confidence: f64,
    pub alpha: f64,
    pub beta: f64,
    pub evidence_strength: u64,
    pub credible_interval_95: (f64, f64),
    pub well_learned: bool,
}

/// What the system has learned about one task type in one context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationData {
    pub task_type: String,
    pub context_key: String,
    pub recommended_lead_time: u32,
    pub recommended_confidence: f64,
    pub windows: Vec<WindowLearning>,
    pub total_learning_samples: u64,
    pub well_trained: bool,
}

/// Accept/reject record of one rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulePerformance {
    pub rule_id: i64,
    pub task_name: String,
    pub weight: f64,
    pub is_active: bool,
    pub accepted: u64,
    pub rejected: u64,
    /// Percent of feedback that was positive; 0 with no feedback.
    pub acceptance_rate: f64,
}

/// The learning service.
pub struct LearningService {
    catalog: Arc<RuleCatalog>,
    timing: Arc<TimingOptimizer>,
    db: Arc<Database>,
    gate: Mutex<()>,
}

impl LearningService {
    pub fn new(catalog: Arc<RuleCatalog>, timing: Arc<TimingOptimizer>, db: Arc<Database>) -> Self {
        Self {
            catalog,
            timing,
            db,
            gate: Mutex::new(()),
        }
    }

    /// Apply one feedback record.
    ///
    /// Persists first, then commits both in-memory stores under their write
    /// locks; a persistence failure after the internal retry leaves the
    /// in-memory state exactly as it was.
    pub fn apply_feedback(
        &self,
        rule_id: i64,
        outcome: FeedbackOutcome,
        context_snapshot: &ContextSnapshot,
        chosen_lead_time: u32,
    ) -> Result<FeedbackReceipt> {
        let _serialized = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

        context_snapshot.validate()?;
        let ec = extract(context_snapshot);
        let context_key = ec.context_key();

        let rule = self
            .catalog
            .get(rule_id)
            .filter(|r| r.is_active)
            .ok_or(CoreError::RuleNotFound(rule_id))?;
        let task_type = rule.task_type();

        let old_weight = rule.weight;
        let step = if outcome.is_accept() {
            ACCEPT_STEP
        } else {
            -REJECT_STEP
        };
        let new_weight = clamp_weight(old_weight + step);

        let key = SlotKey::new(task_type.clone(), context_key.clone(), chosen_lead_time);
        let old_slot = self.timing.slot(&key);
        let mut new_slot = old_slot;
        new_slot.record(outcome.is_accept());

        let now = Utc::now();
        let snapshot_value = serde_json::to_value(context_snapshot)?;
        self.db
            .persist_feedback(
                rule_id,
                new_weight,
                &key,
                &new_slot,
                outcome.as_str(),
                &snapshot_value,
                now,
            )
            .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

        // Commit both stores under their write locks so no reader observes
        // the weight change without the slot change.
        {
            let mut rules = self.catalog.write_guard();
            let mut slots = self.timing.write_guard();
            if let Some(stored) = rules.get_mut(&rule_id) {
                stored.weight = new_weight;
                stored.updated_at = now;
            }
            slots.insert(key, new_slot);
        }

        debug!(
            rule_id,
            outcome = outcome.as_str(),
            old_weight,
            new_weight,
            lead_time = chosen_lead_time,
            "feedback applied"
        );

        let slot_delta = SlotDelta {
            alpha: new_slot.alpha,
            beta: new_slot.beta,
            total_triggers: new_slot.total_triggers,
            old_confidence: old_slot.confidence(),
            new_confidence: new_slot.confidence(),
        };

        let explanation = explain_update(&context_key, outcome, &slot_delta);

        Ok(FeedbackReceipt {
            rule_id,
            task_type,
            context_key,
            chosen_lead_time,
            outcome,
            rule_weight: WeightDelta {
                old: old_weight,
                new: new_weight,
            },
            slot: slot_delta,
            explanation,
        })
    }

    /// All materialized slots matching the filter, most confident first.
    pub fn learning_summary(
        &self,
        task_type: Option<&str>,
        context_key: Option<&str>,
        min_evidence: u64,
    ) -> LearningSummary {
        let mut distributions: Vec<SlotSummary> = self
            .timing
            .entries()
            .into_iter()
            .filter(|(key, slot)| {
                task_type.is_none_or(|t| key.task_type == t)
                    && context_key.is_none_or(|c| key.context_key == c)
                    && slot.evidence_strength() >= min_evidence
            })
            .map(|(key, slot)| SlotSummary {
                task_type: key.task_type,
                context_key: key.context_key,
                lead_time: key.lead_time,
                confidence: slot.confidence(),
                uncertainty: slot.uncertainty(),
                alpha: slot.alpha,
                beta: slot.beta,
                evidence_strength: slot.evidence_strength(),
                total_triggers: slot.total_triggers,
            })
            .collect();

        distributions.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.lead_time.cmp(&b.lead_time))
        });

        LearningSummary {
            total_distributions: distributions.len(),
            distributions,
        }
    }

    /// What the system has learned about a task type in the given context.
    pub fn explanation_data(
        &self,
        task_type: &str,
        context_snapshot: &ContextSnapshot,
    ) -> Result<ExplanationData> {
        context_snapshot.validate()?;
        let context_key = extract(context_snapshot).context_key();

        let windows: Vec<WindowLearning> = self
            .timing
            .lead_times()
            .iter()
            .map(|&lead_time| {
                let slot = self
                    .timing
                    .slot(&SlotKey::new(task_type, context_key.clone(), lead_time));
                window_learning(lead_time, slot)
            })
            .collect();

        let best = windows
            .iter()
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then_with(|| b.lead_time.cmp(&a.lead_time))
            })
            .cloned();

        let total_learning_samples = windows.iter().map(|w| w.evidence_strength).sum();
        let well_trained = windows.iter().any(|w| w.well_learned);

        let (recommended_lead_time, recommended_confidence) = best
            .map(|w| (w.lead_time, w.confidence))
            .unwrap_or((0, 0.0));

        Ok(ExplanationData {
            task_type: task_type.to_string(),
            context_key,
            recommended_lead_time,
            recommended_confidence,
            windows,
            total_learning_samples,
            well_trained,
        })
    }

    /// Recent feedback records, newest first.
    pub fn feedback_history(
        &self,
        rule_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<FeedbackEntry>> {
        Ok(self.db.feedback_history(rule_id, limit)?)
    }

    /// Accept/reject tallies per rule, best acceptance rate first.
    pub fn rule_performance(&self) -> Result<Vec<RulePerformance>> {
        let counts = self.db.feedback_counts()?;
        let mut report: Vec<RulePerformance> = self
            .catalog
            .list()
            .into_iter()
            .map(|rule| {
                let tallies = counts.iter().find(|c| c.rule_id == rule.id);
                let accepted = tallies.map(|c| c.accepted).unwrap_or(0);
                let rejected = tallies.map(|c| c.rejected).unwrap_or(0);
                let total = accepted + rejected;
                let acceptance_rate = if total > 0 {
                    accepted as f64 / total as f64 * 100.0
                } else {
                    0.0
                };
                RulePerformance {
                    rule_id: rule.id,
                    task_name: rule.name,
                    weight: rule.weight,
                    is_active: rule.is_active,
                    accepted,
                    rejected,
                    acceptance_rate,
                }
            })
            .collect();

        report.sort_by(|a, b| {
            b.acceptance_rate
                .total_cmp(&a.acceptance_rate)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        Ok(report)
    }
}

fn window_learning(lead_time: u32, slot: TimingSlot) -> WindowLearning {
    WindowLearning {
        lead_time,
        confidence: slot.confidence(),
        alpha: slot.alpha,
        beta: slot.beta,
        evidence_strength: slot.evidence_strength(),
        credible_interval_95: slot.credible_interval_95(),
        well_learned: slot.evidence_strength() >= WELL_LEARNED_SAMPLES,
    }
}

fn explain_update(context_key: &str, outcome: FeedbackOutcome, slot: &SlotDelta) -> String {
    let action = if outcome.is_accept() {
        "accepted"
    } else {
        "rejected"
    };
    let direction = if slot.new_confidence > slot.old_confidence {
        "increased"
    } else {
        "decreased"
    };

    let mut parts = vec![
        format!(
            "You {action} the notification in context {}.",
            context_key.replace('_', " ")
        ),
        format!(
            "Confidence {direction} from {:.1}% to {:.1}%.",
            slot.old_confidence * 100.0,
            slot.new_confidence * 100.0
        ),
    ];

    match slot.total_triggers {
        1 => parts.push("This is the first feedback for this context.".to_string()),
        n if n < WELL_LEARNED_SAMPLES => {
            parts.push(format!("Based on {n} samples, still learning."))
        }
        n => parts.push(format!("Based on {n} samples, well calibrated.")),
    }

    parts.push(format!(
        "Distribution: Beta({:.0}, {:.0}).",
        slot.alpha, slot.beta
    ));
    parts.join(" ")
}
