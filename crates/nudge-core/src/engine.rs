//! Inference engine.
//!
//! Composes the context extractor, rule catalog, matcher, and timing
//! optimizer into one operation: given a raw snapshot, return ranked task
//! suggestions with chosen notification lead times. Multiple inference
//! calls may run in parallel; each works on a consistent snapshot of the
//! catalog and slot store taken at the start of the call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::{ActivityType, ContextSnapshot};
use crate::error::Result;
use crate::extract::{extract, ExtractedContext, LocationCategory, TimeOfDay};
use crate::rules::{match_rule, MatchOutcome, Rule, RuleCatalog};
use crate::search::{
    OptimizationQuality, ScheduleCandidate, ScheduleSearch, SearchOutcome, TimingChoice,
};
use crate::storage::{Database, EngineConfig};
use crate::timing::{TimingEvaluation, TimingOptimizer, TimingOptionEval};

/// Cooperative cancellation flag. The engine checks it between rule
/// evaluations and at every search pop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How the lead times in a response were selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationMode {
    #[serde(rename = "greedy")]
    Greedy,
    #[serde(rename = "A* search")]
    AStarSearch,
}

impl std::fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizationMode::Greedy => write!(f, "greedy"),
            OptimizationMode::AStarSearch => write!(f, "A* search"),
        }
    }
}

/// Metadata of one schedule search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub total_expected_reward: f64,
    pub nodes_explored: u64,
    pub search_time_ms: f64,
    pub search_completed: bool,
    pub optimization_quality: OptimizationQuality,
}

impl From<&SearchOutcome> for SearchMetadata {
    fn from(outcome: &SearchOutcome) -> Self {
        Self {
            total_expected_reward: outcome.total_expected_reward,
            nodes_explored: outcome.nodes_explored,
            search_time_ms: outcome.search_time_ms,
            search_completed: outcome.search_completed,
            optimization_quality: outcome.optimization_quality,
        }
    }
}

/// One suggested task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub rule_id: i64,
    pub task_name: String,
    pub task_description: String,
    /// `base_score × rule weight`; always at or above the threshold.
    pub suggestion_score: f64,
    pub base_score: f64,
    pub reasoning: String,
    pub matched_conditions: std::collections::BTreeMap<String, serde_json::Value>,
    pub timing_options: Vec<TimingOptionEval>,
    pub chosen_lead_time: u32,
    pub timing_confidence: f64,
}

/// Compact description of the evaluated context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub activity: ActivityType,
    pub location_category: LocationCategory,
    pub time_of_day: TimeOfDay,
    pub car_connected: bool,
    pub wifi: String,
    pub optimization_mode: OptimizationMode,
}

/// Result of one inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub context_summary: ContextSummary,
    /// Ranked by suggestion score, highest first.
    pub suggested_tasks: Vec<Suggestion>,
    pub total_rules_evaluated: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchMetadata>,
}

struct Candidate {
    rule: Rule,
    outcome: MatchOutcome,
    suggestion_score: f64,
    evaluation: TimingEvaluation,
}

/// The suggestion engine.
pub struct InferenceEngine {
    catalog: Arc<RuleCatalog>,
    timing: Arc<TimingOptimizer>,
    db: Arc<Database>,
    config: EngineConfig,
}

impl InferenceEngine {
    pub fn new(
        catalog: Arc<RuleCatalog>,
        timing: Arc<TimingOptimizer>,
        db: Arc<Database>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            timing,
            db,
            config,
        }
    }

    /// Run one inference call with a fresh (never cancelled) token.
    pub fn infer(
        &self,
        snapshot: &ContextSnapshot,
        enable_search: bool,
    ) -> Result<InferenceResponse> {
        self.infer_with_cancel(snapshot, enable_search, &CancelToken::new())
    }

    /// Run one inference call. Callers enforce deadlines by cancelling the
    /// token; there is no internal timeout.
    pub fn infer_with_cancel(
        &self,
        snapshot: &ContextSnapshot,
        enable_search: bool,
        cancel: &CancelToken,
    ) -> Result<InferenceResponse> {
        snapshot.validate()?;
        let ec = extract(snapshot);

        self.audit(snapshot);

        // Consistent snapshot of both stores: taking the catalog and slot
        // read guards together excludes a feedback commit landing between
        // the two reads.
        let (rules, slots) = {
            let catalog_guard = self.catalog.read_guard();
            let slot_guard = self.timing.read_guard();
            let rules: Vec<Rule> = catalog_guard
                .values()
                .filter(|r| r.is_active)
                .cloned()
                .collect();
            (rules, self.timing.snapshot_from(&slot_guard))
        };
        let total_rules_evaluated = rules.len();
        let context_key = ec.context_key();

        let mut candidates = Vec::new();
        for rule in rules {
            if cancel.is_cancelled() {
                return Err(crate::error::CoreError::Cancelled);
            }

            let outcome = match_rule(&rule, &ec);
            if outcome.recognized == 0 {
                debug!(
                    rule_id = rule.id,
                    rule = %rule.name,
                    "suppressed: no recognized trigger conditions"
                );
                continue;
            }

            let suggestion_score = outcome.base_score * rule.weight;
            if suggestion_score < self.config.suggestion_threshold {
                debug!(
                    rule_id = rule.id,
                    rule = %rule.name,
                    score = suggestion_score,
                    threshold = self.config.suggestion_threshold,
                    "suppressed: suggestion score below threshold"
                );
                continue;
            }

            let evaluation = slots.evaluate(&rule.task_type(), &context_key);
            candidates.push(Candidate {
                rule,
                outcome,
                suggestion_score,
                evaluation,
            });
        }

        let mode = if enable_search {
            OptimizationMode::AStarSearch
        } else {
            OptimizationMode::Greedy
        };

        let (mut suggested_tasks, search) = if enable_search {
            self.optimize(candidates, cancel)?
        } else {
            (
                candidates.into_iter().filter_map(finalize_greedy).collect(),
                None,
            )
        };

        suggested_tasks.sort_by(|a, b| {
            b.suggestion_score
                .total_cmp(&a.suggestion_score)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });

        Ok(InferenceResponse {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            context_summary: summarize(&ec, snapshot, mode),
            suggested_tasks,
            total_rules_evaluated,
            search,
        })
    }

    /// Jointly optimize lead times across all candidates.
    fn optimize(
        &self,
        candidates: Vec<Candidate>,
        cancel: &CancelToken,
    ) -> Result<(Vec<Suggestion>, Option<SearchMetadata>)> {
        if candidates.is_empty() {
            return Ok((Vec::new(), None));
        }

        let search_input: Vec<ScheduleCandidate> = candidates
            .iter()
            .map(|c| ScheduleCandidate {
                rule_id: c.rule.id,
                title: c.rule.name.clone(),
                options: c
                    .evaluation
                    .options
                    .iter()
                    .map(|o| TimingChoice {
                        lead_time: o.lead_time,
                        expected_reward: c.suggestion_score * o.confidence,
                        confidence: o.confidence,
                    })
                    .collect(),
            })
            .collect();

        let outcome =
            ScheduleSearch::new(self.config.max_search_nodes).run(&search_input, cancel)?;
        let metadata = SearchMetadata::from(&outcome);

        let mut suggestions = Vec::new();
        for (candidate, decision) in candidates.into_iter().zip(&outcome.schedule) {
            match decision.lead_time {
                Some(lead_time) => {
                    let confidence = candidate
                        .evaluation
                        .options
                        .iter()
                        .find(|o| o.lead_time == lead_time)
                        .map(|o| o.confidence)
                        .unwrap_or(0.0);
                    suggestions.push(finalize(candidate, lead_time, confidence));
                }
                None => {
                    debug!(
                        rule_id = candidate.rule.id,
                        rule = %candidate.rule.name,
                        "suppressed: schedule optimizer skipped candidate"
                    );
                }
            }
        }

        Ok((suggestions, Some(metadata)))
    }

    /// Append the raw snapshot to the audit trail. An audit miss never
    /// fails an otherwise valid inference.
    fn audit(&self, snapshot: &ContextSnapshot) {
        match serde_json::to_value(snapshot) {
            Ok(value) => {
                if let Err(err) = self.db.append_context(snapshot.timestamp, &value) {
                    warn!(%err, "context audit write failed");
                }
            }
            Err(err) => warn!(%err, "context snapshot not serializable for audit"),
        }
    }
}

fn finalize(candidate: Candidate, chosen_lead_time: u32, timing_confidence: f64) -> Suggestion {
    let reasoning = format!(
        "{} | {}",
        candidate.outcome.reasoning(),
        candidate.evaluation.explanation
    );
    Suggestion {
        rule_id: candidate.rule.id,
        task_name: candidate.rule.name,
        task_description: candidate.rule.description,
        suggestion_score: candidate.suggestion_score,
        base_score: candidate.outcome.base_score,
        reasoning,
        matched_conditions: candidate.outcome.matched_conditions,
        timing_options: candidate.evaluation.options,
        chosen_lead_time,
        timing_confidence,
    }
}

fn finalize_greedy(candidate: Candidate) -> Option<Suggestion> {
    let best = candidate.evaluation.best()?;
    let (lead_time, confidence) = (best.lead_time, best.confidence);
    Some(finalize(candidate, lead_time, confidence))
}

fn summarize(
    ec: &ExtractedContext,
    snapshot: &ContextSnapshot,
    mode: OptimizationMode,
) -> ContextSummary {
    ContextSummary {
        activity: ec.activity,
        location_category: ec.location_category,
        time_of_day: ec.time_of_day,
        car_connected: ec.car_connected,
        wifi: snapshot.wifi_state().to_string(),
        optimization_mode: mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimization_mode_wire_format() {
        assert_eq!(
            serde_json::to_string(&OptimizationMode::AStarSearch).unwrap(),
            "\"A* search\""
        );
        assert_eq!(
            serde_json::to_string(&OptimizationMode::Greedy).unwrap(),
            "\"greedy\""
        );
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
