//! Bayesian timing optimization.
//!
//! For each `(task_type, context_key, lead_time)` triple the engine keeps a
//! Beta distribution over "the user accepts a notification at this lead
//! time". Evaluation scores every candidate lead time with an
//! upper-confidence-bound rule so that under-sampled lead times still get
//! explored; the final single choice is deferred to the schedule optimizer.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::storage::EngineConfig;

/// Default weight on the uncertainty term of the UCB score.
pub const DEFAULT_EXPLORATION: f64 = 0.5;

/// Identity of one Beta slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub task_type: String,
    pub context_key: String,
    pub lead_time: u32,
}

impl SlotKey {
    pub fn new(task_type: impl Into<String>, context_key: impl Into<String>, lead_time: u32) -> Self {
        Self {
            task_type: task_type.into(),
            context_key: context_key.into(),
            lead_time,
        }
    }
}

/// Beta distribution parameters for one slot.
///
/// Starts at the uniform prior `(1, 1)`; `total_triggers` always equals
/// `alpha + beta - 2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSlot {
    pub alpha: f64,
    pub beta: f64,
    pub total_triggers: u64,
}

impl Default for TimingSlot {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            total_triggers: 0,
        }
    }
}

impl TimingSlot {
    /// Posterior mean of the Beta distribution.
    pub fn confidence(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Uncertainty term: `1 / sqrt(alpha + beta)`.
    pub fn uncertainty(&self) -> f64 {
        1.0 / (self.alpha + self.beta).sqrt()
    }

    /// Upper-confidence-bound score.
    pub fn ucb(&self, exploration: f64) -> f64 {
        self.confidence() + exploration * self.uncertainty()
    }

    /// Feedback samples observed (priors excluded).
    pub fn evidence_strength(&self) -> u64 {
        (self.alpha + self.beta - 2.0).max(0.0) as u64
    }

    /// Fold one feedback sample into the distribution.
    pub fn record(&mut self, accepted: bool) {
        if accepted {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
        self.total_triggers += 1;
    }

    /// Approximate 95% credible interval around the posterior mean, using
    /// the Beta variance.
    pub fn credible_interval_95(&self) -> (f64, f64) {
        let total = self.alpha + self.beta;
        let variance = (self.alpha * self.beta) / (total * total * (total + 1.0));
        let std = variance.sqrt();
        let mean = self.confidence();
        ((mean - 1.96 * std).max(0.0), (mean + 1.96 * std).min(1.0))
    }
}

/// Scores for one candidate lead time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingOptionEval {
    pub lead_time: u32,
    pub confidence: f64,
    pub uncertainty: f64,
    pub ucb: f64,
    pub alpha: f64,
    pub beta: f64,
    pub total_triggers: u64,
    pub evidence_strength: u64,
}

/// Evaluation of every candidate lead time for one `(task_type, context_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingEvaluation {
    pub task_type: String,
    pub context_key: String,
    /// Options in ascending lead-time order.
    pub options: Vec<TimingOptionEval>,
    pub explanation: String,
}

impl TimingEvaluation {
    /// The UCB-best option; ties break toward the smaller lead time.
    pub fn best(&self) -> Option<&TimingOptionEval> {
        let mut best: Option<&TimingOptionEval> = None;
        for option in &self.options {
            match best {
                Some(current) if option.ucb <= current.ucb => {}
                _ => best = Some(option),
            }
        }
        best
    }
}

/// Point-in-time view of the slot store, cloned once per inference call so
/// a feedback applied mid-call can never show through.
#[derive(Debug, Clone)]
pub struct SlotView {
    slots: HashMap<SlotKey, TimingSlot>,
    lead_times: Vec<u32>,
    exploration: f64,
}

impl SlotView {
    /// Look up a slot, falling back to the uniform prior.
    pub fn slot(&self, key: &SlotKey) -> TimingSlot {
        self.slots.get(key).copied().unwrap_or_default()
    }

    /// Score every candidate lead time for one task type and context.
    pub fn evaluate(&self, task_type: &str, context_key: &str) -> TimingEvaluation {
        let options: Vec<TimingOptionEval> = self
            .lead_times
            .iter()
            .map(|&lead_time| {
                let slot = self.slot(&SlotKey::new(task_type, context_key, lead_time));
                TimingOptionEval {
                    lead_time,
                    confidence: slot.confidence(),
                    uncertainty: slot.uncertainty(),
                    ucb: slot.ucb(self.exploration),
                    alpha: slot.alpha,
                    beta: slot.beta,
                    total_triggers: slot.total_triggers,
                    evidence_strength: slot.evidence_strength(),
                }
            })
            .collect();

        let explanation = explain(&options);

        TimingEvaluation {
            task_type: task_type.to_string(),
            context_key: context_key.to_string(),
            options,
            explanation,
        }
    }
}

fn explain(options: &[TimingOptionEval]) -> String {
    let mut best: Option<&TimingOptionEval> = None;
    for option in options {
        match best {
            Some(current) if option.ucb <= current.ucb => {}
            _ => best = Some(option),
        }
    }
    let Some(best) = best else {
        return "No candidate lead times configured".to_string();
    };

    let mut parts = vec![format!(
        "Optimal timing: {} minutes before (confidence {:.0}%)",
        best.lead_time,
        best.confidence * 100.0
    )];

    match best.evidence_strength {
        0 => parts.push("No feedback yet, using prior estimate".to_string()),
        n if n < 5 => parts.push(format!("Limited data ({n} interactions), still learning")),
        n => parts.push(format!("Based on {n} interactions")),
    }

    let runner_up = options
        .iter()
        .filter(|o| o.lead_time != best.lead_time)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
    if let Some(second) = runner_up {
        if (best.confidence - second.confidence).abs() < 0.1 && second.evidence_strength > 0 {
            parts.push(format!(
                "Close alternative: {} minutes (confidence {:.0}%)",
                second.lead_time,
                second.confidence * 100.0
            ));
        }
    }

    parts.join(" • ")
}

/// Concurrent store of Beta slots.
///
/// Slots materialize in memory on first feedback; evaluation reads absent
/// slots as the uniform prior, which is observationally identical.
pub struct TimingOptimizer {
    slots: RwLock<HashMap<SlotKey, TimingSlot>>,
    lead_times: Vec<u32>,
    exploration: f64,
}

impl TimingOptimizer {
    /// Create an empty optimizer with the given candidate set.
    pub fn new(lead_times: Vec<u32>, exploration: f64) -> Self {
        let mut lead_times = lead_times;
        lead_times.sort_unstable();
        lead_times.dedup();
        Self {
            slots: RwLock::new(HashMap::new()),
            lead_times,
            exploration,
        }
    }

    /// Create from configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.normalized_lead_times(), config.exploration_coefficient)
    }

    /// Create pre-populated with persisted slots.
    pub fn with_slots(config: &EngineConfig, slots: HashMap<SlotKey, TimingSlot>) -> Self {
        let optimizer = Self::from_config(config);
        *optimizer.write_guard() = slots;
        optimizer
    }

    pub fn lead_times(&self) -> &[u32] {
        &self.lead_times
    }

    pub fn exploration(&self) -> f64 {
        self.exploration
    }

    /// Clone a point-in-time view of every slot.
    pub fn snapshot(&self) -> SlotView {
        self.snapshot_from(&self.read_guard())
    }

    pub(crate) fn snapshot_from(
        &self,
        guard: &RwLockReadGuard<'_, HashMap<SlotKey, TimingSlot>>,
    ) -> SlotView {
        SlotView {
            slots: (**guard).clone(),
            lead_times: self.lead_times.clone(),
            exploration: self.exploration,
        }
    }

    /// Current value of one slot (uniform prior if never updated).
    pub fn slot(&self, key: &SlotKey) -> TimingSlot {
        self.read_guard().get(key).copied().unwrap_or_default()
    }

    /// All materialized slots, cloned.
    pub fn entries(&self) -> Vec<(SlotKey, TimingSlot)> {
        self.read_guard()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub(crate) fn read_guard(&self) -> RwLockReadGuard<'_, HashMap<SlotKey, TimingSlot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_guard(&self) -> RwLockWriteGuard<'_, HashMap<SlotKey, TimingSlot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}
