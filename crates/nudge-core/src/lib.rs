//! # Nudge Core Library
//!
//! Core engine for context-aware task suggestions. Given a snapshot of the
//! user's situation (activity, motion, connectivity, location, time), the
//! engine scores a catalog of learned rules, attaches Bayesian-optimized
//! notification lead times, and jointly selects one timing per suggestion.
//! Accept/reject feedback continuously adapts both the per-rule trust
//! weights and the per-slot Beta timing parameters.
//!
//! The engine is headless: it takes a context object and a rule catalog and
//! returns suggestions. Delivery, UI, sensors, and calendar parsing live
//! with external callers.
//!
//! ## Key Components
//!
//! - [`extract`]: raw snapshot → categorical features (pure)
//! - [`RuleCatalog`]: typed rule store behind a reader-writer lock
//! - [`TimingOptimizer`]: Beta-slot store with UCB evaluation
//! - [`InferenceEngine`]: compose everything into one inference call
//! - [`ScheduleSearch`]: A* branch-and-bound over candidate × timing
//! - [`LearningService`]: serialized feedback application

pub mod calendar;
pub mod context;
pub mod engine;
pub mod error;
pub mod extract;
pub mod learning;
pub mod rules;
pub mod search;
pub mod storage;
pub mod timing;

pub use calendar::{ingest_events, EventPriority, IngestSummary, ParsedEvent};
pub use context::{ActivityType, ContextSnapshot};
pub use engine::{
    CancelToken, ContextSummary, InferenceEngine, InferenceResponse, OptimizationMode,
    SearchMetadata, Suggestion,
};
pub use error::{CoreError, DatabaseError, Result, ValidationError};
pub use extract::{extract, ActivityState, ExtractedContext, LocationCategory, TimeOfDay};
pub use learning::{
    ExplanationData, FeedbackOutcome, FeedbackReceipt, LearningService, LearningSummary,
    RulePerformance, SlotDelta, SlotSummary, WeightDelta, WindowLearning, ACCEPT_STEP,
    REJECT_STEP,
};
pub use rules::{
    match_rule, Condition, MatchOutcome, NewRule, ParsedTrigger, Rule, RuleCatalog, RuleSource,
    TimeWindow, TriggerCondition, DEFAULT_WEIGHT, WEIGHT_MAX, WEIGHT_MIN,
};
pub use search::{
    greedy_schedule, OptimizationQuality, ScheduleCandidate, ScheduleDecision, ScheduleSearch,
    SearchOutcome, TimingChoice, DEFAULT_MAX_NODES,
};
pub use storage::{Database, EngineConfig, FeedbackEntry, RuleFeedbackCounts};
pub use timing::{
    SlotKey, SlotView, TimingEvaluation, TimingOptimizer, TimingOptionEval, TimingSlot,
    DEFAULT_EXPLORATION,
};
