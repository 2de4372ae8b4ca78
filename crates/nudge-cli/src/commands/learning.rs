//! Learning analytics commands.

use clap::Subcommand;

use crate::common::{open_runtime, CliResult, ContextArgs};

#[derive(Subcommand)]
pub enum LearningAction {
    /// Show learned timing slots, most confident first
    Slots {
        /// Filter by task type
        #[arg(long)]
        task_type: Option<String>,
        /// Filter by context key
        #[arg(long)]
        context_key: Option<String>,
        /// Only show slots with at least this many feedback samples
        #[arg(long, default_value_t = 0)]
        min_evidence: u64,
    },
    /// Explain what has been learned for a task type in a context
    Explain {
        #[arg(long)]
        task_type: String,
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Recent feedback, newest first
    History {
        #[arg(long)]
        rule_id: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Accept/reject rates per rule
    Performance,
}

pub fn run(action: LearningAction) -> CliResult {
    let runtime = open_runtime()?;

    match action {
        LearningAction::Slots {
            task_type,
            context_key,
            min_evidence,
        } => {
            let summary = runtime.learning.learning_summary(
                task_type.as_deref(),
                context_key.as_deref(),
                min_evidence,
            );
            if summary.distributions.is_empty() {
                println!("No learned slots match the filter.");
                return Ok(());
            }
            println!("=== Learned Slots ({}) ===\n", summary.total_distributions);
            for slot in &summary.distributions {
                println!(
                    "{} / {} / {} min: confidence {:.1}% (Beta({:.0}, {:.0}), {} samples)",
                    slot.task_type,
                    slot.context_key,
                    slot.lead_time,
                    slot.confidence * 100.0,
                    slot.alpha,
                    slot.beta,
                    slot.evidence_strength
                );
            }
        }
        LearningAction::Explain { task_type, context } => {
            let snapshot = context.to_snapshot()?;
            let data = runtime.learning.explanation_data(&task_type, &snapshot)?;
            println!("=== Learning for '{}' in {} ===", data.task_type, data.context_key);
            println!(
                "  Recommended: {} min before (confidence {:.1}%)",
                data.recommended_lead_time,
                data.recommended_confidence * 100.0
            );
            println!("  Samples: {}, well trained: {}", data.total_learning_samples, data.well_trained);
            println!();
            for window in &data.windows {
                let marker = if window.well_learned { "*" } else { " " };
                println!(
                    " {marker} {:>3} min: confidence {:.1}% (Beta({:.0}, {:.0}), 95% CI {:.2}-{:.2})",
                    window.lead_time,
                    window.confidence * 100.0,
                    window.alpha,
                    window.beta,
                    window.credible_interval_95.0,
                    window.credible_interval_95.1
                );
            }
        }
        LearningAction::History { rule_id, limit } => {
            let history = runtime.learning.feedback_history(rule_id, limit)?;
            if history.is_empty() {
                println!("No feedback recorded yet.");
                return Ok(());
            }
            println!("=== Feedback History ===\n");
            for entry in &history {
                println!(
                    "{}  rule #{}  {}  ({} min lead)",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.rule_id,
                    entry.outcome,
                    entry.chosen_lead_time
                );
            }
        }
        LearningAction::Performance => {
            let report = runtime.learning.rule_performance()?;
            if report.is_empty() {
                println!("No rules in the catalog.");
                return Ok(());
            }
            println!("=== Rule Performance ===\n");
            for row in &report {
                let status = if row.is_active { "" } else { " [inactive]" };
                println!(
                    "#{} {}{}: weight {:.2}, {} accepted / {} rejected ({:.0}% acceptance)",
                    row.rule_id,
                    row.task_name,
                    status,
                    row.weight,
                    row.accepted,
                    row.rejected,
                    row.acceptance_rate
                );
            }
        }
    }

    Ok(())
}
