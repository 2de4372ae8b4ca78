//! Feedback commands.

use clap::Subcommand;

use nudge_core::FeedbackOutcome;

use crate::common::{open_runtime, CliResult, ContextArgs};

#[derive(Subcommand)]
pub enum FeedbackAction {
    /// Record the user's verdict on a delivered suggestion
    Submit {
        /// Rule the suggestion came from
        #[arg(long)]
        rule_id: i64,
        /// accept or reject
        #[arg(long)]
        outcome: String,
        /// Lead time the notification used, in minutes
        #[arg(long)]
        lead_time: u32,
        #[command(flatten)]
        context: ContextArgs,
    },
}

pub fn run(action: FeedbackAction) -> CliResult {
    match action {
        FeedbackAction::Submit {
            rule_id,
            outcome,
            lead_time,
            context,
        } => {
            let outcome = FeedbackOutcome::parse(&outcome)
                .ok_or_else(|| format!("invalid outcome '{outcome}', use accept or reject"))?;
            let snapshot = context.to_snapshot()?;

            let runtime = open_runtime()?;
            let receipt = runtime
                .learning
                .apply_feedback(rule_id, outcome, &snapshot, lead_time)?;

            println!("=== Feedback Applied ===");
            println!(
                "  Rule #{} weight: {:.2} -> {:.2}",
                receipt.rule_id, receipt.rule_weight.old, receipt.rule_weight.new
            );
            println!(
                "  Slot ({}, {}, {} min): Beta({:.0}, {:.0}), confidence {:.1}% -> {:.1}%",
                receipt.task_type,
                receipt.context_key,
                receipt.chosen_lead_time,
                receipt.slot.alpha,
                receipt.slot.beta,
                receipt.slot.old_confidence * 100.0,
                receipt.slot.new_confidence * 100.0
            );
            println!("  {}", receipt.explanation);
        }
    }

    Ok(())
}
