//! Inference command.

use clap::Args;

use crate::common::{open_runtime, CliResult, ContextArgs};

#[derive(Args)]
pub struct InferArgs {
    #[command(flatten)]
    pub context: ContextArgs,
    /// Skip joint optimization and pick lead times per suggestion
    #[arg(long)]
    pub greedy: bool,
    /// Print the raw JSON response
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: InferArgs) -> CliResult {
    let runtime = open_runtime()?;
    let snapshot = args.context.to_snapshot()?;
    let response = runtime.engine.infer(&snapshot, !args.greedy)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("=== Context ===");
    println!("  Activity:  {:?}", response.context_summary.activity);
    println!("  Location:  {:?}", response.context_summary.location_category);
    println!("  Time:      {:?}", response.context_summary.time_of_day);
    println!("  Car BT:    {}", response.context_summary.car_connected);
    println!("  WiFi:      {}", response.context_summary.wifi);
    println!("  Mode:      {}", response.context_summary.optimization_mode);
    println!("  Rules evaluated: {}", response.total_rules_evaluated);
    println!();

    if response.suggested_tasks.is_empty() {
        println!("No suggestions for this context.");
        return Ok(());
    }

    println!("=== Suggestions ===\n");
    for (i, suggestion) in response.suggested_tasks.iter().enumerate() {
        println!(
            "{}. {} (score {:.2})",
            i + 1,
            suggestion.task_name,
            suggestion.suggestion_score
        );
        if !suggestion.task_description.is_empty() {
            println!("   {}", suggestion.task_description);
        }
        println!(
            "   Notify {} min before (confidence {:.0}%)",
            suggestion.chosen_lead_time,
            suggestion.timing_confidence * 100.0
        );
        println!("   Why: {}", suggestion.reasoning);
        println!();
    }

    if let Some(search) = &response.search {
        println!("Search: {:?}", search.optimization_quality);
        println!(
            "  reward {:.3}, {} nodes, {:.2} ms, completed: {}",
            search.total_expected_reward,
            search.nodes_explored,
            search.search_time_ms,
            search.search_completed
        );
    }

    Ok(())
}
