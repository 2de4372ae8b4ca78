//! Calendar ingestion command.

use clap::Subcommand;

use nudge_core::{ingest_events, ParsedEvent};

use crate::common::{open_runtime, CliResult};

#[derive(Subcommand)]
pub enum CalendarAction {
    /// Ingest parsed events from a JSON file (array of events)
    Ingest {
        file: String,
    },
}

pub fn run(action: CalendarAction) -> CliResult {
    match action {
        CalendarAction::Ingest { file } => {
            let content = std::fs::read_to_string(&file)?;
            let events: Vec<ParsedEvent> = serde_json::from_str(&content)
                .map_err(|e| format!("invalid events file: {e}"))?;

            let runtime = open_runtime()?;
            let summary = ingest_events(&runtime.catalog, &events)?;

            println!("=== Calendar Ingestion ===");
            println!("  Events processed: {}", events.len());
            println!("  Rules created:    {}", summary.created);
            println!("  Rules updated:    {}", summary.updated);
            println!("  Rules generated:  {}", summary.rules_generated);
        }
    }

    Ok(())
}
