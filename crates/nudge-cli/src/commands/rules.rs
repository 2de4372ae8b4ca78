//! Rule catalog commands.

use clap::Subcommand;

use nudge_core::{NewRule, RuleSource, TriggerCondition, DEFAULT_WEIGHT};

use crate::common::{open_runtime, CliResult};

#[derive(Subcommand)]
pub enum RulesAction {
    /// List rules (active only by default)
    List {
        /// Include deactivated rules
        #[arg(long)]
        all: bool,
    },
    /// Show one rule in full
    Show {
        id: i64,
    },
    /// Create a rule
    Create {
        /// Task name (also determines the timing task type)
        #[arg(long)]
        name: String,
        /// Display description
        #[arg(long, default_value = "")]
        description: String,
        /// Trigger condition as a JSON object
        #[arg(long)]
        condition: String,
        /// Initial weight
        #[arg(long, default_value_t = DEFAULT_WEIGHT)]
        weight: f64,
    },
    /// Retire a rule; it is never evaluated again
    Deactivate {
        id: i64,
    },
}

pub fn run(action: RulesAction) -> CliResult {
    let runtime = open_runtime()?;

    match action {
        RulesAction::List { all } => {
            let rules = if all {
                runtime.catalog.list()
            } else {
                runtime.catalog.active_snapshot()
            };

            if rules.is_empty() {
                println!("No rules in the catalog.");
                return Ok(());
            }

            println!("=== Rules ===\n");
            for rule in rules {
                let status = if rule.is_active { "" } else { " [inactive]" };
                println!("#{} {} (weight {:.2}){status}", rule.id, rule.name, rule.weight);
                println!(
                    "   trigger: {}",
                    serde_json::to_string(&rule.trigger_condition)?
                );
            }
        }
        RulesAction::Show { id } => match runtime.catalog.get(id) {
            Some(rule) => println!("{}", serde_json::to_string_pretty(&rule)?),
            None => println!("Rule {id} not found."),
        },
        RulesAction::Create {
            name,
            description,
            condition,
            weight,
        } => {
            let trigger_condition: TriggerCondition = serde_json::from_str(&condition)
                .map_err(|e| format!("invalid --condition JSON: {e}"))?;
            let rule = runtime.catalog.create(NewRule {
                name,
                description,
                trigger_condition,
                weight,
                is_active: true,
                source: RuleSource::User,
                calendar_event_id: None,
            })?;
            println!("Created rule #{} '{}' (weight {:.2})", rule.id, rule.name, rule.weight);
        }
        RulesAction::Deactivate { id } => {
            runtime.catalog.deactivate(id)?;
            println!("Rule #{id} deactivated.");
        }
    }

    Ok(())
}
