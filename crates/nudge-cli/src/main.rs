use clap::{Parser, Subcommand};

mod commands;
mod common;

#[derive(Parser)]
#[command(name = "nudge", version, about = "Context-aware task suggestion engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run inference against a context snapshot
    Infer(commands::infer::InferArgs),
    /// Rule catalog management
    Rules {
        #[command(subcommand)]
        action: commands::rules::RulesAction,
    },
    /// Submit accept/reject feedback
    Feedback {
        #[command(subcommand)]
        action: commands::feedback::FeedbackAction,
    },
    /// Calendar event ingestion
    Calendar {
        #[command(subcommand)]
        action: commands::calendar::CalendarAction,
    },
    /// Learning analytics
    Learning {
        #[command(subcommand)]
        action: commands::learning::LearningAction,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Infer(args) => commands::infer::run(args),
        Commands::Rules { action } => commands::rules::run(action),
        Commands::Feedback { action } => commands::feedback::run(action),
        Commands::Calendar { action } => commands::calendar::run(action),
        Commands::Learning { action } => commands::learning::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
