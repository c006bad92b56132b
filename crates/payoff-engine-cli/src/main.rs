mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::basket::AggregateArgs;
use commands::barrier::ClassifyArgs;
use commands::evaluate::EvaluateArgs;
use commands::redemption::RedemptionArgs;

/// Structured-product payoff evaluation
#[derive(Parser)]
#[command(
    name = "spe",
    version,
    about = "Structured-product payoff evaluation",
    long_about = "Evaluates structured products against market data with decimal \
                  precision: basket performance, barrier status, memory coupons, \
                  autocall locks and redemption amounts as a percentage of notional."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the full evaluation report for a product
    Evaluate(EvaluateArgs),
    /// Closed-form redemption from a template and known performances
    Redemption(RedemptionArgs),
    /// Classify a performance against a barrier level
    Classify(ClassifyArgs),
    /// Aggregate underlying performances into a basket performance
    Aggregate(AggregateArgs),
    /// List the registered payoff templates
    Templates,
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Evaluate(args) => commands::evaluate::run_evaluate(args),
        Commands::Redemption(args) => commands::redemption::run_redemption(args),
        Commands::Classify(args) => commands::barrier::run_classify(args),
        Commands::Aggregate(args) => commands::basket::run_aggregate(args),
        Commands::Templates => commands::templates::run_templates(),
        Commands::Version => {
            println!("spe {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
