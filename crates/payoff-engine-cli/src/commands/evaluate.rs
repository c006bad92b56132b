use chrono::NaiveDate;
use clap::Args;
use serde_json::Value;

use payoff_engine_core::evaluation::{Clock, FixedClock, InMemoryMarketData, SystemClock};
use payoff_engine_core::{generate_report, EngineConfig, Product};

use crate::input;

/// Arguments for a full product evaluation
#[derive(Args)]
pub struct EvaluateArgs {
    /// Path to the product definition (JSON)
    #[arg(long)]
    pub product: String,

    /// Path to frozen market data (JSON quotes and closes)
    #[arg(long)]
    pub market: Option<String>,

    /// Evaluation date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub as_of: Option<NaiveDate>,

    /// Engine config file (.yaml/.yml or JSON)
    #[arg(long)]
    pub config: Option<String>,
}

pub fn run_evaluate(args: EvaluateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let product: Product = input::file::read_json(&args.product)?;
    let market: InMemoryMarketData = match args.market {
        Some(ref path) => input::file::read_json(path)?,
        None => {
            log::warn!("no --market file, evaluating without market data");
            InMemoryMarketData::new()
        }
    };
    let config = match args.config {
        Some(ref path) => input::file::read_config(path)?,
        None => EngineConfig::default(),
    };

    // A pinned date also pins the clock, so the report is reproducible.
    let report = match args.as_of {
        Some(as_of) => {
            let clock = FixedClock::at_date(as_of);
            generate_report(&product, &market, as_of, &config, &clock, None)?
        }
        None => {
            let clock = SystemClock;
            let today = clock.now().date_naive();
            generate_report(&product, &market, today, &config, &clock, None)?
        }
    };
    Ok(serde_json::to_value(report)?)
}
