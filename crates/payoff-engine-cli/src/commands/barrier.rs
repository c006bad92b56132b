use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use payoff_engine_core::barrier::{classify, classify_upper};

/// Arguments for barrier classification
#[derive(Args)]
pub struct ClassifyArgs {
    /// Current performance in percent (e.g. -25 for a 25% fall)
    #[arg(long, allow_hyphen_values = true)]
    pub performance: Decimal,

    /// Barrier level as a percentage of initial notional (e.g. 70)
    #[arg(long)]
    pub barrier: Decimal,

    /// Treat the barrier as an upside knock-out level
    #[arg(long)]
    pub upper: bool,
}

pub fn run_classify(args: ClassifyArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let proximity = if args.upper {
        classify_upper(args.performance, args.barrier)?
    } else {
        classify(args.performance, args.barrier)?
    };
    Ok(serde_json::to_value(proximity)?)
}
