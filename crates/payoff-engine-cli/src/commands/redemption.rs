use clap::Args;
use serde_json::Value;

use payoff_engine_core::calculate_redemption;
use payoff_engine_core::payoff::RedemptionInput;

use crate::input;

/// Arguments for a closed-form redemption
#[derive(Args)]
pub struct RedemptionArgs {
    /// Path to JSON input file
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_redemption(args: RedemptionArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let req: RedemptionInput = input::file_or_stdin(args.input.as_deref(), "redemption")?;
    let result = calculate_redemption(&req)?;
    Ok(serde_json::to_value(result)?)
}
