use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Percentages in percent units (12.5 = 12.5%), never fractions.
pub type Percent = Decimal;

/// Prices in the underlying's quote currency.
pub type Price = Decimal;

/// Basket weights in percent units; a full basket sums to 100.
pub type Weight = Decimal;

pub(crate) const HUNDRED: Decimal = dec!(100);

/// Converts a level quoted as a percentage of initial notional into
/// performance space (70 -> -30).
pub fn level_to_threshold(level: Percent) -> Percent {
    level - HUNDRED
}

/// Computes `(price - reference) / reference * 100`. A zero or negative
/// reference is an input error, never a zero performance.
pub fn performance_pct(reference: Price, price: Price) -> Option<Percent> {
    if reference <= Decimal::ZERO {
        return None;
    }
    Some((price - reference) / reference * HUNDRED)
}

/// One daily close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: Price,
}

/// Where an evaluation price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Live,
    LastClose,
    Redemption,
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}
