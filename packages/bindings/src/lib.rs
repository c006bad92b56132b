use std::str::FromStr;

use chrono::NaiveDate;
use napi::Result as NapiResult;
use napi_derive::napi;
use rust_decimal::Decimal;

use payoff_engine_core::evaluation::{FixedClock, InMemoryMarketData};
use payoff_engine_core::{EngineConfig, Product};

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

fn parse_decimal(field: &str, raw: &str) -> NapiResult<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| to_napi_error(format!("{field}: '{raw}' is not a decimal ({e})")))
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Full evaluation report. `asOf` is `YYYY-MM-DD` and also pins the clock,
/// so identical inputs give identical JSON.
#[napi]
pub fn generate_report(
    product_json: String,
    market_json: String,
    as_of: String,
    config_json: Option<String>,
) -> NapiResult<String> {
    let product: Product = serde_json::from_str(&product_json).map_err(to_napi_error)?;
    let market: InMemoryMarketData = serde_json::from_str(&market_json).map_err(to_napi_error)?;
    let config = match config_json {
        Some(json) => EngineConfig::from_json(&json).map_err(to_napi_error)?,
        None => EngineConfig::default(),
    };
    let as_of = NaiveDate::parse_from_str(as_of.trim(), "%Y-%m-%d").map_err(to_napi_error)?;
    let clock = FixedClock::at_date(as_of);
    let report = payoff_engine_core::generate_report(&product, &market, as_of, &config, &clock, None)
        .map_err(to_napi_error)?;
    serde_json::to_string(&report).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Payoff
// ---------------------------------------------------------------------------

#[napi]
pub fn calculate_redemption(input_json: String) -> NapiResult<String> {
    let input: payoff_engine_core::payoff::RedemptionInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = payoff_engine_core::calculate_redemption(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn list_templates() -> NapiResult<String> {
    let registry = payoff_engine_core::payoff::TemplateRegistry::default();
    let specs: Vec<_> = registry.specs().collect();
    serde_json::to_string(&specs).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Barriers
// ---------------------------------------------------------------------------

/// Decimals travel as strings to keep their precision across the boundary.
#[napi]
pub fn classify_barrier(
    performance: String,
    level: String,
    upper: Option<bool>,
) -> NapiResult<String> {
    let performance = parse_decimal("performance", &performance)?;
    let level = parse_decimal("level", &level)?;
    let proximity = if upper.unwrap_or(false) {
        payoff_engine_core::barrier::classify_upper(performance, level)
    } else {
        payoff_engine_core::barrier::classify(performance, level)
    }
    .map_err(to_napi_error)?;
    serde_json::to_string(&proximity).map_err(to_napi_error)
}
