//! Closed-form redemption for a template and already-computed performances.

use std::collections::BTreeMap;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::barrier::TouchScan;
use crate::basket::{aggregate, AggregationRule, BasketMember};
use crate::error::PayoffError;
use crate::payoff::ast::{PayoffNode, RedemptionKind};
use crate::payoff::evaluator::{evaluate, ObservationSnapshot, PayoffInputs};
use crate::payoff::primitives::PrimitiveRegistry;
use crate::payoff::templates::TemplateRegistry;
use crate::product::ProductParameters;
use crate::types::{level_to_threshold, with_metadata, ComputationOutput, Percent, Weight};
use crate::PayoffResult;

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionUnderlying {
    pub ticker: String,
    pub performance: Option<Percent>,
    #[serde(default)]
    pub weight: Option<Weight>,
    /// Touched the upper barrier at some point of the product's life.
    #[serde(default)]
    pub touched_upper: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionInput {
    pub template: String,
    /// Tree for the `custom` template.
    #[serde(default)]
    pub payoff: Option<Vec<PayoffNode>>,
    #[serde(default)]
    pub parameters: ProductParameters,
    /// Aggregated from `underlyings` with `rule` when absent.
    #[serde(default)]
    pub basket_performance: Option<Percent>,
    #[serde(default)]
    pub rule: Option<AggregationRule>,
    #[serde(default)]
    pub underlyings: Vec<RedemptionUnderlying>,
    #[serde(default)]
    pub upper_barrier_touched: bool,
    /// Past observations, for templates that replay them.
    #[serde(default)]
    pub observations: Vec<ObservationSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionOutcome {
    /// Percentage of initial notional.
    pub value: Decimal,
    pub kind: RedemptionKind,
    pub formula: String,
    /// Named intermediate values (gearing, average, ...).
    pub components: BTreeMap<String, Decimal>,
    pub explanation: Vec<String>,
}

/// Redemption block of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RedemptionBlock {
    Calculated(RedemptionOutcome),
    CannotCalculate { reason: String },
}

impl RedemptionBlock {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            RedemptionBlock::Calculated(r) => Some(r.value),
            RedemptionBlock::CannotCalculate { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn calculate_redemption(
    input: &RedemptionInput,
) -> PayoffResult<ComputationOutput<RedemptionOutcome>> {
    let start = Instant::now();
    let mut warnings = Vec::new();

    let templates = TemplateRegistry::default();
    let program = templates.program(
        &input.template,
        input.payoff.as_deref(),
        &input.parameters,
    )?;

    let members: Vec<BasketMember> = input
        .underlyings
        .iter()
        .map(|u| BasketMember {
            ticker: u.ticker.clone(),
            performance: u.performance,
            weight: u.weight,
        })
        .collect();
    for m in members.iter().filter(|m| m.performance.is_none()) {
        warnings.push(format!("{}: no performance, excluded", m.ticker));
    }

    let rule = input.rule.unwrap_or(AggregationRule::WorstOf);
    let basket_performance = input
        .basket_performance
        .or_else(|| aggregate(&members, rule));

    let basket_touch = input.parameters.upper_barrier.map(|level| TouchScan {
        touched: input.upper_barrier_touched,
        touch_date: None,
        level,
        threshold: level_to_threshold(level),
    });

    let tickers: Vec<String> = members.iter().map(|m| m.ticker.clone()).collect();
    let performances: Vec<Option<Percent>> = members.iter().map(|m| m.performance).collect();
    let touched: Vec<bool> = input.underlyings.iter().map(|u| u.touched_upper).collect();

    let inputs = PayoffInputs {
        tickers: &tickers,
        parameters: &input.parameters,
        basket_performance,
        underlying_performances: &performances,
        underlying_touched: &touched,
        basket_touch,
        observations: &input.observations,
    };
    let outcome = evaluate(&program.nodes, inputs, &PrimitiveRegistry::default())?;

    let result = match outcome.redemption {
        RedemptionBlock::Calculated(r) => r,
        RedemptionBlock::CannotCalculate { reason } => {
            return Err(PayoffError::CannotCalculate(reason))
        }
    };

    let assumptions = serde_json::json!({
        "template": program.template,
        "aggregation": rule.as_str(),
        "basket_performance": basket_performance.map(|p| p.to_string()),
        "levels": "percent of initial notional, compared as level - 100",
    });

    Ok(with_metadata(
        "Payoff tree evaluation",
        &assumptions,
        warnings,
        start.elapsed().as_micros() as u64,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
