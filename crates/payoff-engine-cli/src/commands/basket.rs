use clap::Args;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use payoff_engine_core::basket::{
    aggregate, first_extreme_index, AggregationRule, BasketConfig, BasketMember, BasketType,
    CalculationMethod, Extreme,
};

use crate::input;

/// Arguments for basket aggregation
#[derive(Args)]
pub struct AggregateArgs {
    /// Path to JSON input file ({rule, performances | underlyings})
    #[arg(long)]
    pub input: Option<String>,

    /// Aggregation rule: worst_of, best_of, average, weighted_average
    #[arg(long)]
    pub rule: Option<String>,

    /// Comma-separated performances in percent (e.g. "-12.5,4,8")
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub performances: Option<Vec<Decimal>>,
}

#[derive(Debug, Deserialize)]
struct AggregateInput {
    #[serde(default)]
    rule: Option<AggregationRule>,
    /// Unnamed members; `null` marks a missing performance.
    #[serde(default)]
    performances: Option<Vec<Option<Decimal>>>,
    #[serde(default)]
    underlyings: Option<Vec<BasketMember>>,
}

#[derive(Debug, Serialize)]
struct AggregateOutput {
    rule: AggregationRule,
    performance: Option<Decimal>,
    contributing: usize,
    excluded: Vec<String>,
    worst: Option<String>,
    best: Option<String>,
}

pub fn run_aggregate(args: AggregateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let req = match args.performances {
        Some(values) => AggregateInput {
            rule: None,
            performances: Some(values.into_iter().map(Some).collect()),
            underlyings: None,
        },
        None => input::file_or_stdin(args.input.as_deref(), "basket aggregation")?,
    };

    let rule = args
        .rule
        .map(AggregationRule::from)
        .or(req.rule)
        .unwrap_or(AggregationRule::WorstOf);

    let members: Vec<BasketMember> = match (req.underlyings, req.performances) {
        (Some(members), _) => members,
        (None, Some(values)) => values
            .into_iter()
            .enumerate()
            .map(|(i, p)| BasketMember::new(format!("#{}", i + 1), p))
            .collect(),
        (None, None) => return Err("either performances or underlyings is required".into()),
    };

    if rule == AggregationRule::WeightedAverage {
        let config = BasketConfig {
            basket_type: BasketType::AveragePerformance,
            calculation_method: CalculationMethod::WeightedAverage,
            ..Default::default()
        };
        config.validate(&members)?;
    }

    let ticker_at = |idx: Option<usize>| idx.map(|i| members[i].ticker.clone());
    let output = AggregateOutput {
        rule,
        performance: aggregate(&members, rule),
        contributing: members.iter().filter(|m| m.performance.is_some()).count(),
        excluded: members
            .iter()
            .filter(|m| m.performance.is_none())
            .map(|m| m.ticker.clone())
            .collect(),
        worst: ticker_at(first_extreme_index(&members, Extreme::Min)),
        best: ticker_at(first_extreme_index(&members, Extreme::Max)),
    };
    Ok(serde_json::to_value(output)?)
}
