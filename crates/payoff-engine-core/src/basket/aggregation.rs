use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::basket::formula::BasketFormula;
use crate::error::PayoffError;
use crate::types::{Percent, Weight, HUNDRED};
use crate::PayoffResult;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Allowed deviation of a weighted basket's weight sum from 100.
const WEIGHT_TOLERANCE: Decimal = dec!(0.01);

/// How a basket's members fold into one performance number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AggregationRule {
    WorstOf,
    BestOf,
    Average,
    WeightedAverage,
}

impl AggregationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationRule::WorstOf => "worst_of",
            AggregationRule::BestOf => "best_of",
            AggregationRule::Average => "average",
            AggregationRule::WeightedAverage => "weighted_average",
        }
    }

    /// Parses a reference-type name. Anything unrecognised falls back to
    /// worst-of, the conservative reading of an unknown basket.
    pub fn from_reference_type(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "worst_of" | "worst" | "min" => AggregationRule::WorstOf,
            "best_of" | "best" | "max" => AggregationRule::BestOf,
            "average" | "average_performance" | "mean" => AggregationRule::Average,
            "weighted_average" | "weighted" => AggregationRule::WeightedAverage,
            other => {
                log::warn!("unrecognised basket reference type '{other}', using worst_of");
                AggregationRule::WorstOf
            }
        }
    }
}

impl From<String> for AggregationRule {
    fn from(s: String) -> Self {
        AggregationRule::from_reference_type(&s)
    }
}

impl From<AggregationRule> for String {
    fn from(rule: AggregationRule) -> Self {
        rule.as_str().to_string()
    }
}

impl std::fmt::Display for AggregationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasketType {
    IndividualSecurities,
    #[default]
    WorstOf,
    BestOf,
    AveragePerformance,
    Mathematical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    #[default]
    Simple,
    WeightedAverage,
}

/// The fixing each member's performance is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReferencePoint {
    #[default]
    InitialFixing,
    TradeDate,
    CustomDate { date: NaiveDate },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasketConfig {
    #[serde(default)]
    pub basket_type: BasketType,
    #[serde(default)]
    pub calculation_method: CalculationMethod,
    #[serde(default)]
    pub reference_point: ReferencePoint,
    /// Required when `basket_type` is `mathematical`.
    #[serde(default)]
    pub formula: Option<BasketFormula>,
}

/// One basket member as seen by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketMember {
    pub ticker: String,
    /// `None` when price data was unavailable.
    pub performance: Option<Percent>,
    #[serde(default)]
    pub weight: Option<Weight>,
}

impl BasketMember {
    pub fn new(ticker: impl Into<String>, performance: Option<Percent>) -> Self {
        BasketMember {
            ticker: ticker.into(),
            performance,
            weight: None,
        }
    }

    pub fn weighted(mut self, weight: Weight) -> Self {
        self.weight = Some(weight);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    Min,
    Max,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Folds member performances into one basket performance.
///
/// Members without a performance are dropped first. Returns `None` when
/// nothing is left; zero is a real performance and is never used as a
/// stand-in for missing data.
pub fn aggregate(members: &[BasketMember], rule: AggregationRule) -> Option<Percent> {
    let valid: Vec<(Percent, Option<Weight>)> = members
        .iter()
        .filter_map(|m| m.performance.map(|p| (p, m.weight)))
        .collect();
    if valid.is_empty() {
        return None;
    }

    let value = match rule {
        AggregationRule::WorstOf => valid.iter().map(|(p, _)| *p).min()?,
        AggregationRule::BestOf => valid.iter().map(|(p, _)| *p).max()?,
        AggregationRule::Average => {
            let sum: Decimal = valid.iter().map(|(p, _)| *p).sum();
            sum / Decimal::from(valid.len())
        }
        AggregationRule::WeightedAverage => valid
            .iter()
            .map(|(p, w)| *p * w.unwrap_or(Decimal::ZERO) / HUNDRED)
            .sum(),
    };
    Some(value)
}

/// Index of the first member, in basket order, whose performance equals the
/// basket minimum (or maximum).
pub fn first_extreme_index(members: &[BasketMember], extreme: Extreme) -> Option<usize> {
    let target = match extreme {
        Extreme::Min => members.iter().filter_map(|m| m.performance).min()?,
        Extreme::Max => members.iter().filter_map(|m| m.performance).max()?,
    };
    members
        .iter()
        .position(|m| m.performance == Some(target))
}

// ---------------------------------------------------------------------------
// Basket configuration
// ---------------------------------------------------------------------------

impl BasketConfig {
    /// The scalar rule used for this basket. Mathematical baskets still need
    /// a rule for per-member display and fall back to worst-of.
    pub fn rule(&self) -> AggregationRule {
        match self.basket_type {
            BasketType::BestOf => AggregationRule::BestOf,
            BasketType::AveragePerformance => match self.calculation_method {
                CalculationMethod::WeightedAverage => AggregationRule::WeightedAverage,
                CalculationMethod::Simple => AggregationRule::Average,
            },
            BasketType::WorstOf | BasketType::IndividualSecurities | BasketType::Mathematical => {
                AggregationRule::WorstOf
            }
        }
    }

    /// Aggregates members under this configuration.
    pub fn aggregate(&self, members: &[BasketMember]) -> PayoffResult<Option<Percent>> {
        match (self.basket_type, &self.formula) {
            (BasketType::Mathematical, Some(formula)) => formula.evaluate(members),
            (BasketType::Mathematical, None) => Err(PayoffError::invalid(
                "basket.formula",
                "mathematical baskets require a formula",
            )),
            _ => Ok(aggregate(members, self.rule())),
        }
    }

    /// Checks the configuration against the product's members.
    ///
    /// Weighted baskets must carry a weight on every member and the weights
    /// must sum to 100 within 0.01. Weights are never renormalised.
    pub fn validate(&self, members: &[BasketMember]) -> PayoffResult<()> {
        if members.is_empty() {
            return Err(PayoffError::invalid(
                "underlyings",
                "basket needs at least one underlying",
            ));
        }
        if self.calculation_method == CalculationMethod::WeightedAverage {
            let mut total = Decimal::ZERO;
            for m in members {
                let w = m.weight.ok_or_else(|| {
                    PayoffError::invalid(
                        format!("underlyings.{}.weight", m.ticker),
                        "weighted baskets need a weight on every underlying",
                    )
                })?;
                if w < Decimal::ZERO {
                    return Err(PayoffError::invalid(
                        format!("underlyings.{}.weight", m.ticker),
                        "must not be negative",
                    ));
                }
                total += w;
            }
            if (total - HUNDRED).abs() > WEIGHT_TOLERANCE {
                return Err(PayoffError::invalid(
                    "underlyings.weight",
                    format!("weights sum to {total}, expected 100"),
                ));
            }
        }
        match (self.basket_type, &self.formula) {
            (BasketType::Mathematical, None) => Err(PayoffError::invalid(
                "basket.formula",
                "mathematical baskets require a formula",
            )),
            (BasketType::Mathematical, Some(formula)) => {
                let tickers: Vec<&str> = members.iter().map(|m| m.ticker.as_str()).collect();
                formula.validate(&tickers)
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn members(perfs: &[Option<Decimal>]) -> Vec<BasketMember> {
        perfs
            .iter()
            .enumerate()
            .map(|(i, p)| BasketMember::new(format!("T{i}"), *p))
            .collect()
    }

    #[test]
    fn test_worst_best_average() {
        let m = members(&[Some(dec!(-12.5)), Some(dec!(4)), Some(dec!(2.5))]);
        assert_eq!(aggregate(&m, AggregationRule::WorstOf), Some(dec!(-12.5)));
        assert_eq!(aggregate(&m, AggregationRule::BestOf), Some(dec!(4)));
        assert_eq!(aggregate(&m, AggregationRule::Average), Some(dec!(-2)));
    }

    #[test]
    fn test_missing_performances_are_filtered() {
        let m = members(&[None, Some(dec!(-3)), None, Some(dec!(5))]);
        assert_eq!(aggregate(&m, AggregationRule::WorstOf), Some(dec!(-3)));
        assert_eq!(aggregate(&m, AggregationRule::Average), Some(dec!(1)));
    }

    #[test]
    fn test_all_missing_is_none_not_zero() {
        let m = members(&[None, None]);
        assert_eq!(aggregate(&m, AggregationRule::Average), None);
        assert_eq!(aggregate(&[], AggregationRule::WorstOf), None);
    }

    #[test]
    fn test_zero_is_a_valid_performance() {
        let m = members(&[Some(Decimal::ZERO)]);
        assert_eq!(aggregate(&m, AggregationRule::WorstOf), Some(Decimal::ZERO));
    }

    #[test]
    fn test_weighted_average() {
        let m = vec![
            BasketMember::new("A", Some(dec!(10))).weighted(dec!(60)),
            BasketMember::new("B", Some(dec!(-20))).weighted(dec!(40)),
        ];
        assert_eq!(aggregate(&m, AggregationRule::WeightedAverage), Some(dec!(-2)));
    }

    #[test]
    fn test_unknown_reference_type_falls_back_to_worst_of() {
        assert_eq!(
            AggregationRule::from_reference_type("rainbow"),
            AggregationRule::WorstOf
        );
        assert_eq!(
            AggregationRule::from_reference_type("Best-Of"),
            AggregationRule::BestOf
        );
        let rule: AggregationRule = serde_json::from_str("\"average\"").unwrap();
        assert_eq!(rule, AggregationRule::Average);
    }

    #[test]
    fn test_first_extreme_tie_break_uses_basket_order() {
        let m = members(&[Some(dec!(1)), Some(dec!(-4)), Some(dec!(-4)), Some(dec!(7))]);
        assert_eq!(first_extreme_index(&m, Extreme::Min), Some(1));
        assert_eq!(first_extreme_index(&m, Extreme::Max), Some(3));
        assert_eq!(first_extreme_index(&members(&[None]), Extreme::Min), None);
    }

    #[test]
    fn test_weights_must_sum_to_hundred() {
        let config = BasketConfig {
            basket_type: BasketType::AveragePerformance,
            calculation_method: CalculationMethod::WeightedAverage,
            ..Default::default()
        };
        let ok = vec![
            BasketMember::new("A", None).weighted(dec!(33.33)),
            BasketMember::new("B", None).weighted(dec!(33.33)),
            BasketMember::new("C", None).weighted(dec!(33.34)),
        ];
        assert!(config.validate(&ok).is_ok());

        let off = vec![
            BasketMember::new("A", None).weighted(dec!(50)),
            BasketMember::new("B", None).weighted(dec!(49.98)),
        ];
        assert!(config.validate(&off).is_err());

        let missing = vec![
            BasketMember::new("A", None).weighted(dec!(100)),
            BasketMember::new("B", None),
        ];
        assert!(config.validate(&missing).is_err());
    }

    #[test]
    fn test_config_rule_mapping() {
        let mut config = BasketConfig::default();
        assert_eq!(config.rule(), AggregationRule::WorstOf);
        config.basket_type = BasketType::AveragePerformance;
        assert_eq!(config.rule(), AggregationRule::Average);
        config.calculation_method = CalculationMethod::WeightedAverage;
        assert_eq!(config.rule(), AggregationRule::WeightedAverage);
        config.basket_type = BasketType::BestOf;
        assert_eq!(config.rule(), AggregationRule::BestOf);
    }

    proptest! {
        #[test]
        fn prop_worst_le_average_le_best(
            raw in proptest::collection::vec(proptest::option::of(-100_000i64..100_000i64), 1..12)
        ) {
            let perfs: Vec<Option<Decimal>> =
                raw.iter().map(|v| v.map(|x| Decimal::new(x, 2))).collect();
            let m = members(&perfs);
            let worst = aggregate(&m, AggregationRule::WorstOf);
            let avg = aggregate(&m, AggregationRule::Average);
            let best = aggregate(&m, AggregationRule::BestOf);
            match (worst, avg, best) {
                (Some(w), Some(a), Some(b)) => {
                    prop_assert!(w <= a);
                    prop_assert!(a <= b);
                }
                (None, None, None) => prop_assert!(perfs.iter().all(|p| p.is_none())),
                _ => prop_assert!(false, "inconsistent availability"),
            }
        }
    }
}
