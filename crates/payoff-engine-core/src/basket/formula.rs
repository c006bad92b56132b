//! Custom basket formulas for `mathematical` baskets.
//!
//! A formula is a small expression tree over member performances, e.g. the
//! average of the two worst members minus a fixed spread:
//!
//! ```json
//! {"op": "sub",
//!  "lhs": {"op": "mean", "of": [{"op": "performance", "ticker": "SAN.MC"},
//!                               {"op": "performance", "ticker": "BBVA.MC"}]},
//!  "rhs": {"op": "constant", "value": "2"}}
//! ```
//!
//! A reference to a member without a performance makes the whole formula
//! unavailable (`None`), mirroring the aggregator's "no data" result.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::basket::aggregation::BasketMember;
use crate::error::PayoffError;
use crate::types::Percent;
use crate::PayoffResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BasketFormula {
    Performance { ticker: String },
    Constant { value: Decimal },
    Add { terms: Vec<BasketFormula> },
    Sub { lhs: Box<BasketFormula>, rhs: Box<BasketFormula> },
    Mul { factors: Vec<BasketFormula> },
    Div { lhs: Box<BasketFormula>, rhs: Box<BasketFormula> },
    Min { of: Vec<BasketFormula> },
    Max { of: Vec<BasketFormula> },
    Mean { of: Vec<BasketFormula> },
}

impl BasketFormula {
    pub fn evaluate(&self, members: &[BasketMember]) -> PayoffResult<Option<Percent>> {
        Ok(match self {
            BasketFormula::Performance { ticker } => {
                let member = members
                    .iter()
                    .find(|m| &m.ticker == ticker)
                    .ok_or_else(|| {
                        PayoffError::invalid("basket.formula", format!("unknown ticker {ticker}"))
                    })?;
                member.performance
            }
            BasketFormula::Constant { value } => Some(*value),
            BasketFormula::Add { terms } => {
                Self::evaluate_all(terms, members)?.map(|v| v.into_iter().sum())
            }
            BasketFormula::Sub { lhs, rhs } => {
                match (lhs.evaluate(members)?, rhs.evaluate(members)?) {
                    (Some(a), Some(b)) => Some(a - b),
                    _ => None,
                }
            }
            BasketFormula::Mul { factors } => Self::evaluate_all(factors, members)?
                .map(|v| v.into_iter().fold(Decimal::ONE, |acc, x| acc * x)),
            BasketFormula::Div { lhs, rhs } => {
                match (lhs.evaluate(members)?, rhs.evaluate(members)?) {
                    (Some(_), Some(b)) if b.is_zero() => {
                        return Err(PayoffError::DivisionByZero {
                            context: "basket formula".into(),
                        })
                    }
                    (Some(a), Some(b)) => Some(a / b),
                    _ => None,
                }
            }
            BasketFormula::Min { of } => {
                Self::evaluate_all(of, members)?.and_then(|v| v.into_iter().min())
            }
            BasketFormula::Max { of } => {
                Self::evaluate_all(of, members)?.and_then(|v| v.into_iter().max())
            }
            BasketFormula::Mean { of } => Self::evaluate_all(of, members)?.and_then(|v| {
                if v.is_empty() {
                    None
                } else {
                    let n = Decimal::from(v.len());
                    Some(v.into_iter().sum::<Decimal>() / n)
                }
            }),
        })
    }

    fn evaluate_all(
        nodes: &[BasketFormula],
        members: &[BasketMember],
    ) -> PayoffResult<Option<Vec<Percent>>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node.evaluate(members)? {
                Some(v) => out.push(v),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    /// Rejects references to tickers outside the basket and empty operand lists.
    pub fn validate(&self, tickers: &[&str]) -> PayoffResult<()> {
        match self {
            BasketFormula::Performance { ticker } => {
                if tickers.contains(&ticker.as_str()) {
                    Ok(())
                } else {
                    Err(PayoffError::invalid(
                        "basket.formula",
                        format!("unknown ticker {ticker}"),
                    ))
                }
            }
            BasketFormula::Constant { .. } => Ok(()),
            BasketFormula::Sub { lhs, rhs } | BasketFormula::Div { lhs, rhs } => {
                lhs.validate(tickers)?;
                rhs.validate(tickers)
            }
            BasketFormula::Add { terms: nodes }
            | BasketFormula::Mul { factors: nodes }
            | BasketFormula::Min { of: nodes }
            | BasketFormula::Max { of: nodes }
            | BasketFormula::Mean { of: nodes } => {
                if nodes.is_empty() {
                    return Err(PayoffError::invalid(
                        "basket.formula",
                        "operator needs at least one operand",
                    ));
                }
                nodes.iter().try_for_each(|n| n.validate(tickers))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn perf(t: &str) -> BasketFormula {
        BasketFormula::Performance { ticker: t.into() }
    }

    #[test]
    fn test_mean_of_two_minus_spread() {
        let members = vec![
            BasketMember::new("A", Some(dec!(-10))),
            BasketMember::new("B", Some(dec!(6))),
            BasketMember::new("C", Some(dec!(40))),
        ];
        let f = BasketFormula::Sub {
            lhs: Box::new(BasketFormula::Mean {
                of: vec![perf("A"), perf("B")],
            }),
            rhs: Box::new(BasketFormula::Constant { value: dec!(2) }),
        };
        assert_eq!(f.evaluate(&members).unwrap(), Some(dec!(-4)));
    }

    #[test]
    fn test_missing_member_makes_formula_unavailable() {
        let members = vec![
            BasketMember::new("A", None),
            BasketMember::new("B", Some(dec!(6))),
        ];
        let f = BasketFormula::Max {
            of: vec![perf("A"), perf("B")],
        };
        assert_eq!(f.evaluate(&members).unwrap(), None);
    }

    #[test]
    fn test_divide_by_zero_is_an_error() {
        let members = vec![BasketMember::new("A", Some(dec!(0)))];
        let f = BasketFormula::Div {
            lhs: Box::new(BasketFormula::Constant { value: dec!(1) }),
            rhs: Box::new(perf("A")),
        };
        assert!(f.evaluate(&members).is_err());
    }

    #[test]
    fn test_validate_and_parse_json() {
        let json = r#"{"op": "min", "of": [{"op": "performance", "ticker": "A"},
                                           {"op": "constant", "value": "5"}]}"#;
        let f: BasketFormula = serde_json::from_str(json).unwrap();
        assert!(f.validate(&["A", "B"]).is_ok());
        assert!(f.validate(&["B"]).is_err());
        assert!(BasketFormula::Mean { of: vec![] }.validate(&["A"]).is_err());
    }
}
