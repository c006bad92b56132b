use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::basket::{BasketConfig, BasketMember};
use crate::error::PayoffError;
use crate::payoff::ast::PayoffNode;
use crate::types::{Percent, Price, Weight, HUNDRED};
use crate::PayoffResult;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Underlying {
    /// Exchange-qualified ticker, e.g. `NESN.SW`.
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Initial fixing. Missing or non-positive strikes are reported per run.
    #[serde(default)]
    pub strike: Option<Price>,
    #[serde(default)]
    pub weight: Option<Weight>,
    /// Frozen price used once the product has matured.
    #[serde(default)]
    pub redemption_price: Option<Price>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Coupon,
    Autocall,
    CouponAutocall,
    Selection,
    #[serde(alias = "final_date")]
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub kind: ObservationKind,
    /// Per-date overrides, percentages of initial notional.
    #[serde(default)]
    pub coupon_barrier_level: Option<Percent>,
    #[serde(default)]
    pub autocall_level: Option<Percent>,
    #[serde(default)]
    pub upper_barrier: Option<Percent>,
}

/// Template parameters, all percentages of notional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductParameters {
    #[serde(default)]
    pub capital_protection_barrier: Option<Percent>,
    #[serde(default)]
    pub coupon_barrier: Option<Percent>,
    #[serde(default)]
    pub coupon: Option<Percent>,
    #[serde(default)]
    pub upper_barrier: Option<Percent>,
    #[serde(default)]
    pub rebate: Option<Percent>,
    #[serde(default)]
    pub floor: Option<Percent>,
    #[serde(default)]
    pub autocall_level: Option<Percent>,
    /// Upside participation, 100 when absent.
    #[serde(default)]
    pub participation: Option<Percent>,
    /// Extra named parameters for custom payoff trees.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Decimal>,
}

impl ProductParameters {
    /// Looks a parameter up by name; named fields shadow `extra`.
    pub fn get(&self, name: &str) -> Option<Percent> {
        match name {
            "capital_protection_barrier" => self.capital_protection_barrier,
            "coupon_barrier" => self.coupon_barrier,
            "coupon" => self.coupon,
            "upper_barrier" => self.upper_barrier,
            "rebate" => self.rebate,
            "floor" => self.floor,
            "autocall_level" => self.autocall_level,
            "participation" => self.participation.or(Some(HUNDRED)),
            other => self.extra.get(other).copied(),
        }
    }

    pub fn require(&self, name: &str) -> PayoffResult<Percent> {
        self.get(name).ok_or_else(|| {
            PayoffError::invalid(format!("parameters.{name}"), "required by the product template")
        })
    }

    fn validate(&self) -> PayoffResult<()> {
        let levels = [
            ("capital_protection_barrier", self.capital_protection_barrier),
            ("coupon_barrier", self.coupon_barrier),
            ("upper_barrier", self.upper_barrier),
            ("autocall_level", self.autocall_level),
        ];
        for (name, value) in levels {
            if let Some(v) = value {
                if v <= Decimal::ZERO {
                    return Err(PayoffError::invalid(
                        format!("parameters.{name}"),
                        "barrier level must be positive",
                    ));
                }
            }
        }
        let amounts = [
            ("coupon", self.coupon),
            ("rebate", self.rebate),
            ("floor", self.floor),
            ("participation", self.participation),
        ];
        for (name, value) in amounts {
            if let Some(v) = value {
                if v < Decimal::ZERO {
                    return Err(PayoffError::invalid(
                        format!("parameters.{name}"),
                        "must not be negative",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub isin: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Registered template name, or `custom` together with `payoff`.
    pub template: String,
    pub trade_date: NaiveDate,
    pub final_observation_date: NaiveDate,
    #[serde(default)]
    pub maturity_date: Option<NaiveDate>,
    pub underlyings: Vec<Underlying>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub parameters: ProductParameters,
    #[serde(default)]
    pub basket: BasketConfig,
    #[serde(default)]
    pub payoff: Option<Vec<PayoffNode>>,
}

// ---------------------------------------------------------------------------
// Product helpers
// ---------------------------------------------------------------------------

impl Product {
    pub fn from_json(json: &str) -> PayoffResult<Self> {
        let product: Product = serde_json::from_str(json)?;
        Ok(product)
    }

    /// Maturity date, defaulting to the final observation date.
    pub fn maturity(&self) -> NaiveDate {
        self.maturity_date.unwrap_or(self.final_observation_date)
    }

    pub fn tickers(&self) -> Vec<String> {
        self.underlyings.iter().map(|u| u.ticker.clone()).collect()
    }

    /// Observations on or before `as_of`, in date order.
    pub fn past_observations(&self, as_of: NaiveDate) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(move |o| o.date <= as_of)
    }

    pub fn next_observation(&self, as_of: NaiveDate) -> Option<&Observation> {
        self.observations.iter().find(|o| o.date > as_of)
    }

    /// Basket members carrying the given performances (matched by position).
    pub fn members(&self, performances: &[Option<Percent>]) -> Vec<BasketMember> {
        self.underlyings
            .iter()
            .zip(performances)
            .map(|(u, p)| BasketMember {
                ticker: u.ticker.clone(),
                performance: *p,
                weight: u.weight,
            })
            .collect()
    }

    /// Structural validation of the product terms. Data problems (missing
    /// strikes, missing prices) are not checked here; they become issues
    /// during evaluation.
    pub fn validate(&self) -> PayoffResult<()> {
        if self.id.trim().is_empty() {
            return Err(PayoffError::invalid("id", "must not be empty"));
        }
        if self.underlyings.is_empty() {
            return Err(PayoffError::invalid(
                "underlyings",
                "product needs at least one underlying",
            ));
        }
        let mut seen = BTreeSet::new();
        for u in &self.underlyings {
            if u.ticker.trim().is_empty() {
                return Err(PayoffError::invalid("underlyings.ticker", "must not be empty"));
            }
            if !seen.insert(u.ticker.as_str()) {
                return Err(PayoffError::invalid(
                    "underlyings.ticker",
                    format!("duplicate ticker {}", u.ticker),
                ));
            }
        }
        if self.final_observation_date <= self.trade_date {
            return Err(PayoffError::DateError(format!(
                "final observation {} is not after trade date {}",
                self.final_observation_date, self.trade_date
            )));
        }
        if let Some(maturity) = self.maturity_date {
            if maturity < self.final_observation_date {
                return Err(PayoffError::DateError(format!(
                    "maturity {} precedes final observation {}",
                    maturity, self.final_observation_date
                )));
            }
        }

        let mut previous: Option<NaiveDate> = None;
        for obs in &self.observations {
            if obs.date <= self.trade_date || obs.date > self.final_observation_date {
                return Err(PayoffError::DateError(format!(
                    "observation {} outside ({}, {}]",
                    obs.date, self.trade_date, self.final_observation_date
                )));
            }
            if previous.is_some_and(|p| obs.date <= p) {
                return Err(PayoffError::DateError(format!(
                    "observations must be strictly ascending, {} repeats or precedes an earlier date",
                    obs.date
                )));
            }
            previous = Some(obs.date);
            for (name, level) in [
                ("coupon_barrier_level", obs.coupon_barrier_level),
                ("autocall_level", obs.autocall_level),
                ("upper_barrier", obs.upper_barrier),
            ] {
                if level.is_some_and(|l| l <= Decimal::ZERO) {
                    return Err(PayoffError::invalid(
                        format!("observations.{}.{name}", obs.date),
                        "barrier level must be positive",
                    ));
                }
            }
        }

        self.parameters.validate()?;
        self.basket.validate(&self.members(&vec![None; self.underlyings.len()]))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub(crate) fn sample_product() -> Product {
        Product {
            id: "RC-001".into(),
            name: "Reverse convertible on SX5E members".into(),
            isin: Some("CH0000000001".into()),
            currency: Some("EUR".into()),
            template: "gearing_barrier".into(),
            trade_date: date(2024, 1, 15),
            final_observation_date: date(2025, 1, 15),
            maturity_date: Some(date(2025, 1, 22)),
            underlyings: vec![
                Underlying {
                    ticker: "SAN.PA".into(),
                    name: None,
                    strike: Some(dec!(90)),
                    weight: None,
                    redemption_price: None,
                },
                Underlying {
                    ticker: "AIR.PA".into(),
                    name: None,
                    strike: Some(dec!(140)),
                    weight: None,
                    redemption_price: None,
                },
            ],
            observations: vec![],
            parameters: ProductParameters {
                capital_protection_barrier: Some(dec!(70)),
                coupon: Some(dec!(8)),
                ..Default::default()
            },
            basket: BasketConfig::default(),
            payoff: None,
        }
    }

    #[test]
    fn test_valid_product() {
        assert!(sample_product().validate().is_ok());
    }

    #[test]
    fn test_duplicate_ticker_rejected() {
        let mut p = sample_product();
        p.underlyings[1].ticker = "SAN.PA".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_unsorted_observations_rejected() {
        let mut p = sample_product();
        let obs = |m| Observation {
            date: date(2024, m, 15),
            kind: ObservationKind::Coupon,
            coupon_barrier_level: None,
            autocall_level: None,
            upper_barrier: None,
        };
        p.observations = vec![obs(6), obs(3)];
        assert!(matches!(p.validate(), Err(PayoffError::DateError(_))));
        p.observations = vec![obs(3), obs(6)];
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_non_positive_barrier_rejected() {
        let mut p = sample_product();
        p.parameters.capital_protection_barrier = Some(dec!(0));
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_parameter_lookup_and_extra() {
        let json = r#"{"coupon": "3.5", "lookback_cap": "25"}"#;
        let params: ProductParameters = serde_json::from_str(json).unwrap();
        assert_eq!(params.get("coupon"), Some(dec!(3.5)));
        assert_eq!(params.get("lookback_cap"), Some(dec!(25)));
        assert!(params.require("rebate").is_err());
        assert_eq!(params.get("participation"), Some(dec!(100)));
    }

    #[test]
    fn test_final_date_alias() {
        let obs: Observation =
            serde_json::from_str(r#"{"date": "2024-06-01", "kind": "final_date"}"#).unwrap();
        assert_eq!(obs.kind, ObservationKind::Final);
    }
}
