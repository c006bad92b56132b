//! Working state of one evaluation run.
//!
//! The context owns everything a run derives from market data. Each step
//! takes its inputs from here and hands back explicit values; nothing is
//! left behind in shared fields for a later step to pick up.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::barrier::UnderlyingSeries;
use crate::basket::{BasketMember, ReferencePoint};
use crate::config::EngineConfig;
use crate::evaluation::clock::Clock;
use crate::evaluation::issues::{IssueCollector, IssueParams, IssueType};
use crate::evaluation::market_data::{fetch_all, FetchRequest, MarketDataProvider, Quote};
use crate::payoff::ObservationSnapshot;
use crate::product::{Product, Underlying};
use crate::types::{performance_pct, Percent, Price, PricePoint, PriceSource, Weight};
use crate::PayoffResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationPrice {
    pub price: Price,
    pub source: PriceSource,
    pub date: NaiveDate,
}

/// What one run knows about one underlying.
#[derive(Debug, Clone, PartialEq)]
pub struct UnderlyingState {
    pub ticker: String,
    pub name: Option<String>,
    pub weight: Option<Weight>,
    /// Fixing performance is measured from; `None` when unusable.
    pub reference: Option<Price>,
    pub history: Vec<PricePoint>,
    pub evaluation: Option<EvaluationPrice>,
    pub performance: Option<Percent>,
}

pub struct EvaluationContext<'a> {
    pub product: &'a Product,
    pub config: &'a EngineConfig,
    pub as_of: NaiveDate,
    pub issues: IssueCollector<'a>,
    pub underlyings: Vec<UnderlyingState>,
    clock: &'a dyn Clock,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        product: &'a Product,
        config: &'a EngineConfig,
        as_of: NaiveDate,
        clock: &'a dyn Clock,
    ) -> Self {
        let underlyings = product
            .underlyings
            .iter()
            .map(|u| UnderlyingState {
                ticker: u.ticker.clone(),
                name: u.name.clone(),
                weight: u.weight,
                reference: None,
                history: Vec::new(),
                evaluation: None,
                performance: None,
            })
            .collect();
        EvaluationContext {
            product,
            config,
            as_of,
            issues: IssueCollector::new(clock),
            underlyings,
            clock,
        }
    }

    pub fn is_matured(&self) -> bool {
        self.as_of >= self.product.final_observation_date
    }

    /// Last date whose prices matter: `as_of`, or the final observation once
    /// the product has matured.
    pub fn valuation_date(&self) -> NaiveDate {
        self.as_of.min(self.product.final_observation_date)
    }

    fn fallback(&self) -> Duration {
        Duration::days(i64::from(self.config.observation_fallback_days))
    }

    /// Fetches every underlying, then resolves reference fixings, evaluation
    /// prices and performances. Data problems become issues.
    pub fn load_market_data(&mut self, provider: &dyn MarketDataProvider) {
        let first = match self.product.basket.reference_point {
            ReferencePoint::CustomDate { date } => date.min(self.product.trade_date),
            _ => self.product.trade_date,
        };
        let request = FetchRequest {
            from: first - self.fallback(),
            to: self.valuation_date(),
            want_quote: !self.is_matured(),
        };
        let tickers = self.product.tickers();
        let fetched = fetch_all(
            provider,
            &tickers,
            request,
            self.config.parallel_fetch,
            self.clock,
        );

        let product = self.product;
        for (index, (data, issues)) in fetched.into_iter().enumerate() {
            self.issues.merge(issues);
            let terms = &product.underlyings[index];
            self.underlyings[index].history = data.history;
            let reference = self.resolve_reference(index, terms);
            let evaluation = self.resolve_evaluation_price(index, terms, data.quote);
            let state = &mut self.underlyings[index];
            state.reference = reference;
            state.evaluation = evaluation;
            state.performance = match (reference, evaluation) {
                (Some(r), Some(e)) => performance_pct(r, e.price),
                _ => None,
            };
            log::debug!(
                "{}: reference {:?}, price {:?}, performance {:?}",
                state.ticker,
                reference,
                evaluation.map(|e| e.price),
                state.performance
            );
        }
    }

    /// Last close of underlying `index` within the fallback window ending on
    /// `date`.
    pub fn close_near(&self, index: usize, date: NaiveDate) -> Option<PricePoint> {
        let earliest = date - self.fallback();
        self.underlyings[index]
            .history
            .iter()
            .filter(|p| p.date <= date && p.date >= earliest)
            .max_by_key(|p| p.date)
            .copied()
    }

    fn last_close_on_or_before(&self, index: usize, date: NaiveDate) -> Option<PricePoint> {
        self.underlyings[index]
            .history
            .iter()
            .filter(|p| p.date <= date)
            .max_by_key(|p| p.date)
            .copied()
    }

    fn resolve_reference(&mut self, index: usize, terms: &Underlying) -> Option<Price> {
        let (reference, basis) = match self.product.basket.reference_point {
            ReferencePoint::InitialFixing => (terms.strike, "initial_fixing".to_string()),
            ReferencePoint::TradeDate => (
                self.close_near(index, self.product.trade_date).map(|p| p.close),
                format!("close on {}", self.product.trade_date),
            ),
            ReferencePoint::CustomDate { date } => (
                self.close_near(index, date).map(|p| p.close),
                format!("close on {date}"),
            ),
        };
        match reference {
            Some(r) if r > Price::ZERO => Some(r),
            other => {
                self.issues.add_issue(
                    IssueType::MissingStrike,
                    IssueParams::ticker(&terms.ticker)
                        .with("reference_point", basis)
                        .with("value", other.map_or("none".to_string(), |v| v.to_string())),
                );
                None
            }
        }
    }

    fn resolve_evaluation_price(
        &mut self,
        index: usize,
        terms: &Underlying,
        quote: Option<Quote>,
    ) -> Option<EvaluationPrice> {
        let valuation_date = self.valuation_date();
        if self.is_matured() {
            if let Some(price) = terms.redemption_price {
                return Some(EvaluationPrice {
                    price,
                    source: PriceSource::Redemption,
                    date: self.product.final_observation_date,
                });
            }
        } else if let Some(q) = quote.filter(|q| q.date <= self.as_of) {
            return Some(EvaluationPrice {
                price: q.price,
                source: PriceSource::Live,
                date: q.date,
            });
        }

        match self.last_close_on_or_before(index, valuation_date) {
            Some(close) => {
                if !self.is_matured() {
                    self.issues.add_issue(
                        IssueType::StaleCurrentPrice,
                        IssueParams::ticker(&terms.ticker).with("close_date", close.date),
                    );
                }
                Some(EvaluationPrice {
                    price: close.close,
                    source: PriceSource::LastClose,
                    date: close.date,
                })
            }
            None => {
                self.issues.add_issue(
                    IssueType::MissingPrice,
                    IssueParams::ticker(&terms.ticker).with("valuation_date", valuation_date),
                );
                None
            }
        }
    }

    pub fn tickers(&self) -> Vec<String> {
        self.underlyings.iter().map(|u| u.ticker.clone()).collect()
    }

    pub fn performances(&self) -> Vec<Option<Percent>> {
        self.underlyings.iter().map(|u| u.performance).collect()
    }

    pub fn members(&self) -> Vec<BasketMember> {
        self.product.members(&self.performances())
    }

    /// Aggregated basket performance at evaluation, `None` when no member
    /// has data.
    pub fn basket_performance(&mut self) -> PayoffResult<Option<Percent>> {
        let performance = self.product.basket.aggregate(&self.members())?;
        if performance.is_none() {
            self.issues.add_issue(
                IssueType::BasketUnavailable,
                IssueParams::default().with("excluded", self.underlyings.len()),
            );
        }
        Ok(performance)
    }

    /// Resolves prices for every observation on or before `as_of`.
    ///
    /// Once matured, the final observation uses the frozen redemption price
    /// of each underlying that carries one, the same price the redemption is
    /// measured on.
    pub fn observation_snapshots(&mut self) -> PayoffResult<Vec<ObservationSnapshot>> {
        let product = self.product;
        let matured = self.is_matured();
        let mut snapshots = Vec::new();
        for obs in product.past_observations(self.as_of) {
            let is_final = matured && obs.date == product.final_observation_date;
            let mut performances = Vec::with_capacity(self.underlyings.len());
            for index in 0..self.underlyings.len() {
                let Some(reference) = self.underlyings[index].reference else {
                    performances.push(None);
                    continue;
                };
                if let Some(frozen) = product.underlyings[index]
                    .redemption_price
                    .filter(|_| is_final)
                {
                    performances.push(performance_pct(reference, frozen));
                    continue;
                }
                let ticker = self.underlyings[index].ticker.clone();
                match self.close_near(index, obs.date) {
                    Some(close) => {
                        if close.date != obs.date {
                            self.issues.add_issue(
                                IssueType::StaleObservationPrice,
                                IssueParams::ticker(ticker)
                                    .with("observation", obs.date)
                                    .with("close_date", close.date),
                            );
                        }
                        performances.push(performance_pct(reference, close.close));
                    }
                    None => {
                        self.issues.add_issue(
                            IssueType::MissingObservationPrice,
                            IssueParams::ticker(ticker).with("observation", obs.date),
                        );
                        performances.push(None);
                    }
                }
            }
            let members = product.members(&performances);
            snapshots.push(ObservationSnapshot {
                date: obs.date,
                kind: obs.kind,
                coupon_barrier_level: obs.coupon_barrier_level,
                autocall_level: obs.autocall_level,
                upper_barrier: obs.upper_barrier,
                basket_performance: product.basket.aggregate(&members)?,
                performances,
            });
        }
        Ok(snapshots)
    }

    /// Series for every underlying with a usable reference, or `None` when
    /// any underlying lacks one (a partial basket is never scanned).
    pub fn underlying_series(&self) -> Option<Vec<UnderlyingSeries<'_>>> {
        self.underlyings
            .iter()
            .map(|u| {
                u.reference.map(|reference| UnderlyingSeries {
                    ticker: &u.ticker,
                    reference,
                    weight: u.weight,
                    closes: &u.history,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::clock::FixedClock;
    use crate::evaluation::issues::IssueType;
    use crate::evaluation::market_data::InMemoryMarketData;
    use crate::product::tests::{date, sample_product};
    use crate::product::{Observation, ObservationKind};
    use rust_decimal_macros::dec;

    fn closes(points: &[(NaiveDate, Price)]) -> Vec<PricePoint> {
        points
            .iter()
            .map(|(date, close)| PricePoint {
                date: *date,
                close: *close,
            })
            .collect()
    }

    fn has(ctx: &EvaluationContext<'_>, t: IssueType) -> bool {
        ctx.issues.issues().iter().any(|i| i.issue_type == t)
    }

    #[test]
    fn test_live_quote_and_stale_fallback() {
        let product = sample_product();
        let config = EngineConfig::default();
        let as_of = date(2024, 6, 3);
        let clock = FixedClock::at_date(as_of);
        let md = InMemoryMarketData::new()
            .with_quote("SAN.PA", dec!(99), as_of)
            .with_history("SAN.PA", closes(&[(date(2024, 5, 31), dec!(98))]))
            .with_history("AIR.PA", closes(&[(date(2024, 5, 31), dec!(126))]));

        let mut ctx = EvaluationContext::new(&product, &config, as_of, &clock);
        ctx.load_market_data(&md);

        let san = &ctx.underlyings[0];
        assert_eq!(san.evaluation.unwrap().source, PriceSource::Live);
        assert_eq!(san.performance, Some(dec!(10)));
        let air = &ctx.underlyings[1];
        assert_eq!(air.evaluation.unwrap().source, PriceSource::LastClose);
        assert_eq!(air.performance, Some(dec!(-10)));
        assert!(has(&ctx, IssueType::StaleCurrentPrice));
        assert_eq!(ctx.basket_performance().unwrap(), Some(dec!(-10)));
    }

    #[test]
    fn test_missing_strike_excludes_underlying() {
        let mut product = sample_product();
        product.underlyings[1].strike = Some(dec!(0));
        let config = EngineConfig::default();
        let as_of = date(2024, 6, 3);
        let clock = FixedClock::at_date(as_of);
        let md = InMemoryMarketData::new()
            .with_quote("SAN.PA", dec!(81), as_of)
            .with_quote("AIR.PA", dec!(150), as_of)
            .with_history("SAN.PA", vec![])
            .with_history("AIR.PA", vec![]);

        let mut ctx = EvaluationContext::new(&product, &config, as_of, &clock);
        ctx.load_market_data(&md);

        assert!(has(&ctx, IssueType::MissingStrike));
        assert_eq!(ctx.underlyings[1].performance, None);
        assert_eq!(ctx.basket_performance().unwrap(), Some(dec!(-10)));
        assert!(ctx.underlying_series().is_none());
    }

    #[test]
    fn test_observation_fallback_window() {
        let mut product = sample_product();
        product.observations = vec![
            Observation {
                date: date(2024, 6, 15),
                kind: ObservationKind::Coupon,
                coupon_barrier_level: None,
                autocall_level: None,
                upper_barrier: None,
            },
            Observation {
                date: date(2024, 9, 15),
                kind: ObservationKind::Coupon,
                coupon_barrier_level: None,
                autocall_level: None,
                upper_barrier: None,
            },
        ];
        let config = EngineConfig::default();
        let as_of = date(2024, 10, 1);
        let clock = FixedClock::at_date(as_of);
        let md = InMemoryMarketData::new()
            .with_history(
                "SAN.PA",
                closes(&[
                    (date(2024, 6, 14), dec!(90)),
                    (date(2024, 9, 1), dec!(72)),
                    (date(2024, 9, 30), dec!(81)),
                ]),
            )
            .with_history(
                "AIR.PA",
                closes(&[
                    (date(2024, 6, 14), dec!(154)),
                    (date(2024, 9, 13), dec!(140)),
                    (date(2024, 9, 30), dec!(126)),
                ]),
            );

        let mut ctx = EvaluationContext::new(&product, &config, as_of, &clock);
        ctx.load_market_data(&md);
        let snaps = ctx.observation_snapshots().unwrap();

        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].performances, vec![Some(dec!(0)), Some(dec!(10))]);
        assert_eq!(snaps[0].basket_performance, Some(dec!(0)));
        // SAN.PA has nothing within 5 days of 15 Sep
        assert_eq!(snaps[1].performances, vec![None, Some(dec!(0))]);
        assert!(has(&ctx, IssueType::StaleObservationPrice));
        assert!(has(&ctx, IssueType::MissingObservationPrice));
    }

    #[test]
    fn test_final_observation_uses_frozen_price() {
        let mut product = sample_product();
        product.underlyings[0].redemption_price = Some(dec!(72));
        product.observations = vec![Observation {
            date: date(2025, 1, 15),
            kind: ObservationKind::Final,
            coupon_barrier_level: None,
            autocall_level: None,
            upper_barrier: None,
        }];
        let config = EngineConfig::default();
        let as_of = date(2025, 2, 1);
        let clock = FixedClock::at_date(as_of);
        // no close near the final date for SAN.PA
        let md = InMemoryMarketData::new()
            .with_history("SAN.PA", closes(&[(date(2024, 12, 1), dec!(99))]))
            .with_history("AIR.PA", closes(&[(date(2025, 1, 15), dec!(154))]));

        let mut ctx = EvaluationContext::new(&product, &config, as_of, &clock);
        ctx.load_market_data(&md);
        let snaps = ctx.observation_snapshots().unwrap();

        assert_eq!(snaps[0].performances, vec![Some(dec!(-20)), Some(dec!(10))]);
        assert_eq!(snaps[0].basket_performance, Some(dec!(-20)));
        assert_eq!(ctx.underlyings[0].performance, Some(dec!(-20)));
        assert!(!has(&ctx, IssueType::MissingObservationPrice));
    }
}
