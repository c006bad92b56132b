//! Market-data collaborator seam and the per-underlying fetch fan-out.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::MarketDataError;
use crate::evaluation::clock::Clock;
use crate::evaluation::issues::{IssueCollector, IssueParams, IssueType};
use crate::types::{Price, PricePoint};

#[cfg(feature = "parallel-fetch")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub price: Price,
    pub date: NaiveDate,
}

/// Source of quotes and daily closes.
pub trait MarketDataProvider: Send + Sync {
    /// Latest quote, `Ok(None)` when the provider has none.
    fn current_price(&self, ticker: &str) -> Result<Option<Quote>, MarketDataError>;

    /// Closes within `[from, to]` in ascending date order. Gaps (weekends,
    /// holidays) are expected.
    fn historical_data(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, MarketDataError>;
}

/// Frozen market data, loadable from JSON:
/// `{"quotes": {"T": {"price": .., "date": ..}}, "history": {"T": [{"date": .., "close": ..}]}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryMarketData {
    #[serde(default)]
    pub quotes: BTreeMap<String, Quote>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<PricePoint>>,
    #[serde(skip)]
    failures: BTreeMap<String, MarketDataError>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> crate::PayoffResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_quote(mut self, ticker: &str, price: Price, date: NaiveDate) -> Self {
        self.quotes.insert(ticker.to_string(), Quote { price, date });
        self
    }

    pub fn with_history(mut self, ticker: &str, closes: Vec<PricePoint>) -> Self {
        self.history.insert(ticker.to_string(), closes);
        self
    }

    /// Makes every request for `ticker` fail with `error`.
    pub fn with_failure(mut self, ticker: &str, error: MarketDataError) -> Self {
        self.failures.insert(ticker.to_string(), error);
        self
    }

    fn check(&self, ticker: &str) -> Result<(), MarketDataError> {
        match self.failures.get(ticker) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl MarketDataProvider for InMemoryMarketData {
    fn current_price(&self, ticker: &str) -> Result<Option<Quote>, MarketDataError> {
        self.check(ticker)?;
        Ok(self.quotes.get(ticker).copied())
    }

    fn historical_data(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, MarketDataError> {
        self.check(ticker)?;
        let closes = self
            .history
            .get(ticker)
            .ok_or_else(|| MarketDataError::NotFound(ticker.to_string()))?;
        let mut out: Vec<PricePoint> = closes
            .iter()
            .filter(|p| p.date >= from && p.date <= to)
            .copied()
            .collect();
        out.sort_by_key(|p| p.date);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedUnderlying {
    pub ticker: String,
    pub quote: Option<Quote>,
    pub history: Vec<PricePoint>,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchRequest {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub want_quote: bool,
}

fn record_failure(issues: &mut IssueCollector<'_>, ticker: &str, error: &MarketDataError) {
    let issue_type = match error {
        MarketDataError::Timeout { .. } => IssueType::FetchTimeout,
        MarketDataError::NotFound(_) | MarketDataError::Provider(_) => IssueType::FetchFailed,
    };
    issues.add_issue(issue_type, IssueParams::ticker(ticker).message(error.to_string()));
}

fn fetch_one<'c>(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    request: FetchRequest,
    clock: &'c dyn Clock,
) -> (FetchedUnderlying, IssueCollector<'c>) {
    let mut issues = IssueCollector::new(clock);
    log::debug!("fetching {ticker} {}..{}", request.from, request.to);

    let history = match provider.historical_data(ticker, request.from, request.to) {
        Ok(closes) => {
            if closes.is_empty() {
                issues.add_issue(
                    IssueType::EmptyHistory,
                    IssueParams::ticker(ticker)
                        .with("from", request.from)
                        .with("to", request.to),
                );
            }
            closes
        }
        Err(e) => {
            record_failure(&mut issues, ticker, &e);
            Vec::new()
        }
    };

    let quote = if request.want_quote {
        match provider.current_price(ticker) {
            Ok(q) => q,
            Err(e) => {
                record_failure(&mut issues, ticker, &e);
                None
            }
        }
    } else {
        None
    };

    let fetched = FetchedUnderlying {
        ticker: ticker.to_string(),
        quote,
        history,
    };
    (fetched, issues)
}

/// Fetches every ticker, concurrently when `parallel` is set and the
/// `parallel-fetch` feature is on. Results and their issue collectors come
/// back in `tickers` order either way.
pub fn fetch_all<'c>(
    provider: &dyn MarketDataProvider,
    tickers: &[String],
    request: FetchRequest,
    parallel: bool,
    clock: &'c dyn Clock,
) -> Vec<(FetchedUnderlying, IssueCollector<'c>)> {
    #[cfg(feature = "parallel-fetch")]
    if parallel {
        return tickers
            .par_iter()
            .map(|t| fetch_one(provider, t, request, clock))
            .collect();
    }
    #[cfg(not(feature = "parallel-fetch"))]
    let _ = parallel;

    tickers
        .iter()
        .map(|t| fetch_one(provider, t, request, clock))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::clock::FixedClock;
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn provider() -> InMemoryMarketData {
        InMemoryMarketData::new()
            .with_history(
                "A",
                vec![
                    PricePoint { date: d(4), close: dec!(11) },
                    PricePoint { date: d(1), close: dec!(10) },
                ],
            )
            .with_quote("A", dec!(12), d(5))
            .with_history("B", vec![])
            .with_failure(
                "C",
                MarketDataError::Timeout {
                    ticker: "C".into(),
                    elapsed_ms: 5000,
                },
            )
    }

    #[test]
    fn test_history_is_sorted_and_windowed() {
        let closes = provider().historical_data("A", d(2), d(31)).unwrap();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].close, dec!(11));
        let all = provider().historical_data("A", d(1), d(31)).unwrap();
        assert_eq!(all[0].date, d(1));
    }

    #[test]
    fn test_fan_out_records_issues_per_ticker() {
        let clock = FixedClock::at_date(d(5));
        let tickers: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let request = FetchRequest {
            from: d(1),
            to: d(5),
            want_quote: true,
        };
        for parallel in [false, true] {
            let results = fetch_all(&provider(), &tickers, request, parallel, &clock);
            let order: Vec<&str> = results.iter().map(|(f, _)| f.ticker.as_str()).collect();
            assert_eq!(order, vec!["A", "B", "C", "D"]);

            assert_eq!(results[0].0.quote.map(|q| q.price), Some(dec!(12)));
            assert!(results[0].1.issues().is_empty());
            assert_eq!(results[1].1.issues()[0].issue_type, IssueType::EmptyHistory);
            assert_eq!(results[2].1.issues()[0].issue_type, IssueType::FetchTimeout);
            assert_eq!(results[3].1.issues()[0].issue_type, IssueType::FetchFailed);
        }
    }

    #[test]
    fn test_loads_from_json() {
        let json = r#"{
            "quotes": {"A": {"price": "101.5", "date": "2024-03-05"}},
            "history": {"A": [{"date": "2024-03-01", "close": "100"}]}
        }"#;
        let md = InMemoryMarketData::from_json(json).unwrap();
        assert_eq!(md.current_price("A").unwrap().unwrap().price, dec!(101.5));
        assert_eq!(md.current_price("Z").unwrap(), None);
    }
}
