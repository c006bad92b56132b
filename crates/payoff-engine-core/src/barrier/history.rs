use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::basket::{BasketConfig, BasketMember};
use crate::error::PayoffError;
use crate::types::{level_to_threshold, performance_pct, Percent, Price, PricePoint, Weight};
use crate::PayoffResult;

/// One underlying's closes together with the fixing they are measured from.
#[derive(Debug, Clone, Copy)]
pub struct UnderlyingSeries<'a> {
    pub ticker: &'a str,
    pub reference: Price,
    pub weight: Option<Weight>,
    pub closes: &'a [PricePoint],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketPoint {
    pub date: NaiveDate,
    pub performance: Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchScan {
    pub touched: bool,
    pub touch_date: Option<NaiveDate>,
    /// Level as a percentage of initial notional.
    pub level: Percent,
    /// Level in performance space.
    pub threshold: Percent,
}

/// Builds the basket performance series over `[from, to]`.
///
/// Only dates on which every member has a close are kept; a date with
/// partial coverage is skipped rather than filled in. Each kept date is
/// aggregated independently with the basket's own rule.
pub fn build_basket_series(
    series: &[UnderlyingSeries<'_>],
    config: &BasketConfig,
    from: NaiveDate,
    to: NaiveDate,
) -> PayoffResult<Vec<BasketPoint>> {
    if series.is_empty() {
        return Ok(Vec::new());
    }
    for s in series {
        if s.reference <= Decimal::ZERO {
            return Err(PayoffError::invalid(
                format!("{}.reference", s.ticker),
                "reference price must be positive",
            ));
        }
    }

    let by_date: Vec<BTreeMap<NaiveDate, Price>> = series
        .iter()
        .map(|s| {
            s.closes
                .iter()
                .filter(|p| p.date >= from && p.date <= to)
                .map(|p| (p.date, p.close))
                .collect()
        })
        .collect();

    let mut common: BTreeSet<NaiveDate> = by_date[0].keys().copied().collect();
    for closes in &by_date[1..] {
        common.retain(|d| closes.contains_key(d));
    }

    let mut points = Vec::with_capacity(common.len());
    for date in common {
        let members: Vec<BasketMember> = series
            .iter()
            .zip(&by_date)
            .map(|(s, closes)| BasketMember {
                ticker: s.ticker.to_string(),
                performance: closes
                    .get(&date)
                    .and_then(|close| performance_pct(s.reference, *close)),
                weight: s.weight,
            })
            .collect();
        if let Some(performance) = config.aggregate(&members)? {
            points.push(BasketPoint { date, performance });
        }
    }
    Ok(points)
}

/// Performance series of a single underlying over `[from, to]`.
pub fn performance_series(
    reference: Price,
    closes: &[PricePoint],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<BasketPoint> {
    closes
        .iter()
        .filter(|p| p.date >= from && p.date <= to)
        .filter_map(|p| {
            performance_pct(reference, p.close).map(|performance| BasketPoint {
                date: p.date,
                performance,
            })
        })
        .collect()
}

/// Finds the first date (chronologically) on which performance reached the
/// upper level. `upper_level` is a percentage of initial notional.
pub fn scan_for_touch(history: &[BasketPoint], upper_level: Percent) -> TouchScan {
    let threshold = level_to_threshold(upper_level);
    let touch_date = history
        .iter()
        .filter(|p| p.performance >= threshold)
        .map(|p| p.date)
        .min();
    TouchScan {
        touched: touch_date.is_some(),
        touch_date,
        level: upper_level,
        threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basket::{BasketType, CalculationMethod};
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn closes(points: &[(u32, Price)]) -> Vec<PricePoint> {
        points
            .iter()
            .map(|(day, close)| PricePoint {
                date: d(*day),
                close: *close,
            })
            .collect()
    }

    #[test]
    fn test_partial_coverage_dates_are_skipped() {
        let a = closes(&[(1, dec!(100)), (4, dec!(90)), (5, dec!(120))]);
        let b = closes(&[(1, dec!(50)), (5, dec!(60))]);
        let series = [
            UnderlyingSeries { ticker: "A", reference: dec!(100), weight: None, closes: &a },
            UnderlyingSeries { ticker: "B", reference: dec!(50), weight: None, closes: &b },
        ];
        let out = build_basket_series(&series, &BasketConfig::default(), d(1), d(31)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], BasketPoint { date: d(1), performance: dec!(0) });
        // worst-of on day 5: A +20%, B +20%
        assert_eq!(out[1], BasketPoint { date: d(5), performance: dec!(20) });
    }

    #[test]
    fn test_series_uses_configured_rule_per_date() {
        let a = closes(&[(1, dec!(110)), (2, dec!(130))]);
        let b = closes(&[(1, dec!(90)), (2, dec!(100))]);
        let series = [
            UnderlyingSeries { ticker: "A", reference: dec!(100), weight: None, closes: &a },
            UnderlyingSeries { ticker: "B", reference: dec!(100), weight: None, closes: &b },
        ];
        let config = BasketConfig {
            basket_type: BasketType::AveragePerformance,
            calculation_method: CalculationMethod::Simple,
            ..Default::default()
        };
        let out = build_basket_series(&series, &config, d(1), d(2)).unwrap();
        assert_eq!(out[0].performance, dec!(0));
        assert_eq!(out[1].performance, dec!(15));
    }

    #[test]
    fn test_scan_returns_first_touch() {
        let history = vec![
            BasketPoint { date: d(1), performance: dec!(10) },
            BasketPoint { date: d(2), performance: dec!(30) },
            BasketPoint { date: d(3), performance: dec!(12) },
            BasketPoint { date: d(4), performance: dec!(45) },
        ];
        let scan = scan_for_touch(&history, dec!(130));
        assert!(scan.touched);
        assert_eq!(scan.touch_date, Some(d(2)));
        assert_eq!(scan.threshold, dec!(30));

        let none = scan_for_touch(&history, dec!(150));
        assert!(!none.touched);
        assert_eq!(none.touch_date, None);
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let a = closes(&[(1, dec!(100)), (2, dec!(140)), (3, dec!(100))]);
        let perf = performance_series(dec!(100), &a, d(2), d(3));
        assert_eq!(perf.len(), 2);
        assert_eq!(perf[0].performance, dec!(40));
    }
}
