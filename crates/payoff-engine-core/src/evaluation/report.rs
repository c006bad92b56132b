//! `generate_report`: one product, one as-of date, one report.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::barrier::{
    build_basket_series, classify, performance_series, scan_for_touch, BarrierProximity,
    TouchScan,
};
use crate::basket::{first_extreme_index, AggregationRule, BasketType, Extreme, ReferencePoint};
use crate::config::EngineConfig;
use crate::engines::{sync_locks, LockStore};
use crate::evaluation::clock::Clock;
use crate::evaluation::context::EvaluationContext;
use crate::evaluation::issues::{IssueParams, IssueSummary, IssueType};
use crate::evaluation::market_data::MarketDataProvider;
use crate::payoff::{
    evaluate, validate_program, ObservationSnapshot, PayoffInputs, PayoffOutcome, PrimitiveRegistry,
    RedemptionBlock, Selection, TemplateRegistry,
};
use crate::product::{ObservationKind, Product, ProductParameters};
use crate::types::{Percent, Price, PriceSource, HUNDRED};
use crate::PayoffResult;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Live,
    Matured,
    Autocalled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBlock {
    pub status: LifecycleStatus,
    pub as_of: NaiveDate,
    /// Calendar days, zero once the final observation has passed.
    pub days_to_final_observation: i64,
    pub next_observation: Option<NaiveDate>,
    pub early_redemption_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureBlock {
    pub template: String,
    pub basket_type: BasketType,
    pub aggregation: AggregationRule,
    pub reference_point: ReferencePoint,
    pub parameters: ProductParameters,
    pub observation_count: usize,
}

/// Price levels for charting an underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartHints {
    pub strike: Option<Price>,
    pub barrier_price: Option<Price>,
    pub upper_barrier_price: Option<Price>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingReport {
    pub ticker: String,
    pub name: Option<String>,
    pub strike: Option<Price>,
    pub evaluation_price: Option<Price>,
    pub price_source: Option<PriceSource>,
    pub price_date: Option<NaiveDate>,
    pub performance: Option<Percent>,
    pub capital_barrier: Option<BarrierProximity>,
    pub upper_barrier_touch_date: Option<NaiveDate>,
    pub locked: bool,
    pub lock_date: Option<NaiveDate>,
    pub chart: ChartHints,
    pub is_worst: bool,
    pub is_best: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketReport {
    pub rule: AggregationRule,
    pub performance: Option<Percent>,
    pub contributing: usize,
    pub excluded: Vec<String>,
    pub capital_barrier: Option<BarrierProximity>,
    pub upper_barrier: Option<TouchScan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponRow {
    pub date: NaiveDate,
    pub kind: ObservationKind,
    pub basket_performance: Option<Percent>,
    pub barrier_met: Option<bool>,
    pub coupon_paid: Option<Percent>,
    pub unpaid_after: Option<Percent>,
    pub newly_locked: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponBlock {
    pub observations: Vec<CouponRow>,
    pub total_paid: Percent,
    pub unpaid_carried: Percent,
    pub locked: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub label: String,
    pub date: NaiveDate,
    pub formatted: String,
    pub past: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub product_id: String,
    pub product_name: String,
    pub isin: Option<String>,
    pub currency: Option<String>,
    pub status: StatusBlock,
    pub structure: StructureBlock,
    pub underlyings: Vec<UnderlyingReport>,
    pub basket: BasketReport,
    pub redemption: RedemptionBlock,
    pub coupons: CouponBlock,
    pub selections: Vec<Selection>,
    pub timeline: Vec<TimelineEntry>,
    pub issues: IssueSummary,
}

impl Report {
    pub fn to_json(&self) -> PayoffResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Evaluates `product` as of `as_of`.
///
/// Malformed product terms (unknown template, bad levels, bad weights) fail
/// the call. Market-data problems never do: they are collected as issues and
/// the report degrades, down to a `cannot_calculate` redemption.
pub fn generate_report(
    product: &Product,
    provider: &dyn MarketDataProvider,
    as_of: NaiveDate,
    config: &EngineConfig,
    clock: &dyn Clock,
    locks: Option<&dyn LockStore>,
) -> PayoffResult<Report> {
    config.validate()?;
    product.validate()?;
    let program = TemplateRegistry::default().program(
        &product.template,
        product.payoff.as_deref(),
        &product.parameters,
    )?;
    let primitives = PrimitiveRegistry::default();
    validate_program(&program.nodes, &primitives)?;
    log::info!(
        "evaluating {} ({}) as of {as_of}",
        product.id,
        program.template
    );

    let mut ctx = EvaluationContext::new(product, config, as_of, clock);
    ctx.load_market_data(provider);

    let basket_performance = ctx.basket_performance()?;
    let snapshots = ctx.observation_snapshots()?;
    let tickers = ctx.tickers();
    let performances = ctx.performances();

    let from = product.trade_date;
    let to = ctx.valuation_date();
    let upper = product.parameters.upper_barrier;

    let basket_touch = match upper {
        Some(level) if program.needs_basket_touch => {
            let history = match ctx.underlying_series() {
                Some(series) => Some(build_basket_series(&series, &product.basket, from, to)?),
                None => None,
            };
            if history.is_none() {
                ctx.issues.add_issue(
                    IssueType::GeneralWarning,
                    IssueParams::default()
                        .message("upper barrier scan needs every underlying, treated as untouched"),
                );
            }
            Some(scan_for_touch(history.as_deref().unwrap_or(&[]), level))
        }
        _ => None,
    };

    let underlying_touch: Vec<Option<TouchScan>> = ctx
        .underlyings
        .iter()
        .map(|u| match (upper, u.reference) {
            (Some(level), Some(reference)) => Some(scan_for_touch(
                &performance_series(reference, &u.history, from, to),
                level,
            )),
            _ => None,
        })
        .collect();
    let touched_flags: Vec<bool> = underlying_touch
        .iter()
        .map(|t| t.is_some_and(|t| t.touched))
        .collect();

    let inputs = PayoffInputs {
        tickers: &tickers,
        parameters: &product.parameters,
        basket_performance,
        underlying_performances: &performances,
        underlying_touched: &touched_flags,
        basket_touch,
        observations: &snapshots,
    };
    let outcome = evaluate(&program.nodes, inputs, &primitives)?;

    if let RedemptionBlock::CannotCalculate { reason } = &outcome.redemption {
        let params = IssueParams::default().message(reason.clone());
        match outcome.halted_at {
            Some(date) => ctx.issues.add_issue(
                IssueType::MissingObservationData,
                params.with("observation", date),
            ),
            None => ctx.issues.add_issue(IssueType::CannotCalculate, params),
        }
    }

    if let Some(store) = locks {
        persist_locks(&mut ctx, store, &outcome);
    }

    let status = status_block(product, as_of, &outcome);
    let underlyings = underlying_reports(&ctx, &underlying_touch, &outcome);
    let basket = basket_report(&ctx, basket_performance, basket_touch)?;
    let coupons = coupon_block(&snapshots, &outcome);
    let timeline = timeline(product, as_of, &config.date_format);

    let report = Report {
        product_id: product.id.clone(),
        product_name: product.name.clone(),
        isin: product.isin.clone(),
        currency: product.currency.clone(),
        status,
        structure: StructureBlock {
            template: program.template,
            basket_type: product.basket.basket_type,
            aggregation: product.basket.rule(),
            reference_point: product.basket.reference_point,
            parameters: product.parameters.clone(),
            observation_count: product.observations.len(),
        },
        underlyings,
        basket,
        redemption: outcome.redemption,
        coupons,
        selections: outcome.selections,
        timeline,
        issues: ctx.issues.summary(),
    };
    log::info!(
        "{}: {:?}, redemption {:?}",
        product.id,
        report.issues.processing_status,
        report.redemption.value()
    );
    Ok(report)
}

/// Writes newly derived locks and flags stored locks the history no longer
/// produces. Store failures are issues, not run failures.
fn persist_locks(ctx: &mut EvaluationContext<'_>, store: &dyn LockStore, outcome: &PayoffOutcome) {
    let product_id = ctx.product.id.clone();
    let derived = outcome.locked();
    match store.load(&product_id) {
        Ok(stored) => {
            for ticker in stored.difference(&derived) {
                ctx.issues.add_issue(IssueType::LockDrift, IssueParams::ticker(ticker));
            }
        }
        Err(e) => {
            ctx.issues.add_issue(
                IssueType::PersistenceFailed,
                IssueParams::default().message(e.to_string()),
            );
            return;
        }
    }
    match sync_locks(store, &product_id, &derived) {
        Ok(written) if !written.is_empty() => {
            log::info!("{product_id}: persisted locks {}", written.join(", "))
        }
        Ok(_) => {}
        Err(e) => ctx.issues.add_issue(
            IssueType::PersistenceFailed,
            IssueParams::default().message(e.to_string()),
        ),
    }
}

fn status_block(product: &Product, as_of: NaiveDate, outcome: &PayoffOutcome) -> StatusBlock {
    // A full lock on the final observation is a regular maturity.
    let early_redemption = outcome
        .early_redemption
        .filter(|date| *date < product.final_observation_date);
    let status = if early_redemption.is_some() {
        LifecycleStatus::Autocalled
    } else if as_of >= product.final_observation_date {
        LifecycleStatus::Matured
    } else {
        LifecycleStatus::Live
    };
    StatusBlock {
        status,
        as_of,
        days_to_final_observation: (product.final_observation_date - as_of).num_days().max(0),
        next_observation: match status {
            LifecycleStatus::Live => product.next_observation(as_of).map(|o| o.date),
            _ => None,
        },
        early_redemption_date: early_redemption,
    }
}

fn level_price(strike: Option<Price>, level: Option<Percent>) -> Option<Price> {
    Some(strike? * level? / HUNDRED)
}

fn underlying_reports(
    ctx: &EvaluationContext<'_>,
    touches: &[Option<TouchScan>],
    outcome: &PayoffOutcome,
) -> Vec<UnderlyingReport> {
    let params = &ctx.product.parameters;
    let members = ctx.members();
    let worst = first_extreme_index(&members, Extreme::Min);
    let best = first_extreme_index(&members, Extreme::Max);

    ctx.underlyings
        .iter()
        .enumerate()
        .map(|(i, u)| {
            let capital_barrier = match (u.performance, params.capital_protection_barrier) {
                (Some(p), Some(level)) => classify(p, level).ok(),
                _ => None,
            };
            UnderlyingReport {
                ticker: u.ticker.clone(),
                name: u.name.clone(),
                strike: u.reference,
                evaluation_price: u.evaluation.map(|e| e.price),
                price_source: u.evaluation.map(|e| e.source),
                price_date: u.evaluation.map(|e| e.date),
                performance: u.performance,
                capital_barrier,
                upper_barrier_touch_date: touches[i].and_then(|t| t.touch_date),
                locked: outcome.lock_dates.contains_key(&u.ticker),
                lock_date: outcome.lock_dates.get(&u.ticker).copied(),
                chart: ChartHints {
                    strike: u.reference,
                    barrier_price: level_price(u.reference, params.capital_protection_barrier),
                    upper_barrier_price: level_price(u.reference, params.upper_barrier),
                },
                is_worst: worst == Some(i),
                is_best: best == Some(i),
            }
        })
        .collect()
}

fn basket_report(
    ctx: &EvaluationContext<'_>,
    performance: Option<Percent>,
    upper_barrier: Option<TouchScan>,
) -> PayoffResult<BasketReport> {
    let excluded: Vec<String> = ctx
        .underlyings
        .iter()
        .filter(|u| u.performance.is_none())
        .map(|u| u.ticker.clone())
        .collect();
    let capital_barrier = match (performance, ctx.product.parameters.capital_protection_barrier) {
        (Some(p), Some(level)) => Some(classify(p, level)?),
        _ => None,
    };
    Ok(BasketReport {
        rule: ctx.product.basket.rule(),
        performance,
        contributing: ctx.underlyings.len() - excluded.len(),
        excluded,
        capital_barrier,
        upper_barrier,
    })
}

fn coupon_block(snapshots: &[ObservationSnapshot], outcome: &PayoffOutcome) -> CouponBlock {
    let coupons: BTreeMap<NaiveDate, _> =
        outcome.coupon_steps.iter().map(|s| (s.date, s)).collect();
    let locks: BTreeMap<NaiveDate, _> = outcome.lock_steps.iter().map(|s| (s.date, s)).collect();

    let observations = snapshots
        .iter()
        .map(|snap| {
            let coupon = coupons.get(&snap.date);
            CouponRow {
                date: snap.date,
                kind: snap.kind,
                basket_performance: snap.basket_performance,
                barrier_met: coupon.map(|c| c.barrier_met),
                coupon_paid: coupon.map(|c| c.coupon_paid),
                unpaid_after: coupon.map(|c| c.unpaid_after),
                newly_locked: locks
                    .get(&snap.date)
                    .map(|l| l.newly_locked.clone())
                    .unwrap_or_default(),
            }
        })
        .collect();

    let locked: BTreeSet<String> = outcome.locked();
    CouponBlock {
        observations,
        total_paid: outcome.coupons_paid,
        unpaid_carried: outcome.unpaid_coupon,
        locked: locked.into_iter().collect(),
    }
}

fn format_date(date: NaiveDate, format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", date.format(format)).is_err() {
        return date.to_string();
    }
    out
}

fn timeline(product: &Product, as_of: NaiveDate, format: &str) -> Vec<TimelineEntry> {
    let entry = |label: String, date: NaiveDate| TimelineEntry {
        label,
        date,
        formatted: format_date(date, format),
        past: date <= as_of,
    };
    let mut entries = vec![entry("trade_date".into(), product.trade_date)];
    for (i, obs) in product.observations.iter().enumerate() {
        if obs.date == product.final_observation_date {
            continue;
        }
        entries.push(entry(format!("observation_{}", i + 1), obs.date));
    }
    entries.push(entry(
        "final_observation".into(),
        product.final_observation_date,
    ));
    entries.push(entry("maturity".into(), product.maturity()));
    entries
}
