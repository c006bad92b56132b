//! Generic tree-walking evaluator for payoff programs.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::barrier::TouchScan;
use crate::engines::autocall_lock::level_to_magnitude;
use crate::engines::{AutocallLockEngine, CouponObservation, CouponStep, LockStep, MemoryCouponState};
use crate::error::PayoffError;
use crate::payoff::ast::{LevelField, Operand, PayoffNode, Predicate};
use crate::payoff::primitives::{PrimitiveRegistry, PrimitiveScope, Value};
use crate::payoff::redemption::{RedemptionBlock, RedemptionOutcome};
use crate::product::{ObservationKind, ProductParameters};
use crate::types::{level_to_threshold, Percent};
use crate::PayoffResult;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Market state on one past observation date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSnapshot {
    pub date: NaiveDate,
    pub kind: ObservationKind,
    #[serde(default)]
    pub coupon_barrier_level: Option<Percent>,
    #[serde(default)]
    pub autocall_level: Option<Percent>,
    #[serde(default)]
    pub upper_barrier: Option<Percent>,
    /// Per-underlying performances, in basket order.
    pub performances: Vec<Option<Percent>>,
    pub basket_performance: Option<Percent>,
}

/// Everything a payoff program can read.
#[derive(Debug, Clone, Copy)]
pub struct PayoffInputs<'a> {
    pub tickers: &'a [String],
    pub parameters: &'a ProductParameters,
    pub basket_performance: Option<Percent>,
    pub underlying_performances: &'a [Option<Percent>],
    pub underlying_touched: &'a [bool],
    pub basket_touch: Option<TouchScan>,
    pub observations: &'a [ObservationSnapshot],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub date: Option<NaiveDate>,
    pub ticker: String,
    pub performance: Percent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoffOutcome {
    pub redemption: RedemptionBlock,
    pub coupon_steps: Vec<CouponStep>,
    pub lock_steps: Vec<LockStep>,
    pub lock_dates: BTreeMap<String, NaiveDate>,
    pub coupons_paid: Percent,
    pub unpaid_coupon: Percent,
    pub selections: Vec<Selection>,
    pub early_redemption: Option<NaiveDate>,
    /// Observation at which replay stopped for lack of data.
    pub halted_at: Option<NaiveDate>,
}

impl PayoffOutcome {
    pub fn locked(&self) -> BTreeSet<String> {
        self.lock_dates.keys().cloned().collect()
    }

    pub fn all_locked(&self, basket_size: usize) -> bool {
        basket_size > 0 && self.lock_dates.len() == basket_size
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Rejects unknown primitives, bad arities and nested timing nodes before
/// anything is evaluated.
pub fn validate_program(program: &[PayoffNode], registry: &PrimitiveRegistry) -> PayoffResult<()> {
    for node in program {
        for (op, argc) in node.calls() {
            registry.check(op, argc)?;
        }
        if let PayoffNode::ForEachObservation { body, .. } = node {
            if contains_timing(body) {
                return Err(PayoffError::invalid(
                    "payoff",
                    "for_each_observation cannot be nested",
                ));
            }
        }
    }
    Ok(())
}

fn contains_timing(nodes: &[PayoffNode]) -> bool {
    nodes.iter().any(|n| match n {
        PayoffNode::ForEachObservation { .. } => true,
        PayoffNode::Condition {
            then, otherwise, ..
        } => contains_timing(then) || contains_timing(otherwise),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

enum Flow {
    Continue,
    Done,
}

struct Evaluator<'a> {
    registry: &'a PrimitiveRegistry,
    inputs: PayoffInputs<'a>,
    vars: BTreeMap<String, Value>,
    scope: PrimitiveScope,
    memory: MemoryCouponState,
    coupon_steps: Vec<CouponStep>,
    coupons_paid: Percent,
    locks: AutocallLockEngine,
    lock_steps: Vec<LockStep>,
    current: Option<&'a ObservationSnapshot>,
    trace: Vec<String>,
    result: Option<RedemptionOutcome>,
    early_redemption: Option<NaiveDate>,
}

/// Runs a payoff program.
///
/// Configuration problems (unknown primitive, wrong operand types, missing
/// product parameters) are returned as errors. Data problems (a missing
/// basket performance, an observation without data) end the run with a
/// `cannot_calculate` redemption while keeping what was replayed so far.
pub fn evaluate(
    program: &[PayoffNode],
    inputs: PayoffInputs<'_>,
    registry: &PrimitiveRegistry,
) -> PayoffResult<PayoffOutcome> {
    validate_program(program, registry)?;

    let mut ev = Evaluator {
        registry,
        inputs,
        vars: BTreeMap::new(),
        scope: PrimitiveScope::default(),
        memory: MemoryCouponState::new(),
        coupon_steps: Vec::new(),
        coupons_paid: Decimal::ZERO,
        locks: AutocallLockEngine::new(inputs.tickers.iter().cloned()),
        lock_steps: Vec::new(),
        current: None,
        trace: Vec::new(),
        result: None,
        early_redemption: None,
    };

    let mut halted_at = None;
    let redemption = match ev.run_block(program) {
        Ok(_) => match ev.result.take() {
            // An early redemption is settled; anything else needs a basket.
            Some(_) if ev.early_redemption.is_none() && inputs.basket_performance.is_none() => {
                log::warn!("payoff result discarded: basket performance unavailable");
                RedemptionBlock::CannotCalculate {
                    reason: "basket performance unavailable".into(),
                }
            }
            Some(outcome) => RedemptionBlock::Calculated(outcome),
            None => RedemptionBlock::CannotCalculate {
                reason: "payoff program produced no result".into(),
            },
        },
        Err(e @ PayoffError::CannotCalculate(_))
        | Err(e @ PayoffError::MissingObservationData { .. }) => {
            log::warn!("payoff evaluation stopped: {e}");
            if matches!(e, PayoffError::MissingObservationData { .. }) {
                halted_at = ev.current.map(|o| o.date);
            }
            RedemptionBlock::CannotCalculate {
                reason: e.to_string(),
            }
        }
        Err(e) => return Err(e),
    };

    let selections = ev
        .scope
        .picks
        .iter()
        .map(|p| Selection {
            date: p.date,
            ticker: inputs.tickers.get(p.index).cloned().unwrap_or_default(),
            performance: p.performance,
        })
        .collect();

    Ok(PayoffOutcome {
        redemption,
        coupon_steps: ev.coupon_steps,
        lock_steps: ev.lock_steps,
        lock_dates: ev.locks.lock_dates().clone(),
        coupons_paid: ev.coupons_paid,
        unpaid_coupon: ev.memory.unpaid,
        selections,
        early_redemption: ev.early_redemption,
        halted_at,
    })
}

impl<'a> Evaluator<'a> {
    fn run_block(&mut self, nodes: &'a [PayoffNode]) -> PayoffResult<Flow> {
        for node in nodes {
            if let Flow::Done = self.run_node(node)? {
                return Ok(Flow::Done);
            }
        }
        Ok(Flow::Continue)
    }

    fn run_node(&mut self, node: &'a PayoffNode) -> PayoffResult<Flow> {
        match node {
            PayoffNode::Let { name, value } => {
                let v = self.resolve(value)?;
                if let Value::Number(n) = &v {
                    self.trace.push(format!("{name} = {}", display(*n)));
                }
                self.vars.insert(name.clone(), v);
            }
            PayoffNode::Push { list, value } => {
                let v = self.resolve(value)?;
                let entry = match v {
                    Value::Number(n) => Some(n),
                    Value::Missing => None,
                    other => {
                        return Err(PayoffError::invalid(
                            format!("payoff.push.{list}"),
                            format!("cannot push {}", other.type_name()),
                        ))
                    }
                };
                match self.vars.entry(list.clone()).or_insert(Value::List(Vec::new())) {
                    Value::List(items) => items.push(entry),
                    other => {
                        return Err(PayoffError::invalid(
                            format!("payoff.push.{list}"),
                            format!("variable holds {}", other.type_name()),
                        ))
                    }
                }
            }
            PayoffNode::Condition {
                when,
                then,
                otherwise,
            } => {
                let holds = self.test(when)?;
                return self.run_block(if holds { then } else { otherwise });
            }
            PayoffNode::ForEachObservation { kinds, body } => {
                let observations = self.inputs.observations;
                for obs in observations
                    .iter()
                    .filter(|o| kinds.is_empty() || kinds.contains(&o.kind))
                {
                    self.current = Some(obs);
                    self.scope.current_date = Some(obs.date);
                    if let Flow::Done = self.run_block(body)? {
                        if obs.kind != ObservationKind::Final {
                            self.early_redemption = Some(obs.date);
                        }
                        return Ok(Flow::Done);
                    }
                }
                self.current = None;
                self.scope.current_date = None;
            }
            PayoffNode::MemoryCoupon {
                performance,
                barrier_level,
                coupon,
            } => self.memory_coupon(performance, barrier_level, coupon)?,
            PayoffNode::AutocallLock { level } => self.autocall_lock(level)?,
            PayoffNode::Result {
                value,
                kind,
                formula,
            } => {
                let amount = match self.resolve(value)? {
                    Value::Number(n) => n,
                    Value::Missing => {
                        return Err(PayoffError::CannotCalculate(
                            "redemption value depends on unavailable market data".into(),
                        ))
                    }
                    other => {
                        return Err(PayoffError::invalid(
                            "payoff.result",
                            format!("expected number, got {}", other.type_name()),
                        ))
                    }
                };
                let formula = self.render(formula);
                self.trace.push(format!("redemption = {formula} = {}", display(amount)));
                let components = self
                    .vars
                    .iter()
                    .filter_map(|(k, v)| v.as_number().map(|n| (k.clone(), n)))
                    .collect();
                self.result = Some(RedemptionOutcome {
                    value: amount,
                    kind: *kind,
                    formula,
                    components,
                    explanation: std::mem::take(&mut self.trace),
                });
                return Ok(Flow::Done);
            }
        }
        Ok(Flow::Continue)
    }

    fn current(&self, what: &str) -> PayoffResult<&'a ObservationSnapshot> {
        self.current.ok_or_else(|| {
            PayoffError::invalid(
                format!("payoff.{what}"),
                "only available inside for_each_observation",
            )
        })
    }

    fn missing(&self, what: &str) -> PayoffError {
        match self.current {
            Some(obs) => PayoffError::MissingObservationData {
                observation: obs.date.to_string(),
                detail: format!("{what} unavailable"),
            },
            None => PayoffError::CannotCalculate(format!("{what} unavailable")),
        }
    }

    fn required_number(&mut self, operand: &Operand, what: &str) -> PayoffResult<Decimal> {
        match self.resolve(operand)? {
            Value::Number(n) => Ok(n),
            Value::Missing => Err(PayoffError::invalid(
                format!("payoff.{what}"),
                "no value configured",
            )),
            other => Err(PayoffError::invalid(
                format!("payoff.{what}"),
                format!("expected number, got {}", other.type_name()),
            )),
        }
    }

    fn memory_coupon(
        &mut self,
        performance: &Operand,
        barrier_level: &Operand,
        coupon: &Operand,
    ) -> PayoffResult<()> {
        let obs = self.current("memory_coupon")?;
        let performance = match self.resolve(performance)? {
            Value::Number(n) => Some(n),
            Value::Missing => None,
            other => {
                return Err(PayoffError::invalid(
                    "payoff.memory_coupon",
                    format!("expected number, got {}", other.type_name()),
                ))
            }
        };
        let level = self.required_number(barrier_level, "memory_coupon.barrier_level")?;
        let coupon = self.required_number(coupon, "memory_coupon.coupon")?;

        let input = CouponObservation {
            date: obs.date,
            performance,
            threshold: level_to_threshold(level),
        };
        let (next, step) = self.memory.step(&input, coupon)?;
        self.memory = next;
        self.coupons_paid += step.coupon_paid;
        self.trace.push(format!(
            "{}: coupon {} (unpaid {})",
            obs.date,
            display(step.coupon_paid),
            display(step.unpaid_after)
        ));
        self.vars.insert("coupon_paid".into(), Value::Number(step.coupon_paid));
        self.vars.insert("coupons_paid_total".into(), Value::Number(self.coupons_paid));
        self.vars.insert("unpaid_coupon".into(), Value::Number(next.unpaid));
        self.coupon_steps.push(step);
        Ok(())
    }

    fn autocall_lock(&mut self, level: &Operand) -> PayoffResult<()> {
        let obs = self.current("autocall_lock")?;
        let level = self.required_number(level, "autocall_lock.level")?;
        let step = self
            .locks
            .observe(obs.date, &obs.performances, level_to_magnitude(level))?;
        if !step.newly_locked.is_empty() {
            self.trace.push(format!(
                "{}: locked {}",
                obs.date,
                step.newly_locked.join(", ")
            ));
        }
        self.lock_steps.push(step);
        Ok(())
    }

    fn resolve(&mut self, operand: &Operand) -> PayoffResult<Value> {
        Ok(match operand {
            Operand::Const(v) => Value::Number(*v),
            Operand::Param(name) => Value::from_option(self.inputs.parameters.get(name)),
            Operand::Var(name) => self.vars.get(name).cloned().ok_or_else(|| {
                PayoffError::invalid(format!("payoff.var.{name}"), "used before assignment")
            })?,
            Operand::BasketPerformance => Value::from_option(self.inputs.basket_performance),
            Operand::UnderlyingPerformances => {
                Value::List(self.inputs.underlying_performances.to_vec())
            }
            Operand::UnderlyingTouched => Value::Flags(self.inputs.underlying_touched.to_vec()),
            Operand::ObservationBasketPerformance => {
                Value::from_option(self.current("observation_basket_performance")?.basket_performance)
            }
            Operand::ObservationPerformances => {
                Value::List(self.current("observation_performances")?.performances.clone())
            }
            Operand::ObservationLevel(field) => {
                let per_date = self.current.and_then(|obs| match field {
                    LevelField::CouponBarrier => obs.coupon_barrier_level,
                    LevelField::AutocallLevel => obs.autocall_level,
                    LevelField::UpperBarrier => obs.upper_barrier,
                });
                Value::from_option(
                    per_date.or_else(|| self.inputs.parameters.get(field.parameter_name())),
                )
            }
            Operand::Call { op, args } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.resolve(a)?);
                }
                self.registry.call(op, &values, &mut self.scope)?
            }
        })
    }

    fn compare_numbers(&mut self, lhs: &Operand, rhs: &Operand) -> PayoffResult<(Decimal, Decimal)> {
        let l = self.resolve(lhs)?;
        let r = self.resolve(rhs)?;
        match (l, r) {
            (Value::Number(a), Value::Number(b)) => Ok((a, b)),
            (Value::Missing, _) | (_, Value::Missing) => Err(self.missing("comparison operand")),
            (a, b) => Err(PayoffError::invalid(
                "payoff.compare",
                format!("cannot compare {} with {}", a.type_name(), b.type_name()),
            )),
        }
    }

    fn test(&mut self, predicate: &Predicate) -> PayoffResult<bool> {
        let holds = match predicate {
            Predicate::Compare { lhs, op, rhs } => {
                let (a, b) = self.compare_numbers(lhs, rhs)?;
                op.apply(a, b)
            }
            Predicate::AtOrAboveBarrier { performance, level } => {
                let (perf, level) = self.compare_numbers(performance, level)?;
                let threshold = level_to_threshold(level);
                let holds = perf >= threshold;
                self.trace.push(format!(
                    "performance {} {} barrier {} ({}%)",
                    display(perf),
                    if holds { ">=" } else { "<" },
                    display(threshold),
                    display(level)
                ));
                holds
            }
            Predicate::UpperBarrierTouched => {
                let scan = self.inputs.basket_touch.ok_or_else(|| {
                    PayoffError::invalid("upper_barrier", "no touch history for this product")
                })?;
                self.trace.push(match scan.touch_date {
                    Some(d) => format!("upper barrier {}% touched on {d}", display(scan.level)),
                    None => format!("upper barrier {}% never touched", display(scan.level)),
                });
                scan.touched
            }
            Predicate::AllLocked => self.locks.all_locked(),
            Predicate::ObservationIs(kinds) => kinds.contains(&self.current("observation_is")?.kind),
            Predicate::HasParam(name) => self.inputs.parameters.get(name).is_some(),
            Predicate::Not(inner) => !self.test(inner)?,
            Predicate::All(items) => {
                for p in items {
                    if !self.test(p)? {
                        return Ok(false);
                    }
                }
                true
            }
            Predicate::Any(items) => {
                for p in items {
                    if self.test(p)? {
                        return Ok(true);
                    }
                }
                false
            }
        };
        Ok(holds)
    }

    /// Fills `{name}` placeholders from variables, then parameters.
    fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.lookup(name) {
                        Some(v) => out.push_str(&display(v)),
                        None => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn lookup(&self, name: &str) -> Option<Decimal> {
        if let Some(Value::Number(n)) = self.vars.get(name) {
            return Some(*n);
        }
        if name == "basket_performance" {
            return self.inputs.basket_performance;
        }
        self.inputs.parameters.get(name)
    }
}

fn display(v: Decimal) -> String {
    v.round_dp(4).normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payoff::ast::{CmpOp, RedemptionKind};
    use rust_decimal_macros::dec;

    fn run(program: &[PayoffNode], basket: Option<Decimal>) -> PayoffResult<PayoffOutcome> {
        let params = ProductParameters {
            coupon: Some(dec!(5)),
            ..Default::default()
        };
        let tickers = vec!["A".to_string()];
        let inputs = PayoffInputs {
            tickers: &tickers,
            parameters: &params,
            basket_performance: basket,
            underlying_performances: &[basket],
            underlying_touched: &[false],
            basket_touch: None,
            observations: &[],
        };
        evaluate(program, inputs, &PrimitiveRegistry::default())
    }

    fn simple_program() -> Vec<PayoffNode> {
        vec![PayoffNode::Condition {
            when: Predicate::Compare {
                lhs: Operand::BasketPerformance,
                op: CmpOp::Ge,
                rhs: Operand::constant(dec!(0)),
            },
            then: vec![PayoffNode::result(
                Operand::call("add", vec![Operand::constant(dec!(100)), Operand::param("coupon")]),
                RedemptionKind::CapitalProtected,
                "100 + {coupon}",
            )],
            otherwise: vec![PayoffNode::result(
                Operand::call("add", vec![Operand::constant(dec!(100)), Operand::BasketPerformance]),
                RedemptionKind::Participation,
                "100 + {basket_performance}",
            )],
        }]
    }

    #[test]
    fn test_branches_and_renders_formula() {
        let up = run(&simple_program(), Some(dec!(3))).unwrap();
        match up.redemption {
            RedemptionBlock::Calculated(r) => {
                assert_eq!(r.value, dec!(105));
                assert_eq!(r.formula, "100 + 5");
            }
            other => panic!("unexpected {other:?}"),
        }
        let down = run(&simple_program(), Some(dec!(-12.5))).unwrap();
        match down.redemption {
            RedemptionBlock::Calculated(r) => {
                assert_eq!(r.value, dec!(87.5));
                assert_eq!(r.formula, "100 + -12.5");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_basket_is_cannot_calculate() {
        let out = run(&simple_program(), None).unwrap();
        assert!(matches!(out.redemption, RedemptionBlock::CannotCalculate { .. }));
    }

    #[test]
    fn test_unknown_primitive_fails_before_evaluation() {
        let program = vec![PayoffNode::bind(
            "x",
            Operand::call("warp", vec![Operand::constant(dec!(1))]),
        )];
        assert!(matches!(
            run(&program, Some(dec!(1))),
            Err(PayoffError::UnknownPrimitive(_))
        ));
    }

    #[test]
    fn test_observation_operand_outside_timing_node() {
        let program = vec![PayoffNode::bind("x", Operand::ObservationBasketPerformance)];
        assert!(matches!(
            run(&program, Some(dec!(1))),
            Err(PayoffError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_nested_timing_rejected() {
        let inner = PayoffNode::ForEachObservation {
            kinds: vec![],
            body: vec![],
        };
        let program = vec![PayoffNode::ForEachObservation {
            kinds: vec![],
            body: vec![inner],
        }];
        assert!(validate_program(&program, &PrimitiveRegistry::default()).is_err());
    }

    fn snapshot(date: NaiveDate, kind: ObservationKind) -> ObservationSnapshot {
        ObservationSnapshot {
            date,
            kind,
            coupon_barrier_level: None,
            autocall_level: None,
            upper_barrier: None,
            performances: vec![Some(dec!(5))],
            basket_performance: Some(dec!(5)),
        }
    }

    #[test]
    fn test_result_on_final_observation_is_not_early() {
        let program = vec![PayoffNode::ForEachObservation {
            kinds: vec![],
            body: vec![PayoffNode::result(
                Operand::constant(dec!(100)),
                RedemptionKind::Autocalled,
                "100",
            )],
        }];
        let params = ProductParameters::default();
        let tickers = vec!["A".to_string()];
        let run_on = |observations: &[ObservationSnapshot]| {
            let inputs = PayoffInputs {
                tickers: &tickers,
                parameters: &params,
                basket_performance: Some(dec!(5)),
                underlying_performances: &[Some(dec!(5))],
                underlying_touched: &[false],
                basket_touch: None,
                observations,
            };
            evaluate(&program, inputs, &PrimitiveRegistry::default()).unwrap()
        };
        let day = |d: u32| NaiveDate::from_ymd_opt(2025, 1, d).unwrap();

        let at_final = run_on(&[snapshot(day(15), ObservationKind::Final)]);
        assert!(matches!(at_final.redemption, RedemptionBlock::Calculated(_)));
        assert_eq!(at_final.early_redemption, None);

        let before_final = run_on(&[
            snapshot(day(2), ObservationKind::Autocall),
            snapshot(day(15), ObservationKind::Final),
        ]);
        assert_eq!(before_final.early_redemption, Some(day(2)));
    }

    #[test]
    fn test_program_without_result() {
        let program = vec![PayoffNode::bind("x", Operand::constant(dec!(1)))];
        let out = run(&program, Some(dec!(1))).unwrap();
        assert!(matches!(out.redemption, RedemptionBlock::CannotCalculate { .. }));
    }
}
