use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PayoffError;
use crate::types::{level_to_threshold, Percent, HUNDRED};
use crate::PayoffResult;

/// Runtime value of the payoff evaluator. `Missing` stands for "no data" and
/// propagates through arithmetic; it never turns into zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Number(Decimal),
    Bool(bool),
    List(Vec<Option<Decimal>>),
    Flags(Vec<bool>),
    Missing,
}

impl Value {
    pub fn from_option(v: Option<Decimal>) -> Self {
        v.map(Value::Number).unwrap_or(Value::Missing)
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Flags(_) => "flags",
            Value::Missing => "missing",
        }
    }
}

/// One pick of the best-of-remaining primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pick {
    pub date: Option<NaiveDate>,
    pub index: usize,
    pub performance: Percent,
}

/// Mutable state primitives may use during one evaluation.
#[derive(Debug, Default)]
pub struct PrimitiveScope {
    pub current_date: Option<NaiveDate>,
    /// Underlyings already taken by best-of-remaining.
    pub excluded: BTreeSet<usize>,
    pub picks: Vec<Pick>,
}

pub type PrimitiveFn = fn(&[Value], &mut PrimitiveScope) -> PayoffResult<Value>;

#[derive(Debug, Clone, Copy)]
pub struct Primitive {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub description: &'static str,
    pub func: PrimitiveFn,
}

pub struct PrimitiveRegistry {
    entries: BTreeMap<&'static str, Primitive>,
}

impl Default for PrimitiveRegistry {
    fn default() -> Self {
        let mut registry = PrimitiveRegistry {
            entries: BTreeMap::new(),
        };
        let builtins: [(&'static str, usize, Option<usize>, &'static str, PrimitiveFn); 15] = [
            ("list", 0, None, "list of numbers", list_of),
            ("add", 1, None, "sum of numbers", add),
            ("sub", 2, Some(2), "a - b", sub),
            ("mul", 1, None, "product of numbers", mul),
            ("div", 2, Some(2), "a / b", div),
            ("min", 1, None, "smallest number", min),
            ("max", 1, None, "largest number", max),
            ("neg", 1, Some(1), "-a", neg),
            ("barrier_threshold", 1, Some(1), "level - 100", barrier_threshold),
            ("gearing", 1, Some(1), "1 / (level / 100)", gearing),
            ("compare_to_barrier", 2, Some(2), "perf >= level - 100", compare_to_barrier),
            ("memory_add", 2, Some(2), "accumulator + amount", memory_add),
            ("best_of_remaining", 1, Some(1), "best unpicked entry", best_of_remaining),
            ("array_average", 1, Some(1), "mean of available entries", array_average),
            ("cap_touched", 3, Some(3), "touched entries set to cap", cap_touched),
        ];
        for (name, min_args, max_args, description, func) in builtins {
            registry.register(Primitive {
                name,
                min_args,
                max_args,
                description,
                func,
            });
        }
        registry
    }
}

impl PrimitiveRegistry {
    pub fn register(&mut self, primitive: Primitive) {
        self.entries.insert(primitive.name, primitive);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn get(&self, name: &str) -> PayoffResult<&Primitive> {
        self.entries
            .get(name)
            .ok_or_else(|| PayoffError::UnknownPrimitive(name.to_string()))
    }

    /// Checks a primitive name and its argument count without running it.
    pub fn check(&self, name: &str, argc: usize) -> PayoffResult<()> {
        let p = self.get(name)?;
        let too_many = p.max_args.is_some_and(|max| argc > max);
        if argc < p.min_args || too_many {
            return Err(PayoffError::invalid(
                format!("payoff.{name}"),
                format!("called with {argc} arguments"),
            ));
        }
        Ok(())
    }

    pub fn call(
        &self,
        name: &str,
        args: &[Value],
        scope: &mut PrimitiveScope,
    ) -> PayoffResult<Value> {
        self.check(name, args.len())?;
        (self.get(name)?.func)(args, scope)
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

/// All numeric arguments, or `None` as soon as one is missing.
fn numbers(op: &str, args: &[Value]) -> PayoffResult<Option<Vec<Decimal>>> {
    let mut out = Vec::with_capacity(args.len());
    for a in args {
        match a {
            Value::Number(n) => out.push(*n),
            Value::Missing => return Ok(None),
            other => {
                return Err(PayoffError::invalid(
                    format!("payoff.{op}"),
                    format!("expected number, got {}", other.type_name()),
                ))
            }
        }
    }
    Ok(Some(out))
}

fn list<'a>(op: &str, v: &'a Value) -> PayoffResult<&'a [Option<Decimal>]> {
    match v {
        Value::List(items) => Ok(items),
        other => Err(PayoffError::invalid(
            format!("payoff.{op}"),
            format!("expected list, got {}", other.type_name()),
        )),
    }
}

fn fold(
    op: &str,
    args: &[Value],
    f: impl Fn(Vec<Decimal>) -> Option<Decimal>,
) -> PayoffResult<Value> {
    Ok(match numbers(op, args)? {
        Some(nums) => Value::from_option(f(nums)),
        None => Value::Missing,
    })
}

// ---------------------------------------------------------------------------
// Builtins
// ---------------------------------------------------------------------------

fn list_of(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    let mut items = Vec::with_capacity(args.len());
    for a in args {
        match a {
            Value::Number(n) => items.push(Some(*n)),
            Value::Missing => items.push(None),
            other => {
                return Err(PayoffError::invalid(
                    "payoff.list",
                    format!("expected number, got {}", other.type_name()),
                ))
            }
        }
    }
    Ok(Value::List(items))
}

fn add(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    fold("add", args, |n| Some(n.into_iter().sum()))
}

fn sub(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    fold("sub", args, |n| Some(n[0] - n[1]))
}

fn mul(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    fold("mul", args, |n| Some(n.into_iter().fold(Decimal::ONE, |a, b| a * b)))
}

fn div(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    match numbers("div", args)? {
        Some(n) if n[1].is_zero() => Err(PayoffError::DivisionByZero {
            context: "payoff div".into(),
        }),
        Some(n) => Ok(Value::Number(n[0] / n[1])),
        None => Ok(Value::Missing),
    }
}

fn min(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    fold("min", args, |n| n.into_iter().min())
}

fn max(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    fold("max", args, |n| n.into_iter().max())
}

fn neg(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    fold("neg", args, |n| Some(-n[0]))
}

fn barrier_threshold(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    fold("barrier_threshold", args, |n| Some(level_to_threshold(n[0])))
}

/// Downside leverage below the capital protection barrier.
fn gearing(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    match numbers("gearing", args)? {
        Some(n) if n[0] <= Decimal::ZERO => Err(PayoffError::invalid(
            "capital_protection_barrier",
            "gearing needs a positive barrier level",
        )),
        Some(n) => Ok(Value::Number(Decimal::ONE / (n[0] / HUNDRED))),
        None => Ok(Value::Missing),
    }
}

fn compare_to_barrier(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    Ok(match numbers("compare_to_barrier", args)? {
        Some(n) => Value::Bool(n[0] >= level_to_threshold(n[1])),
        None => Value::Missing,
    })
}

fn memory_add(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    fold("memory_add", args, |n| Some(n[0] + n[1]))
}

/// Picks the best performance among underlyings not picked before and
/// excludes it from later calls. Ties go to the first in basket order.
fn best_of_remaining(args: &[Value], scope: &mut PrimitiveScope) -> PayoffResult<Value> {
    let perfs = list("best_of_remaining", &args[0])?;
    let mut best: Option<(usize, Decimal)> = None;
    for (i, p) in perfs.iter().enumerate() {
        if scope.excluded.contains(&i) {
            continue;
        }
        if let Some(p) = p {
            if best.map_or(true, |(_, b)| *p > b) {
                best = Some((i, *p));
            }
        }
    }
    Ok(match best {
        Some((index, performance)) => {
            scope.excluded.insert(index);
            scope.picks.push(Pick {
                date: scope.current_date,
                index,
                performance,
            });
            Value::Number(performance)
        }
        None => Value::Missing,
    })
}

fn array_average(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    let items: Vec<Decimal> = list("array_average", &args[0])?
        .iter()
        .flatten()
        .copied()
        .collect();
    if items.is_empty() {
        return Ok(Value::Missing);
    }
    let n = Decimal::from(items.len());
    Ok(Value::Number(items.into_iter().sum::<Decimal>() / n))
}

/// `cap_touched(list, flags, cap)`: entries whose flag is set become `cap`.
fn cap_touched(args: &[Value], _: &mut PrimitiveScope) -> PayoffResult<Value> {
    let perfs = list("cap_touched", &args[0])?;
    let flags = match &args[1] {
        Value::Flags(f) => f,
        other => {
            return Err(PayoffError::invalid(
                "payoff.cap_touched",
                format!("expected flags, got {}", other.type_name()),
            ))
        }
    };
    if flags.len() != perfs.len() {
        return Err(PayoffError::invalid(
            "payoff.cap_touched",
            "flags and list differ in length",
        ));
    }
    let cap = match &args[2] {
        Value::Number(c) => *c,
        Value::Missing => return Ok(Value::Missing),
        other => {
            return Err(PayoffError::invalid(
                "payoff.cap_touched",
                format!("expected number, got {}", other.type_name()),
            ))
        }
    };
    Ok(Value::List(
        perfs
            .iter()
            .zip(flags)
            .map(|(p, touched)| if *touched { Some(cap) } else { *p })
            .collect(),
    ))
}
