use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::product::ObservationKind;

/// One step of a payoff program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum PayoffNode {
    /// Binds `value` to a variable.
    Let { name: String, value: Operand },
    /// Appends `value` to a list variable, creating it if needed.
    Push { list: String, value: Operand },
    Condition {
        when: Predicate,
        then: Vec<PayoffNode>,
        #[serde(default)]
        otherwise: Vec<PayoffNode>,
    },
    /// Timing node: runs `body` for each past observation whose kind is in
    /// `kinds` (all kinds when empty), in date order.
    ForEachObservation {
        #[serde(default)]
        kinds: Vec<ObservationKind>,
        body: Vec<PayoffNode>,
    },
    /// Memory action: one memory coupon step. `barrier_level` is a
    /// percentage of initial notional.
    MemoryCoupon {
        performance: Operand,
        barrier_level: Operand,
        coupon: Operand,
    },
    /// Locks every underlying of the current observation that meets the
    /// autocall level (percentage of initial notional).
    AutocallLock { level: Operand },
    /// Emits the redemption and ends evaluation. `{name}` placeholders in
    /// `formula` are filled from variables and parameters.
    Result {
        value: Operand,
        kind: RedemptionKind,
        formula: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Const(Decimal),
    Param(String),
    Var(String),
    /// Final (or current, for live products) basket performance.
    BasketPerformance,
    /// Per-underlying performances at evaluation.
    UnderlyingPerformances,
    /// Per-underlying upper-barrier touch flags over the product's life.
    UnderlyingTouched,
    ObservationBasketPerformance,
    ObservationPerformances,
    /// Per-date level, falling back to the product parameter of that name.
    ObservationLevel(LevelField),
    Call { op: String, args: Vec<Operand> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelField {
    CouponBarrier,
    AutocallLevel,
    UpperBarrier,
}

impl LevelField {
    pub fn parameter_name(&self) -> &'static str {
        match self {
            LevelField::CouponBarrier => "coupon_barrier",
            LevelField::AutocallLevel => "autocall_level",
            LevelField::UpperBarrier => "upper_barrier",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    /// `performance >= level - 100`, level as a percentage of initial notional.
    AtOrAboveBarrier { performance: Operand, level: Operand },
    /// The basket touched the upper barrier at any point of its life.
    UpperBarrierTouched,
    /// Every underlying is autocall-locked.
    AllLocked,
    /// The current observation has one of these kinds.
    ObservationIs(Vec<ObservationKind>),
    HasParam(String),
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl CmpOp {
    pub fn apply(&self, lhs: Decimal, rhs: Decimal) -> bool {
        match self {
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Eq => lhs == rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionKind {
    CapitalProtected,
    GearedLoss,
    Rebate,
    Participation,
    Floored,
    CappedAverage,
    BestOfSelection,
    Autocalled,
    Custom,
}

/// Shorthand constructors used by the template builders.
impl Operand {
    pub fn constant(value: Decimal) -> Self {
        Operand::Const(value)
    }

    pub fn param(name: &str) -> Self {
        Operand::Param(name.to_string())
    }

    pub fn var(name: &str) -> Self {
        Operand::Var(name.to_string())
    }

    pub fn call(op: &str, args: Vec<Operand>) -> Self {
        Operand::Call {
            op: op.to_string(),
            args,
        }
    }
}

impl PayoffNode {
    pub fn bind(name: &str, value: Operand) -> Self {
        PayoffNode::Let {
            name: name.to_string(),
            value,
        }
    }

    pub fn result(value: Operand, kind: RedemptionKind, formula: &str) -> Self {
        PayoffNode::Result {
            value,
            kind,
            formula: formula.to_string(),
        }
    }

    /// Every primitive call in this subtree, depth first.
    pub fn calls(&self) -> Vec<(&str, usize)> {
        let mut out = Vec::new();
        self.collect_calls(&mut out);
        out
    }

    fn collect_calls<'a>(&'a self, out: &mut Vec<(&'a str, usize)>) {
        match self {
            PayoffNode::Let { value, .. } | PayoffNode::Push { value, .. } => {
                value.collect_calls(out)
            }
            PayoffNode::Condition {
                when,
                then,
                otherwise,
            } => {
                when.collect_calls(out);
                then.iter().chain(otherwise).for_each(|n| n.collect_calls(out));
            }
            PayoffNode::ForEachObservation { body, .. } => {
                body.iter().for_each(|n| n.collect_calls(out))
            }
            PayoffNode::MemoryCoupon {
                performance,
                barrier_level,
                coupon,
            } => {
                performance.collect_calls(out);
                barrier_level.collect_calls(out);
                coupon.collect_calls(out);
            }
            PayoffNode::AutocallLock { level } => level.collect_calls(out),
            PayoffNode::Result { value, .. } => value.collect_calls(out),
        }
    }
}

impl Operand {
    fn collect_calls<'a>(&'a self, out: &mut Vec<(&'a str, usize)>) {
        if let Operand::Call { op, args } = self {
            out.push((op.as_str(), args.len()));
            args.iter().for_each(|a| a.collect_calls(out));
        }
    }
}

impl Predicate {
    fn collect_calls<'a>(&'a self, out: &mut Vec<(&'a str, usize)>) {
        match self {
            Predicate::Compare { lhs, rhs, .. } => {
                lhs.collect_calls(out);
                rhs.collect_calls(out);
            }
            Predicate::AtOrAboveBarrier { performance, level } => {
                performance.collect_calls(out);
                level.collect_calls(out);
            }
            Predicate::Not(inner) => inner.collect_calls(out),
            Predicate::All(items) | Predicate::Any(items) => {
                items.iter().for_each(|p| p.collect_calls(out))
            }
            Predicate::UpperBarrierTouched
            | Predicate::AllLocked
            | Predicate::ObservationIs(_)
            | Predicate::HasParam(_) => {}
        }
    }
}
