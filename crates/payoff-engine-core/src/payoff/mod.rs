//! Payoff structures as data.
//!
//! A product template is a tree of [`ast::PayoffNode`]s walked by one generic
//! [`evaluator`]. Arithmetic and selection steps are named primitives looked up
//! in a [`primitives::PrimitiveRegistry`], so a new template is a new tree,
//! not new evaluation code.

pub mod ast;
pub mod evaluator;
pub mod primitives;
pub mod redemption;
pub mod templates;

pub use ast::{CmpOp, LevelField, Operand, PayoffNode, Predicate, RedemptionKind};
pub use evaluator::{
    evaluate, validate_program, ObservationSnapshot, PayoffInputs, PayoffOutcome, Selection,
};
pub use primitives::{PrimitiveRegistry, Value};
pub use redemption::{
    calculate_redemption, RedemptionBlock, RedemptionInput, RedemptionOutcome,
    RedemptionUnderlying,
};
pub use templates::{ResolvedProgram, TemplateRegistry, TemplateSpec, CUSTOM_TEMPLATE};
