pub mod aggregation;
pub mod formula;

pub use aggregation::{
    aggregate, first_extreme_index, AggregationRule, BasketConfig, BasketMember, BasketType,
    CalculationMethod, Extreme, ReferencePoint,
};
pub use formula::BasketFormula;
