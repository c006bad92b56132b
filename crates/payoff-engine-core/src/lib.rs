pub mod barrier;
pub mod basket;
pub mod config;
pub mod engines;
pub mod error;
pub mod evaluation;
pub mod payoff;
pub mod product;
pub mod types;

pub use config::EngineConfig;
pub use error::{MarketDataError, PayoffError};
pub use evaluation::{generate_report, Report};
pub use payoff::calculate_redemption;
pub use product::Product;
pub use types::*;

/// Standard result type for all payoff-engine operations
pub type PayoffResult<T> = Result<T, PayoffError>;
