use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayoffError {
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Missing observation data at {observation}: {detail}")]
    MissingObservationData { observation: String, detail: String },

    #[error("Unknown product template: {0}")]
    UnknownTemplate(String),

    #[error("Unknown payoff primitive: {0}")]
    UnknownPrimitive(String),

    #[error("Cannot calculate: {0}")]
    CannotCalculate(String),

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Date error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl PayoffError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PayoffError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for PayoffError {
    fn from(e: serde_json::Error) -> Self {
        PayoffError::SerializationError(e.to_string())
    }
}

/// Failures reported by a market-data collaborator. These never abort an
/// evaluation run; the report builder turns them into collected issues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarketDataError {
    #[error("no market data for {0}")]
    NotFound(String),

    #[error("market data request for {ticker} timed out after {elapsed_ms} ms")]
    Timeout { ticker: String, elapsed_ms: u64 },

    #[error("market data provider error: {0}")]
    Provider(String),
}
