use serde::{Deserialize, Serialize};

use crate::error::PayoffError;
use crate::PayoffResult;

/// Engine-wide settings that are not part of any product's terms.
///
/// Barrier proximity cut-offs are deliberately absent: they are fixed
/// alerting conventions, see [`crate::barrier::threshold`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Calendar days an observation may reach back for a close when the
    /// observation date itself has none.
    pub observation_fallback_days: u32,
    /// Fetch per-underlying market data on the rayon pool.
    pub parallel_fetch: bool,
    /// chrono format string for the report timeline.
    pub date_format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            observation_fallback_days: 5,
            parallel_fetch: true,
            date_format: "%d %b %Y".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> PayoffResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PayoffResult<()> {
        if self.observation_fallback_days > 31 {
            return Err(PayoffError::invalid(
                "observation_fallback_days",
                "must not exceed 31 days",
            ));
        }
        if self.date_format.trim().is_empty() {
            return Err(PayoffError::invalid("date_format", "must not be empty"));
        }
        Ok(())
    }
}
