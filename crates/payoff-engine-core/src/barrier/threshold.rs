use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::PayoffError;
use crate::types::{level_to_threshold, Percent};
use crate::PayoffResult;

/// Distance (in performance points) inside which a barrier is reported as
/// `near`. Fixed alerting convention shared by every product.
pub const NEAR_BARRIER_WINDOW: Decimal = dec!(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierStatus {
    Breached,
    Near,
    Safe,
}

impl std::fmt::Display for BarrierStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BarrierStatus::Breached => write!(f, "breached"),
            BarrierStatus::Near => write!(f, "near"),
            BarrierStatus::Safe => write!(f, "safe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierProximity {
    /// Barrier as a percentage of initial notional.
    pub level: Percent,
    /// The same barrier in performance space.
    pub threshold: Percent,
    /// Positive means the safe side of the barrier.
    pub distance: Percent,
    pub status: BarrierStatus,
}

fn validate_level(field: &str, level: Percent) -> PayoffResult<()> {
    if level <= Decimal::ZERO {
        return Err(PayoffError::invalid(field, "barrier level must be positive"));
    }
    Ok(())
}

fn status_for(distance: Percent) -> BarrierStatus {
    if distance < Decimal::ZERO {
        BarrierStatus::Breached
    } else if distance < NEAR_BARRIER_WINDOW {
        BarrierStatus::Near
    } else {
        BarrierStatus::Safe
    }
}

/// Point-in-time classification against a downside barrier.
///
/// `distance = performance - (level - 100)`; below zero is `breached`,
/// `[0, 10)` is `near`, anything else `safe`. Sitting exactly on the barrier
/// is not a breach.
pub fn classify(
    current_performance: Percent,
    barrier_level: Percent,
) -> PayoffResult<BarrierProximity> {
    validate_level("barrier_level", barrier_level)?;
    let threshold = level_to_threshold(barrier_level);
    let distance = current_performance - threshold;
    Ok(BarrierProximity {
        level: barrier_level,
        threshold,
        distance,
        status: status_for(distance),
    })
}

/// Point-in-time classification against an upside (knock-out) barrier.
///
/// Distance is measured downwards from the barrier. Reaching the barrier
/// counts as a touch, so `distance <= 0` is `breached`.
pub fn classify_upper(
    current_performance: Percent,
    upper_level: Percent,
) -> PayoffResult<BarrierProximity> {
    validate_level("upper_barrier", upper_level)?;
    let threshold = level_to_threshold(upper_level);
    let distance = threshold - current_performance;
    let status = if distance <= Decimal::ZERO {
        BarrierStatus::Breached
    } else {
        status_for(distance)
    };
    Ok(BarrierProximity {
        level: upper_level,
        threshold,
        distance,
        status,
    })
}
