//! Memory coupon accumulation.
//!
//! Each coupon observation either pays the period coupon plus everything
//! missed so far, or adds the period coupon to the unpaid memory. The state is
//! a plain value threaded through the replay: every step takes the previous
//! state and returns the next one.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PayoffError;
use crate::types::Percent;
use crate::PayoffResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCouponState {
    /// Coupons missed since the last payment, in percent of notional.
    pub unpaid: Percent,
}

/// Inputs for one observation. `threshold` is in performance space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouponObservation {
    pub date: NaiveDate,
    pub performance: Option<Percent>,
    pub threshold: Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponStep {
    pub date: NaiveDate,
    pub performance: Percent,
    pub threshold: Percent,
    pub barrier_met: bool,
    pub coupon_paid: Percent,
    pub unpaid_after: Percent,
}

impl MemoryCouponState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one observation and returns the next state with the step.
    ///
    /// A missing performance is an error: treating it as either side of the
    /// barrier would misstate the coupons paid.
    pub fn step(
        self,
        observation: &CouponObservation,
        coupon_per_period: Percent,
    ) -> PayoffResult<(MemoryCouponState, CouponStep)> {
        if coupon_per_period < Decimal::ZERO {
            return Err(PayoffError::invalid("coupon", "must not be negative"));
        }
        let performance = observation.performance.ok_or_else(|| {
            PayoffError::MissingObservationData {
                observation: observation.date.to_string(),
                detail: "no performance for coupon barrier comparison".into(),
            }
        })?;

        let barrier_met = performance >= observation.threshold;
        let (coupon_paid, next) = if barrier_met {
            (coupon_per_period + self.unpaid, MemoryCouponState::default())
        } else {
            (
                Decimal::ZERO,
                MemoryCouponState {
                    unpaid: self.unpaid + coupon_per_period,
                },
            )
        };
        log::debug!(
            "coupon observation {}: performance {} vs {} -> paid {}, unpaid {}",
            observation.date,
            performance,
            observation.threshold,
            coupon_paid,
            next.unpaid
        );

        Ok((
            next,
            CouponStep {
                date: observation.date,
                performance,
                threshold: observation.threshold,
                barrier_met,
                coupon_paid,
                unpaid_after: next.unpaid,
            },
        ))
    }
}

/// Replays a full observation sequence from an empty memory.
pub fn replay_memory_coupons(
    observations: &[CouponObservation],
    coupon_per_period: Percent,
) -> PayoffResult<(MemoryCouponState, Vec<CouponStep>)> {
    let mut state = MemoryCouponState::new();
    let mut steps = Vec::with_capacity(observations.len());
    for obs in observations {
        let (next, step) = state.step(obs, coupon_per_period)?;
        state = next;
        steps.push(step);
    }
    Ok((state, steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn obs(month: u32, performance: Option<Percent>) -> CouponObservation {
        CouponObservation {
            date: NaiveDate::from_ymd_opt(2024, month, 15).unwrap(),
            performance,
            threshold: dec!(-30),
        }
    }

    #[test]
    fn test_never_met_accumulates_everything() {
        let seq: Vec<_> = (1..=6).map(|m| obs(m, Some(dec!(-45)))).collect();
        let (state, steps) = replay_memory_coupons(&seq, dec!(2.5)).unwrap();
        assert_eq!(state.unpaid, dec!(15));
        let paid: Decimal = steps.iter().map(|s| s.coupon_paid).sum();
        assert_eq!(paid, Decimal::ZERO);
    }

    #[test]
    fn test_met_once_pays_the_memory() {
        let seq = vec![
            obs(1, Some(dec!(-40))),
            obs(2, Some(dec!(-35))),
            obs(3, Some(dec!(-30))),
        ];
        let (state, steps) = replay_memory_coupons(&seq, dec!(2)).unwrap();
        assert_eq!(steps[2].coupon_paid, dec!(6));
        assert!(steps[2].barrier_met);
        assert_eq!(state.unpaid, Decimal::ZERO);
    }

    #[test]
    fn test_memory_resets_after_payment() {
        let seq = vec![
            obs(1, Some(dec!(-50))),
            obs(2, Some(dec!(5))),
            obs(3, Some(dec!(-50))),
            obs(4, Some(dec!(-50))),
        ];
        let (state, steps) = replay_memory_coupons(&seq, dec!(1.5)).unwrap();
        assert_eq!(steps[1].coupon_paid, dec!(3));
        assert_eq!(steps[1].unpaid_after, Decimal::ZERO);
        assert_eq!(state.unpaid, dec!(3));
    }

    #[test]
    fn test_missing_performance_is_an_error() {
        let seq = vec![obs(1, Some(dec!(0))), obs(2, None)];
        let err = replay_memory_coupons(&seq, dec!(1)).unwrap_err();
        assert!(matches!(err, PayoffError::MissingObservationData { .. }));
    }

    #[test]
    fn test_step_threads_state_explicitly() {
        let start = MemoryCouponState { unpaid: dec!(4) };
        let (next, step) = start.step(&obs(1, Some(dec!(-10))), dec!(2)).unwrap();
        assert_eq!(step.coupon_paid, dec!(6));
        assert_eq!(next, MemoryCouponState::new());
        // previous value is untouched
        assert_eq!(start.unpaid, dec!(4));
    }
}
