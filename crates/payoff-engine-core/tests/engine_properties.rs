use chrono::{Duration, NaiveDate};
use payoff_engine_core::engines::{replay_memory_coupons, AutocallLockEngine, CouponObservation};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn day(n: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(n as i64 * 30)
}

fn observations(performances: &[Decimal]) -> Vec<CouponObservation> {
    performances
        .iter()
        .enumerate()
        .map(|(i, p)| CouponObservation {
            date: day(i),
            performance: Some(*p),
            threshold: dec!(-30),
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_never_met_accumulates_n_coupons(n in 1usize..24, coupon in 1i64..20) {
        let coupon = Decimal::from(coupon);
        let (state, steps) = replay_memory_coupons(&observations(&vec![dec!(-45); n]), coupon).unwrap();
        prop_assert_eq!(state.unpaid, coupon * Decimal::from(n));
        prop_assert!(steps.iter().all(|s| s.coupon_paid.is_zero()));
    }

    #[test]
    fn prop_met_once_at_k_pays_k_coupons(n in 1usize..24, k_seed in 0usize..24, coupon in 1i64..20) {
        let k = k_seed % n;
        let coupon = Decimal::from(coupon);
        let mut perfs = vec![dec!(-45); n];
        perfs[k] = dec!(-10);
        let (_, steps) = replay_memory_coupons(&observations(&perfs), coupon).unwrap();
        prop_assert_eq!(steps[k].coupon_paid, coupon * Decimal::from(k + 1));
        prop_assert_eq!(steps[k].unpaid_after, Decimal::ZERO);
    }

    #[test]
    fn prop_locks_never_release(path in prop::collection::vec((-50i64..50, -50i64..50), 1..20)) {
        let mut engine = AutocallLockEngine::new(["A", "B"]);
        let mut ever_locked = std::collections::BTreeSet::new();
        for (i, (a, b)) in path.iter().enumerate() {
            let perfs = [Some(Decimal::from(*a)), Some(Decimal::from(*b))];
            engine.observe(day(i), &perfs, dec!(10)).unwrap();
            for t in ["A", "B"] {
                if ever_locked.contains(t) {
                    prop_assert!(engine.is_locked(t));
                }
                if engine.is_locked(t) {
                    ever_locked.insert(t);
                }
            }
        }
    }
}
