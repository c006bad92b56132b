//! Per-underlying autocall locks.
//!
//! Once an underlying's performance reaches the autocall condition on an
//! observation date it is locked for the rest of the product's life. Locks
//! are derived from the observation history on every run; the [`LockStore`]
//! only receives the delta against what was stored before.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PayoffError;
use crate::types::{Percent, HUNDRED};
use crate::PayoffResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStep {
    pub date: NaiveDate,
    pub newly_locked: Vec<String>,
    /// Unlocked underlyings that could not be tested for lack of data.
    pub skipped: Vec<String>,
    pub all_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutocallLockEngine {
    tickers: Vec<String>,
    locked: BTreeMap<String, NaiveDate>,
}

impl AutocallLockEngine {
    pub fn new<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AutocallLockEngine {
            tickers: tickers.into_iter().map(Into::into).collect(),
            locked: BTreeMap::new(),
        }
    }

    /// Runs one observation date against every not-yet-locked underlying.
    ///
    /// `autocall_level` is a positive magnitude: an underlying locks when its
    /// performance is at least `-autocall_level`. Performances are matched to
    /// tickers by position.
    pub fn observe(
        &mut self,
        date: NaiveDate,
        performances: &[Option<Percent>],
        autocall_level: Percent,
    ) -> PayoffResult<LockStep> {
        if performances.len() != self.tickers.len() {
            return Err(PayoffError::invalid(
                "performances",
                format!(
                    "expected {} performances, got {}",
                    self.tickers.len(),
                    performances.len()
                ),
            ));
        }
        let trigger = -autocall_level;
        let mut newly_locked = Vec::new();
        let mut skipped = Vec::new();

        for (ticker, perf) in self.tickers.iter().zip(performances) {
            if self.locked.contains_key(ticker) {
                continue;
            }
            match perf {
                Some(p) if *p >= trigger => {
                    self.locked.insert(ticker.clone(), date);
                    newly_locked.push(ticker.clone());
                }
                Some(_) => {}
                None => skipped.push(ticker.clone()),
            }
        }
        if !newly_locked.is_empty() {
            log::debug!("{date}: locked {}", newly_locked.join(", "));
        }

        Ok(LockStep {
            date,
            newly_locked,
            skipped,
            all_locked: self.all_locked(),
        })
    }

    pub fn is_locked(&self, ticker: &str) -> bool {
        self.locked.contains_key(ticker)
    }

    pub fn lock_date(&self, ticker: &str) -> Option<NaiveDate> {
        self.locked.get(ticker).copied()
    }

    /// Every underlying is locked. An empty basket is never autocalled.
    pub fn all_locked(&self) -> bool {
        !self.tickers.is_empty() && self.tickers.iter().all(|t| self.locked.contains_key(t))
    }

    pub fn lock_dates(&self) -> &BTreeMap<String, NaiveDate> {
        &self.locked
    }

    pub fn locked_count(&self) -> usize {
        self.locked.len()
    }

    /// Administrative correction only; evaluation never unlocks.
    pub fn reset(&mut self, ticker: &str) -> bool {
        let removed = self.locked.remove(ticker).is_some();
        if removed {
            log::info!("autocall lock reset for {ticker}");
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// Persistence seam
// ---------------------------------------------------------------------------

/// Storage of lock flags, keyed by product. Implementations must apply a
/// product's `persist` call atomically.
pub trait LockStore: Send + Sync {
    fn load(&self, product_id: &str) -> PayoffResult<BTreeSet<String>>;

    fn persist(&self, product_id: &str, newly_locked: &[String]) -> PayoffResult<()>;

    fn reset(&self, product_id: &str) -> PayoffResult<()>;
}

#[derive(Debug, Default)]
struct StoreInner {
    locks: BTreeMap<String, BTreeSet<String>>,
    writes: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `persist` calls that reached the store.
    pub fn write_count(&self) -> usize {
        self.inner.lock().map(|g| g.writes).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> PayoffError {
    PayoffError::Persistence("lock store mutex poisoned".into())
}

impl LockStore for InMemoryLockStore {
    fn load(&self, product_id: &str) -> PayoffResult<BTreeSet<String>> {
        let guard = self.inner.lock().map_err(poisoned)?;
        Ok(guard.locks.get(product_id).cloned().unwrap_or_default())
    }

    fn persist(&self, product_id: &str, newly_locked: &[String]) -> PayoffResult<()> {
        let mut guard = self.inner.lock().map_err(poisoned)?;
        guard
            .locks
            .entry(product_id.to_string())
            .or_default()
            .extend(newly_locked.iter().cloned());
        guard.writes += 1;
        Ok(())
    }

    fn reset(&self, product_id: &str) -> PayoffResult<()> {
        let mut guard = self.inner.lock().map_err(poisoned)?;
        guard.locks.remove(product_id);
        Ok(())
    }
}

/// Writes the locks that are derived but not yet stored. The store is only
/// touched when there is at least one new lock. Returns the tickers written.
pub fn sync_locks(
    store: &dyn LockStore,
    product_id: &str,
    derived: &BTreeSet<String>,
) -> PayoffResult<Vec<String>> {
    let stored = store.load(product_id)?;
    let newly: Vec<String> = derived.difference(&stored).cloned().collect();
    if !newly.is_empty() {
        store.persist(product_id, &newly)?;
    }
    Ok(newly)
}

/// Converts an autocall level quoted as a percentage of initial notional into
/// the magnitude the engine expects (100 -> 0, 90 -> 10).
pub fn level_to_magnitude(level: Percent) -> Percent {
    HUNDRED - level
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, 1).unwrap()
    }

    #[test]
    fn test_lock_is_monotonic() {
        let mut engine = AutocallLockEngine::new(["A", "B"]);
        let step = engine
            .observe(d(1), &[Some(dec!(2)), Some(dec!(-20))], dec!(0))
            .unwrap();
        assert_eq!(step.newly_locked, vec!["A".to_string()]);
        assert!(!step.all_locked);

        // A falls far below the level afterwards and stays locked
        let step = engine
            .observe(d(2), &[Some(dec!(-60)), Some(dec!(-20))], dec!(0))
            .unwrap();
        assert!(step.newly_locked.is_empty());
        assert!(engine.is_locked("A"));
        assert_eq!(engine.lock_date("A"), Some(d(1)));
    }

    #[test]
    fn test_all_locked_only_when_every_underlying_locked() {
        let mut engine = AutocallLockEngine::new(["A", "B", "C"]);
        engine
            .observe(d(1), &[Some(dec!(1)), Some(dec!(-6)), None], dec!(5))
            .unwrap();
        assert_eq!(engine.locked_count(), 1);
        let step = engine
            .observe(d(2), &[Some(dec!(-30)), Some(dec!(-5)), Some(dec!(0))], dec!(5))
            .unwrap();
        assert_eq!(step.newly_locked, vec!["B".to_string(), "C".to_string()]);
        assert!(step.all_locked);
    }

    #[test]
    fn test_missing_data_is_skipped_not_locked() {
        let mut engine = AutocallLockEngine::new(["A"]);
        let step = engine.observe(d(1), &[None], dec!(0)).unwrap();
        assert_eq!(step.skipped, vec!["A".to_string()]);
        assert!(!engine.is_locked("A"));
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let mut engine = AutocallLockEngine::new(["A", "B"]);
        assert!(engine.observe(d(1), &[Some(dec!(1))], dec!(0)).is_err());
    }

    #[test]
    fn test_reset_is_explicit() {
        let mut engine = AutocallLockEngine::new(["A"]);
        engine.observe(d(1), &[Some(dec!(1))], dec!(0)).unwrap();
        assert!(engine.reset("A"));
        assert!(!engine.is_locked("A"));
        assert!(!engine.reset("A"));
    }

    #[test]
    fn test_sync_writes_only_new_locks() {
        let store = InMemoryLockStore::new();
        let derived: BTreeSet<String> = ["A".to_string()].into_iter().collect();
        assert_eq!(sync_locks(&store, "P1", &derived).unwrap(), vec!["A".to_string()]);
        assert_eq!(store.write_count(), 1);

        // same derived set: nothing to write
        assert!(sync_locks(&store, "P1", &derived).unwrap().is_empty());
        assert_eq!(store.write_count(), 1);

        let more: BTreeSet<String> = ["A".to_string(), "B".to_string()].into_iter().collect();
        assert_eq!(sync_locks(&store, "P1", &more).unwrap(), vec!["B".to_string()]);
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.load("P1").unwrap(), more);

        store.reset("P1").unwrap();
        assert!(store.load("P1").unwrap().is_empty());
    }

    #[test]
    fn test_level_to_magnitude() {
        assert_eq!(level_to_magnitude(dec!(100)), dec!(0));
        assert_eq!(level_to_magnitude(dec!(85)), dec!(15));
    }
}
