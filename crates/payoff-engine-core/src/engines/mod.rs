pub mod autocall_lock;
pub mod memory_coupon;

pub use autocall_lock::{
    level_to_magnitude, sync_locks, AutocallLockEngine, InMemoryLockStore, LockStep, LockStore,
};
pub use memory_coupon::{replay_memory_coupons, CouponObservation, CouponStep, MemoryCouponState};
