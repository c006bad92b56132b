pub mod history;
pub mod threshold;

pub use history::{
    build_basket_series, performance_series, scan_for_touch, BasketPoint, TouchScan,
    UnderlyingSeries,
};
pub use threshold::{classify, classify_upper, BarrierProximity, BarrierStatus};
