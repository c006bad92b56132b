pub mod barrier;
pub mod basket;
pub mod evaluate;
pub mod redemption;
pub mod templates;
