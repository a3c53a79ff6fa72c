//! Rental booking core: date ranges, money and tiered pricing, availability,
//! the booking state machine and the orchestration that drives it from
//! checkout, payment and cancellation signals.

pub mod booking;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod limits;
pub mod model;
pub mod money;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod reaper;
pub mod rental_item;
pub mod store;
