//! API handlers

pub mod contract;
pub mod health;
pub mod loan;
pub mod wallet;

pub use health::health_check;
