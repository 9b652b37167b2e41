//! Loan domain: model, projection and time source

use std::sync::Arc;

pub mod model;
pub mod projector;

pub use model::{
    FundingLoan, Lender, Loan, LoanDonation, LoanEvent, LoanEventType, LoanKind, LoanStatus,
    RepaymentLoan,
};
pub use projector::{project, LoanDetail, LoanView};

/// Source of "now" in unix seconds
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp().max(0) as u64)
}

/// A clock frozen at `now`, for tests and replays
pub fn fixed_clock(now: u64) -> Clock {
    Arc::new(move || now)
}
