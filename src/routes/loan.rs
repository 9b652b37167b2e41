//! Loan route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::chain::ChainProvider;
use crate::handlers::loan;
use crate::mirror::LoanMirror;
use crate::state::AppState;

pub fn loan_routes<P: ChainProvider, M: LoanMirror>() -> Router<AppState<P, M>> {
    Router::new()
        .route(
            "/api/loans",
            get(loan::list_loans::<P, M>).post(loan::create_loan::<P, M>),
        )
        .route("/api/loans/request", post(loan::request_loan::<P, M>))
        .route("/api/loans/sync", post(loan::sync_loans::<P, M>))
        .route("/api/loans/:id", get(loan::get_loan::<P, M>))
        .route("/api/loans/:id/lenders", get(loan::get_lenders::<P, M>))
        .route("/api/loans/:id/donate", post(loan::donate::<P, M>))
        .route("/api/loans/:id/repay", post(loan::repay::<P, M>))
        .route("/api/loans/:id/approve", post(loan::approve::<P, M>))
        .route("/api/loans/:id/penalty", post(loan::apply_penalty::<P, M>))
        .route(
            "/api/borrowers/:address/loans",
            get(loan::get_borrower_loans::<P, M>),
        )
}
