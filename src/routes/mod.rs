//! Route definitions for the loan API

use axum::{routing::get, Router};

use crate::chain::ChainProvider;
use crate::handlers;
use crate::mirror::LoanMirror;
use crate::state::AppState;

mod contract;
mod loan;
mod wallet;

pub use contract::contract_routes;
pub use loan::loan_routes;
pub use wallet::wallet_routes;

/// Every API route, without middleware layers
pub fn api_router<P: ChainProvider, M: LoanMirror>(state: AppState<P, M>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check::<P, M>))
        .merge(wallet_routes())
        .merge(contract_routes())
        .merge(loan_routes())
        .with_state(state)
}
