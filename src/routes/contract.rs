//! Contract settings routes

use axum::{
    routing::{get, put},
    Router,
};

use crate::chain::ChainProvider;
use crate::handlers::contract;
use crate::mirror::LoanMirror;
use crate::state::AppState;

pub fn contract_routes<P: ChainProvider, M: LoanMirror>() -> Router<AppState<P, M>> {
    Router::new()
        .route("/api/contract", get(contract::get_contract::<P, M>))
        .route("/api/contract/address", put(contract::update_address::<P, M>))
}
