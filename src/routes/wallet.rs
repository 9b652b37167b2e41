//! Wallet session routes

use axum::{routing::post, Router};

use crate::chain::ChainProvider;
use crate::handlers::wallet;
use crate::mirror::LoanMirror;
use crate::state::AppState;

pub fn wallet_routes<P: ChainProvider, M: LoanMirror>() -> Router<AppState<P, M>> {
    Router::new().route("/api/wallet/connect", post(wallet::connect_wallet::<P, M>))
}
