//! Wallet session HTTP handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::chain::{ChainProvider, SignerBinding};
use crate::error::ApiError;
use crate::mirror::LoanMirror;
use crate::models::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSession {
    pub signer: SignerBinding,
    pub is_admin: bool,
}

/// POST /api/wallet/connect - Ask the wallet for an account and bind it
pub async fn connect_wallet<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
) -> Result<Json<ApiResponse<WalletSession>>, ApiError> {
    let signer = state.chain().connect().await?;

    // Owner lookup failing should not undo a successful connect
    let is_admin = match state.gateway().is_admin(signer.address).await {
        Ok(is_admin) => is_admin,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read contract owner");
            false
        }
    };

    state
        .mirror()
        .find_or_create_user_by_address(signer.address)
        .await?;

    Ok(Json(ApiResponse::ok(WalletSession { signer, is_admin })))
}
