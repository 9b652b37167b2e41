//! Contract settings HTTP handlers

use alloy_primitives::Address;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainProvider, SignerBinding};
use crate::config::update_contract_address;
use crate::error::ApiError;
use crate::loan::LoanKind;
use crate::mirror::LoanMirror;
use crate::models::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub address: Address,
    pub flavor: LoanKind,
    pub owner: Address,
    pub loan_count: u64,
    pub signer: Option<SignerBinding>,
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateContractAddressRequest {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct ContractAddressResponse {
    pub address: Address,
}

/// GET /api/contract - Configured contract and the caller's role on it
pub async fn get_contract<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
) -> Result<Json<ApiResponse<ContractInfo>>, ApiError> {
    let gateway = state.gateway();
    let owner = gateway.owner().await?;
    let loan_count = gateway.loan_count().await?;
    let signer = state.chain().signer().await.ok();

    Ok(Json(ApiResponse::ok(ContractInfo {
        address: gateway.contract_address().await,
        flavor: gateway.kind(),
        owner,
        loan_count,
        is_admin: signer.map_or(false, |s| s.address == owner),
        signer,
    })))
}

/// PUT /api/contract/address - Switch contracts; the wallet must reconnect afterwards
pub async fn update_address<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Json(request): Json<UpdateContractAddressRequest>,
) -> Result<Json<ApiResponse<ContractAddressResponse>>, ApiError> {
    let address =
        update_contract_address(state.chain(), state.mirror().as_ref(), &request.address).await?;

    Ok(Json(ApiResponse::ok(ContractAddressResponse { address })))
}
