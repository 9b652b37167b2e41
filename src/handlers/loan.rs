//! Loan HTTP handlers
//!
//! Reads of a single loan always go to the chain; listings come from the
//! mirror. Commands return the freshly projected on-chain view.

use std::str::FromStr;

use alloy_primitives::{Address, U256};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::chain::ChainProvider;
use crate::commands::CommandOutcome;
use crate::error::{ApiError, ApiResult};
use crate::gateway::{LoanRequest, NewFundingLoan};
use crate::loan::{project, Lender, LoanDonation, LoanStatus, LoanView};
use crate::mirror::{LoanFilter, LoanMirror, MirroredLoan};
use crate::models::{amount, ApiResponse, PaginatedResponse, PaginationParams};
use crate::state::AppState;
use crate::sync::SyncReport;

const SECONDS_PER_DAY: u64 = 86_400;

fn parse_address(value: &str) -> Result<Address, ApiError> {
    Address::from_str(value.trim())
        .map_err(|_| ApiError::BadRequest(format!("Invalid address: {}", value)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListLoansQuery {
    pub status: Option<LoanStatus>,
    pub borrower: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLoanRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: String,
    #[serde(with = "amount")]
    pub amount_required: U256,
    /// Unix seconds
    pub deadline: u64,
    #[validate(url)]
    pub document_link: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RequestLoanRequest {
    #[serde(with = "amount")]
    pub amount: U256,
    #[validate(range(min = 1, max = 100))]
    pub interest_rate: u64,
    #[validate(range(min = 1, max = 3650))]
    pub repayment_period_days: u64,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    #[serde(with = "amount")]
    pub amount: U256,
}

#[derive(Debug, Serialize)]
pub struct LoanLenders {
    pub lenders: Vec<Lender>,
    pub donations: Vec<LoanDonation>,
}

// ===== Reads =====

/// GET /api/loans - Mirrored loans for the configured contract
pub async fn list_loans<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Query(query): Query<ListLoansQuery>,
) -> ApiResult<Json<ApiResponse<PaginatedResponse<MirroredLoan>>>> {
    let (page, limit) = PaginationParams {
        page: query.page,
        limit: query.limit,
    }
    .resolve();

    let borrower = query.borrower.as_deref().map(parse_address).transpose()?;

    let filter = LoanFilter {
        contract: Some(state.gateway().contract_address().await),
        status: query.status,
        borrower,
        page,
        limit,
    };

    let (data, total) = state.mirror().list_loans(&filter).await?;

    Ok(Json(ApiResponse::ok(PaginatedResponse {
        data,
        total,
        page,
        limit,
    })))
}

/// GET /api/loans/:id - Current on-chain state of one loan
pub async fn get_loan<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<ApiResponse<LoanView>>> {
    let gateway = state.gateway();
    let loan = gateway.get_loan(id).await?;
    Ok(Json(ApiResponse::ok(project(&loan, gateway.now()))))
}

/// GET /api/loans/:id/lenders - On-chain lenders plus mirrored donation history
pub async fn get_lenders<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<ApiResponse<LoanLenders>>> {
    let gateway = state.gateway();
    let lenders = gateway.get_lenders(id).await?;

    let donations = match state
        .mirror()
        .donations_for_loan(gateway.contract_address().await, id)
        .await
    {
        Ok(donations) => donations,
        Err(e) => {
            tracing::warn!(loan_id = id, error = %e, "Donation history unavailable");
            Vec::new()
        }
    };

    Ok(Json(ApiResponse::ok(LoanLenders { lenders, donations })))
}

/// GET /api/borrowers/:address/loans
pub async fn get_borrower_loans<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Path(address): Path<String>,
) -> ApiResult<Json<ApiResponse<Vec<LoanView>>>> {
    let borrower = parse_address(&address)?;
    let gateway = state.gateway();
    let now = gateway.now();

    let views = gateway
        .get_borrower_loans(borrower)
        .await?
        .iter()
        .map(|loan| project(loan, now))
        .collect();

    Ok(Json(ApiResponse::ok(views)))
}

// ===== Commands =====

/// POST /api/loans - Create a crowdfunded loan
pub async fn create_loan<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Json(request): Json<CreateLoanRequest>,
) -> ApiResult<Json<ApiResponse<CommandOutcome>>> {
    request.validate()?;

    let outcome = state
        .commands
        .create_loan(NewFundingLoan {
            title: request.title,
            description: request.description,
            amount_required: request.amount_required,
            deadline: request.deadline,
            document_link: request.document_link.unwrap_or_default(),
        })
        .await?;

    Ok(Json(ApiResponse::ok(outcome)))
}

/// POST /api/loans/request - Request an interest-bearing loan
pub async fn request_loan<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Json(request): Json<RequestLoanRequest>,
) -> ApiResult<Json<ApiResponse<CommandOutcome>>> {
    request.validate()?;

    let outcome = state
        .commands
        .request_loan(LoanRequest {
            amount: request.amount,
            interest_rate: request.interest_rate,
            period_seconds: request.repayment_period_days * SECONDS_PER_DAY,
        })
        .await?;

    Ok(Json(ApiResponse::ok(outcome)))
}

/// POST /api/loans/:id/donate
pub async fn donate<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Path(id): Path<u64>,
    Json(request): Json<AmountRequest>,
) -> ApiResult<Json<ApiResponse<CommandOutcome>>> {
    let outcome = state.commands.donate(id, request.amount).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

/// POST /api/loans/:id/repay
pub async fn repay<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Path(id): Path<u64>,
    Json(request): Json<AmountRequest>,
) -> ApiResult<Json<ApiResponse<CommandOutcome>>> {
    let outcome = state.commands.repay(id, request.amount).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

/// POST /api/loans/:id/approve
pub async fn approve<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<ApiResponse<CommandOutcome>>> {
    let outcome = state.commands.approve(id).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

/// POST /api/loans/:id/penalty
pub async fn apply_penalty<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<ApiResponse<CommandOutcome>>> {
    let outcome = state.commands.apply_penalty(id).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

/// POST /api/loans/sync - Reconcile the mirror with the chain
pub async fn sync_loans<P: ChainProvider, M: LoanMirror>(
    State(state): State<AppState<P, M>>,
) -> ApiResult<Json<ApiResponse<SyncReport>>> {
    let report = state.commands.sync_all().await?;
    Ok(Json(ApiResponse::ok(report)))
}
