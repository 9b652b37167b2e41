//! Centralized API error handling
//!
//! A single error type for API responses, mapping every domain error to an
//! HTTP status code and a stable error code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::chain::ChainError;
use crate::commands::CommandError;
use crate::config::{ConfigError, SettingsError};
use crate::gateway::GatewayError;
use crate::mirror::MirrorError;
use crate::sync::SyncError;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Stale signer: {0}")]
    StaleSigner(String),

    #[error("Contract rejected the transaction: {0}")]
    ContractRejected(String),

    #[error("Confirmation timed out: {0}")]
    ConfirmationTimeout(String),

    #[error("Transaction confirmed, loan not re-read: {0}")]
    ConfirmedNotRead(String),

    #[error("Wallet error: {0}")]
    WalletError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::StaleSigner(_) => "STALE_SIGNER",
            ApiError::ContractRejected(_) => "CONTRACT_REJECTED",
            ApiError::ConfirmationTimeout(_) => "CONFIRMATION_TIMEOUT",
            ApiError::ConfirmedNotRead(_) => "CONFIRMED_NOT_READ",
            ApiError::WalletError(_) => "WALLET_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) | ApiError::StaleSigner(_) => StatusCode::CONFLICT,
            ApiError::ContractRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ConfirmationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::WalletError(_) | ApiError::ConfirmedNotRead(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        // Log server errors
        match &self {
            ApiError::InternalError(_)
            | ApiError::DatabaseError(_)
            | ApiError::ServiceUnavailable(_) => {
                tracing::error!(error = %message, code = %error_code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %message, code = %error_code, "Client error occurred");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

// Conversions from domain errors

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::NoWalletFound(_) | ChainError::UserRejected => {
                ApiError::WalletError(err.to_string())
            }
            ChainError::NotConnected => ApiError::Unauthorized(err.to_string()),
            ChainError::StaleSigner => ApiError::StaleSigner(err.to_string()),
            ChainError::TransactionReverted { .. } => ApiError::ContractRejected(err.to_string()),
            ChainError::TransactionTimedOut { .. } => ApiError::ConfirmationTimeout(err.to_string()),
            ChainError::Rpc { .. } | ChainError::Transport(_) | ChainError::InvalidResponse(_) => {
                ApiError::ExternalServiceError(err.to_string())
            }
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Input(e) => ApiError::ValidationError(e.to_string()),
            GatewayError::LoanNotFound(_) => ApiError::NotFound(err.to_string()),
            GatewayError::UnsupportedOperation { .. } => ApiError::BadRequest(err.to_string()),
            GatewayError::ContractRejected { reason, .. } => ApiError::ContractRejected(reason),
            GatewayError::Decode(_) => ApiError::ExternalServiceError(err.to_string()),
            GatewayError::Chain(e) => e.into(),
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::InvalidInput(_) => ApiError::ValidationError(err.to_string()),
            CommandError::Unauthorized(message) => ApiError::Forbidden(message),
            CommandError::LoanNotFound(_) => ApiError::NotFound(err.to_string()),
            CommandError::Unsupported(message) => ApiError::BadRequest(message),
            CommandError::SubmissionError(e) => match e {
                ChainError::Rpc { .. } | ChainError::Transport(_) | ChainError::InvalidResponse(_) => {
                    ApiError::ExternalServiceError(e.to_string())
                }
                other => ApiError::WalletError(other.to_string()),
            },
            CommandError::ContractRejected { reason, .. } => ApiError::ContractRejected(reason),
            CommandError::ConfirmationTimeout { .. } => ApiError::ConfirmationTimeout(err.to_string()),
            CommandError::StaleSigner { .. } => ApiError::StaleSigner(err.to_string()),
            CommandError::UnresolvedSubmission { .. } => ApiError::Conflict(err.to_string()),
            CommandError::PostConfirmationRead { .. } => ApiError::ConfirmedNotRead(err.to_string()),
            CommandError::ChainRead(message) => ApiError::ExternalServiceError(message),
        }
    }
}

impl From<MirrorError> for ApiError {
    fn from(err: MirrorError) -> Self {
        match err {
            MirrorError::Unavailable(_) => ApiError::ServiceUnavailable(err.to_string()),
            _ => ApiError::DatabaseError(err.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Gateway(e) => e.into(),
            SyncError::Mirror(e) => e.into(),
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Config(ConfigError::InvalidContractAddress(message)) => {
                ApiError::ValidationError(message)
            }
            SettingsError::Config(e) => ApiError::BadRequest(e.to_string()),
            SettingsError::Mirror(e) => e.into(),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            _ => ApiError::DatabaseError(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;
