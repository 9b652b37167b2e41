//! Client-side preconditions checked before anything is submitted

use alloy_primitives::U256;
use thiserror::Error;

use crate::loan::projector::repayment_status;
use crate::loan::{FundingLoan, LoanStatus, RepaymentLoan};

/// Input rejected locally; no transaction was sent
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Invalid loan parameters: {0}")]
    InvalidLoanParameters(String),

    #[error("Insufficient repayment: {required} required, {sent} sent")]
    InsufficientRepayment { required: U256, sent: U256 },

    #[error("Loan {loan_id} is not overdue (status: {status:?})")]
    NotOverdue { loan_id: u64, status: LoanStatus },

    #[error("Loan {loan_id} is fully funded or would be over-funded (remaining: {remaining})")]
    LoanFullyFunded { loan_id: u64, remaining: U256 },

    #[error("Loan {loan_id} cannot be repaid: {reason}")]
    NotRepayable { loan_id: u64, reason: &'static str },

    #[error("Donation window for loan {loan_id} has closed")]
    DonationWindowClosed { loan_id: u64 },

    #[error("Amount must be greater than zero")]
    ZeroAmount,
}

/// Parameters for `requestLoan`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRequest {
    pub amount: U256,
    /// Whole percent
    pub interest_rate: u64,
    pub period_seconds: u64,
}

/// Parameters for `createLoan`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFundingLoan {
    pub title: String,
    pub description: String,
    pub amount_required: U256,
    pub deadline: u64,
    pub document_link: String,
}

pub fn validate_loan_request(request: &LoanRequest) -> Result<(), InputError> {
    if request.amount.is_zero() {
        return Err(InputError::InvalidLoanParameters(
            "amount must be greater than zero".to_string(),
        ));
    }
    if request.interest_rate == 0 {
        return Err(InputError::InvalidLoanParameters(
            "interest rate must be greater than zero".to_string(),
        ));
    }
    if request.period_seconds == 0 {
        return Err(InputError::InvalidLoanParameters(
            "repayment period must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_new_funding_loan(loan: &NewFundingLoan, now: u64) -> Result<(), InputError> {
    if loan.title.trim().is_empty() {
        return Err(InputError::InvalidLoanParameters(
            "title must not be empty".to_string(),
        ));
    }
    if loan.amount_required.is_zero() {
        return Err(InputError::InvalidLoanParameters(
            "amount required must be greater than zero".to_string(),
        ));
    }
    if loan.deadline <= now {
        return Err(InputError::InvalidLoanParameters(
            "deadline must be in the future".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_repayment(loan: &RepaymentLoan, value_sent: U256) -> Result<(), InputError> {
    if !loan.is_approved {
        return Err(InputError::NotRepayable {
            loan_id: loan.id,
            reason: "loan is not approved",
        });
    }
    if loan.is_repaid {
        return Err(InputError::NotRepayable {
            loan_id: loan.id,
            reason: "loan is already repaid",
        });
    }

    let required = loan.outstanding();
    if value_sent < required {
        return Err(InputError::InsufficientRepayment {
            required,
            sent: value_sent,
        });
    }
    Ok(())
}

pub fn validate_penalty(loan: &RepaymentLoan, now: u64) -> Result<(), InputError> {
    let status = repayment_status(loan, now);
    if status != LoanStatus::Overdue {
        return Err(InputError::NotOverdue {
            loan_id: loan.id,
            status,
        });
    }
    Ok(())
}

pub fn validate_donation(loan: &FundingLoan, amount: U256, now: u64) -> Result<(), InputError> {
    if amount.is_zero() {
        return Err(InputError::ZeroAmount);
    }

    let remaining = loan.shortfall();
    if loan.is_funded() || amount > remaining {
        return Err(InputError::LoanFullyFunded {
            loan_id: loan.id,
            remaining,
        });
    }

    if now >= loan.deadline {
        return Err(InputError::DonationWindowClosed { loan_id: loan.id });
    }
    Ok(())
}
