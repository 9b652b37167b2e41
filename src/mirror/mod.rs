//! Off-chain mirror of loan state
//!
//! The mirror is a cache for listing and history; the chain stays the source of
//! truth. Every write is idempotent: loans upsert by `(contract, chain id)`,
//! events insert once per `(transaction hash, event type)` and donations once
//! per `(transaction hash, log index)`.

use std::future::Future;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::loan::{projector, Loan, LoanDonation, LoanEvent, LoanKind, LoanStatus};
use crate::models::amount;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLoanMirror;
pub use postgres::PgLoanMirror;

/// Mirror errors
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    #[error("Mirror unavailable: {0}")]
    Unavailable(String),
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn wrote(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

/// Persisted snapshot of an on-chain loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirroredLoan {
    pub id: Uuid,
    pub contract: Address,
    pub kind: LoanKind,
    pub chain_loan_id: u64,
    pub borrower_id: Uuid,
    pub borrower: Address,
    pub title: Option<String>,
    pub description: Option<String>,
    pub document_link: Option<String>,
    #[serde(with = "amount")]
    pub amount: U256,
    pub interest_rate: Option<u64>,
    #[serde(serialize_with = "serialize_optional_amount")]
    pub total_repayment_amount: Option<U256>,
    pub deadline: u64,
    #[serde(with = "amount")]
    pub amount_collected: U256,
    #[serde(with = "amount")]
    pub amount_repaid: U256,
    pub approved: bool,
    pub status: LoanStatus,
    pub synced_at: DateTime<Utc>,
}

fn serialize_optional_amount<S: serde::Serializer>(
    value: &Option<U256>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => amount::serialize(v, serializer),
        None => serializer.serialize_none(),
    }
}

impl MirroredLoan {
    /// Snapshot `loan` with its status projected at `now`
    pub fn from_chain(contract: Address, loan: &Loan, borrower_id: Uuid, now: u64) -> Self {
        let status = projector::status(loan, now);
        let base = Self {
            id: Uuid::new_v4(),
            contract,
            kind: loan.kind(),
            chain_loan_id: loan.id(),
            borrower_id,
            borrower: loan.borrower(),
            title: None,
            description: None,
            document_link: None,
            amount: U256::ZERO,
            interest_rate: None,
            total_repayment_amount: None,
            deadline: loan.deadline(),
            amount_collected: U256::ZERO,
            amount_repaid: U256::ZERO,
            approved: loan.is_approved(),
            status,
            synced_at: Utc::now(),
        };

        match loan {
            Loan::Repayment(l) => Self {
                amount: l.principal,
                interest_rate: Some(l.interest_rate),
                total_repayment_amount: Some(l.total_repayment_amount),
                amount_repaid: l.amount_repaid,
                ..base
            },
            Loan::Funding(l) => Self {
                title: Some(l.title.clone()),
                description: Some(l.description.clone()),
                document_link: Some(l.document_link.clone()),
                amount: l.amount_required,
                amount_collected: l.amount_collected,
                ..base
            },
        }
    }

    /// Whether `next` would change anything an upsert is allowed to touch.
    ///
    /// Deadline and total repayment are fixed once approved, so they only count
    /// while the stored row is unapproved.
    pub fn differs_from(&self, next: &MirroredLoan) -> bool {
        self.amount_collected != next.amount_collected
            || self.amount_repaid != next.amount_repaid
            || self.approved != next.approved
            || self.status != next.status
            || (!self.approved
                && (self.deadline != next.deadline
                    || self.total_repayment_amount != next.total_repayment_amount))
    }

    /// Apply the mutable fields of `next`, keeping immutable ones
    pub fn apply(&mut self, next: &MirroredLoan) {
        if !self.approved {
            self.deadline = next.deadline;
            self.total_repayment_amount = next.total_repayment_amount;
        }
        self.amount_collected = next.amount_collected;
        self.amount_repaid = next.amount_repaid;
        self.approved = next.approved;
        self.status = next.status;
        self.synced_at = next.synced_at;
    }
}

/// Listing filter
#[derive(Debug, Clone, Default)]
pub struct LoanFilter {
    pub contract: Option<Address>,
    pub status: Option<LoanStatus>,
    pub borrower: Option<Address>,
    pub page: i64,
    pub limit: i64,
}

impl LoanFilter {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.limit
    }
}

/// Persistence port for the mirror
pub trait LoanMirror: Send + Sync + 'static {
    /// Cheap connectivity check for health reporting
    fn ping(&self) -> impl Future<Output = Result<(), MirrorError>> + Send;

    fn find_or_create_user_by_address(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Uuid, MirrorError>> + Send;

    fn find_loan_by_chain_id(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> impl Future<Output = Result<Option<MirroredLoan>, MirrorError>> + Send;

    /// Insert if absent, else update only the mutable fields
    fn upsert_loan(
        &self,
        loan: &MirroredLoan,
    ) -> impl Future<Output = Result<UpsertOutcome, MirrorError>> + Send;

    /// Returns whether a row was written
    fn insert_event_if_absent(
        &self,
        event: &LoanEvent,
    ) -> impl Future<Output = Result<bool, MirrorError>> + Send;

    /// Returns whether a row was written
    fn insert_donation_if_absent(
        &self,
        donation: &LoanDonation,
    ) -> impl Future<Output = Result<bool, MirrorError>> + Send;

    /// Page of mirrored loans and the total matching the filter
    fn list_loans(
        &self,
        filter: &LoanFilter,
    ) -> impl Future<Output = Result<(Vec<MirroredLoan>, i64), MirrorError>> + Send;

    fn donations_for_loan(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> impl Future<Output = Result<Vec<LoanDonation>, MirrorError>> + Send;

    fn events_for_loan(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> impl Future<Output = Result<Vec<LoanEvent>, MirrorError>> + Send;

    /// Last block fully ingested for `contract`
    fn load_cursor(
        &self,
        contract: Address,
    ) -> impl Future<Output = Result<Option<u64>, MirrorError>> + Send;

    fn save_cursor(
        &self,
        contract: Address,
        block: u64,
    ) -> impl Future<Output = Result<(), MirrorError>> + Send;

    fn load_contract_address(
        &self,
    ) -> impl Future<Output = Result<Option<Address>, MirrorError>> + Send;

    fn save_contract_address(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<(), MirrorError>> + Send;
}
