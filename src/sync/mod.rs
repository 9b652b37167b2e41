//! Chain to mirror reconciliation
//!
//! The chain is authoritative. [`SyncEngine::sync_all`] walks every loan in the
//! configured book and upserts it into the mirror; the event indexer follows
//! contract logs from a persisted block cursor and records events and
//! donations once each.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::time::sleep;

use crate::chain::ChainProvider;
use crate::gateway::{
    ContractEvent, GatewayError, LoanContractGateway, ObservedEvent, MAX_BLOCK_RANGE,
};
use crate::loan::{Loan, LoanDonation, LoanEvent, LoanEventType, LoanKind};
use crate::mirror::{LoanMirror, MirrorError, MirroredLoan, UpsertOutcome};

/// Sync errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Mirror sync failed: {0}")]
    Mirror(#[from] MirrorError),
}

/// Summary of one `sync_all` pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub total_on_chain: u64,
    /// Rows inserted or updated
    pub synced_count: u64,
    pub processed_count: u64,
    /// False when a page failed and pagination stopped early
    pub complete: bool,
    /// Funding loans whose mirrored donations still disagree with the chain
    pub drifted: Vec<u64>,
}

/// Deterministic key for a creation event whose transaction is unknown
pub fn synthetic_created_key(contract: Address, loan_id: u64) -> String {
    format!("sync:{:#x}:{}", contract, loan_id)
}

fn event_record(contract: Address, observed: &ObservedEvent) -> LoanEvent {
    let (event_type, data) = match &observed.event {
        ContractEvent::LoanCreated {
            borrower,
            title,
            amount_required,
            ..
        } => (
            LoanEventType::Created,
            json!({
                "borrower": format!("{:#x}", borrower),
                "title": title,
                "amountRequired": amount_required.to_string(),
            }),
        ),
        ContractEvent::DonatedToLoan { donor, amount, .. } => (
            LoanEventType::Donated,
            json!({
                "donor": format!("{:#x}", donor),
                "amount": amount.to_string(),
            }),
        ),
        ContractEvent::LoanFunded {
            borrower,
            total_amount,
            ..
        } => (
            LoanEventType::Funded,
            json!({
                "borrower": format!("{:#x}", borrower),
                "totalAmount": total_amount.to_string(),
            }),
        ),
    };

    LoanEvent {
        event_type,
        contract,
        loan_id: observed.event.loan_id(),
        transaction_hash: format!("{:#x}", observed.tx_hash),
        block_number: Some(observed.block_number),
        data,
    }
}

fn donation_record(contract: Address, observed: &ObservedEvent) -> Option<LoanDonation> {
    match &observed.event {
        ContractEvent::DonatedToLoan {
            loan_id,
            donor,
            amount,
        } => Some(LoanDonation {
            contract,
            loan_id: *loan_id,
            lender: *donor,
            amount: *amount,
            transaction_hash: format!("{:#x}", observed.tx_hash),
            log_index: observed.log_index,
            block_number: Some(observed.block_number),
        }),
        _ => None,
    }
}

pub struct SyncEngine<P, M> {
    gateway: Arc<LoanContractGateway<P>>,
    mirror: Arc<M>,
    page_size: u64,
}

impl<P: ChainProvider, M: LoanMirror> SyncEngine<P, M> {
    pub const DEFAULT_PAGE_SIZE: u64 = 10;

    pub fn new(gateway: Arc<LoanContractGateway<P>>, mirror: Arc<M>, page_size: u64) -> Self {
        Self {
            gateway,
            mirror,
            page_size: page_size.max(1),
        }
    }

    pub fn gateway(&self) -> &Arc<LoanContractGateway<P>> {
        &self.gateway
    }

    pub fn mirror(&self) -> &Arc<M> {
        &self.mirror
    }

    /// Mirror every loan in the book.
    ///
    /// A failing page stops pagination; pages already processed stay written
    /// and the report comes back with `complete = false`.
    pub async fn sync_all(&self) -> Result<SyncReport, SyncError> {
        let contract = self.gateway.contract_address().await;
        let total = self.gateway.loan_count().await?;

        let mut report = SyncReport {
            total_on_chain: total,
            complete: true,
            ..Default::default()
        };

        tracing::info!(contract = %contract, total, "Starting loan sync");

        let mut start = 0;
        'pages: while start < total {
            let page = match self.gateway.get_all_loans(start, self.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(start, error = %e, "Loan page read failed, stopping sync");
                    report.complete = false;
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            for loan in &page {
                match self.sync_loan(loan).await {
                    Ok(outcome) => {
                        report.processed_count += 1;
                        if outcome.wrote() {
                            report.synced_count += 1;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(loan_id = loan.id(), error = %e, "Loan sync failed, stopping sync");
                        report.complete = false;
                        break 'pages;
                    }
                }

                if let Loan::Funding(_) = loan {
                    match self.reconcile_donations(contract, loan).await {
                        Ok(true) => {}
                        Ok(false) => report.drifted.push(loan.id()),
                        Err(e) => {
                            tracing::warn!(loan_id = loan.id(), error = %e, "Donation reconciliation failed");
                            report.drifted.push(loan.id());
                        }
                    }
                }
            }

            start += page.len() as u64;
        }

        tracing::info!(
            total_on_chain = report.total_on_chain,
            synced = report.synced_count,
            processed = report.processed_count,
            complete = report.complete,
            drifted = report.drifted.len(),
            "Loan sync finished"
        );

        Ok(report)
    }

    /// Insert or refresh one loan.
    ///
    /// New rows also get a `Created` event; existing rows only change their
    /// mutable fields, and nothing is written when those already match.
    pub async fn sync_loan(&self, loan: &Loan) -> Result<UpsertOutcome, SyncError> {
        let contract = self.gateway.contract_address().await;
        let now = self.gateway.now();

        if let Some(stored) = self.mirror.find_loan_by_chain_id(contract, loan.id()).await? {
            let next = MirroredLoan::from_chain(contract, loan, stored.borrower_id, now);
            if !stored.differs_from(&next) {
                return Ok(UpsertOutcome::Unchanged);
            }
            return Ok(self.mirror.upsert_loan(&next).await?);
        }

        let borrower_id = self
            .mirror
            .find_or_create_user_by_address(loan.borrower())
            .await?;
        let row = MirroredLoan::from_chain(contract, loan, borrower_id, now);
        let outcome = self.mirror.upsert_loan(&row).await?;

        if outcome == UpsertOutcome::Inserted {
            self.record_created(contract, loan).await?;
        }

        tracing::debug!(loan_id = loan.id(), outcome = ?outcome, "Loan mirrored");
        Ok(outcome)
    }

    async fn record_created(&self, contract: Address, loan: &Loan) -> Result<bool, SyncError> {
        let creation = match self.gateway.creation_tx(loan.id()).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(loan_id = loan.id(), error = %e, "Creation transaction lookup failed");
                None
            }
        };

        let event = match creation {
            Some(observed) => event_record(contract, &observed),
            None => LoanEvent {
                event_type: LoanEventType::Created,
                contract,
                loan_id: loan.id(),
                transaction_hash: synthetic_created_key(contract, loan.id()),
                block_number: None,
                data: json!({
                    "borrower": format!("{:#x}", loan.borrower()),
                    "source": "sync",
                }),
            },
        };

        self.record_event(&event).await
    }

    /// Insert an event unless its (transaction, type) key is already stored
    pub async fn record_event(&self, event: &LoanEvent) -> Result<bool, SyncError> {
        let written = self.mirror.insert_event_if_absent(event).await?;
        if written {
            tracing::debug!(
                loan_id = event.loan_id,
                event_type = ?event.event_type,
                tx_hash = %event.transaction_hash,
                "Loan event recorded"
            );
        }
        Ok(written)
    }

    /// Insert a donation unless its (transaction, log index) key is already stored
    pub async fn record_donation(&self, donation: &LoanDonation) -> Result<bool, SyncError> {
        let written = self.mirror.insert_donation_if_absent(donation).await?;
        if written {
            tracing::debug!(
                loan_id = donation.loan_id,
                lender = %donation.lender,
                amount = %donation.amount,
                "Donation recorded"
            );
        }
        Ok(written)
    }

    async fn donation_total(&self, contract: Address, loan_id: u64) -> Result<U256, SyncError> {
        Ok(self
            .mirror
            .donations_for_loan(contract, loan_id)
            .await?
            .iter()
            .fold(U256::ZERO, |sum, d| sum.saturating_add(d.amount)))
    }

    /// Backfill donations from logs when the mirrored sum disagrees with
    /// `amount_collected`. Returns whether the two agree afterwards.
    async fn reconcile_donations(&self, contract: Address, loan: &Loan) -> Result<bool, SyncError> {
        let Loan::Funding(funding) = loan else {
            return Ok(true);
        };
        if self.donation_total(contract, funding.id).await? == funding.amount_collected {
            return Ok(true);
        }

        let events = self.gateway.loan_history(funding.id).await?;
        for observed in &events {
            if let Some(donation) = donation_record(contract, observed) {
                self.record_event(&event_record(contract, observed)).await?;
                self.record_donation(&donation).await?;
            }
        }

        let mirrored = self.donation_total(contract, funding.id).await?;
        if mirrored != funding.amount_collected {
            tracing::warn!(
                loan_id = funding.id,
                mirrored = %mirrored,
                on_chain = %funding.amount_collected,
                "Donation history drifted from chain"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Record every contract event in `[from_block, to_block]` and refresh the
    /// loans they touch. Returns the number of newly recorded events.
    pub async fn ingest_logs(&self, from_block: u64, to_block: u64) -> Result<usize, SyncError> {
        let contract = self.gateway.contract_address().await;
        let events = self.gateway.loan_events(from_block, to_block, None).await?;

        let mut recorded = 0;
        let mut touched = BTreeSet::new();
        for observed in &events {
            if self.record_event(&event_record(contract, observed)).await? {
                recorded += 1;
            }
            if let Some(donation) = donation_record(contract, observed) {
                self.record_donation(&donation).await?;
            }
            touched.insert(observed.event.loan_id());
        }

        for loan_id in touched {
            match self.gateway.get_loan(loan_id).await {
                Ok(loan) => {
                    self.sync_loan(&loan).await?;
                }
                Err(e) => {
                    tracing::warn!(loan_id, error = %e, "Could not refresh loan after event");
                }
            }
        }

        Ok(recorded)
    }

    /// Advance the block cursor by one batch
    pub async fn index_once(&self) -> Result<usize, SyncError> {
        if self.gateway.kind() != LoanKind::Funding {
            return Ok(0);
        }

        let contract = self.gateway.contract_address().await;
        let latest = self.gateway.latest_block().await?;
        let cursor = self.mirror.load_cursor(contract).await?;
        let first = self.gateway.deployment_block();

        let from = match cursor {
            Some(last) if last > latest => {
                tracing::warn!(last, latest, "Cursor ahead of chain head, rescanning");
                first
            }
            Some(last) => (last + 1).max(first),
            None => first,
        };
        if from > latest {
            return Ok(0);
        }

        let to = latest.min(from.saturating_add(MAX_BLOCK_RANGE - 1));
        let recorded = self.ingest_logs(from, to).await?;
        self.mirror.save_cursor(contract, to).await?;

        if recorded > 0 {
            tracing::info!(from, to, recorded, "Indexed loan events");
        }
        Ok(recorded)
    }

    /// Background loop following contract logs
    pub async fn run_event_indexer(self: Arc<Self>, interval: Duration) {
        tracing::info!(kind = %self.gateway.kind(), "Loan event indexer started");

        loop {
            if let Err(e) = self.index_once().await {
                tracing::error!(error = %e, "Error indexing loan events");
            }
            sleep(interval).await;
        }
    }
}
