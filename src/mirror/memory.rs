//! In-process mirror, used by tests and database-less runs

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::Address;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{LoanFilter, LoanMirror, MirrorError, MirroredLoan, UpsertOutcome};
use crate::loan::{LoanDonation, LoanEvent, LoanEventType};

#[derive(Default)]
struct State {
    users: HashMap<Address, Uuid>,
    loans: BTreeMap<(Address, u64), MirroredLoan>,
    events: Vec<LoanEvent>,
    event_keys: HashMap<(String, LoanEventType), usize>,
    donations: Vec<LoanDonation>,
    donation_keys: HashMap<(String, u64), usize>,
    cursors: HashMap<Address, u64>,
    contract_address: Option<Address>,
    writes: usize,
}

#[derive(Default)]
pub struct InMemoryLoanMirror {
    state: RwLock<State>,
}

impl InMemoryLoanMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows written or changed since creation
    pub async fn write_count(&self) -> usize {
        self.state.read().await.writes
    }

    pub async fn loan_count(&self) -> usize {
        self.state.read().await.loans.len()
    }

    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }
}

impl LoanMirror for InMemoryLoanMirror {
    async fn ping(&self) -> Result<(), MirrorError> {
        Ok(())
    }

    async fn find_or_create_user_by_address(&self, address: Address) -> Result<Uuid, MirrorError> {
        let mut state = self.state.write().await;
        if let Some(id) = state.users.get(&address) {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        state.users.insert(address, id);
        state.writes += 1;
        Ok(id)
    }

    async fn find_loan_by_chain_id(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> Result<Option<MirroredLoan>, MirrorError> {
        Ok(self.state.read().await.loans.get(&(contract, loan_id)).cloned())
    }

    async fn upsert_loan(&self, loan: &MirroredLoan) -> Result<UpsertOutcome, MirrorError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let key = (loan.contract, loan.chain_loan_id);

        let outcome = match state.loans.get_mut(&key) {
            Some(stored) if !stored.differs_from(loan) => UpsertOutcome::Unchanged,
            Some(stored) => {
                stored.apply(loan);
                UpsertOutcome::Updated
            }
            None => {
                state.loans.insert(key, loan.clone());
                UpsertOutcome::Inserted
            }
        };

        if outcome.wrote() {
            state.writes += 1;
        }
        Ok(outcome)
    }

    async fn insert_event_if_absent(&self, event: &LoanEvent) -> Result<bool, MirrorError> {
        let mut state = self.state.write().await;
        let key = (event.transaction_hash.clone(), event.event_type);
        if state.event_keys.contains_key(&key) {
            return Ok(false);
        }
        let index = state.events.len();
        state.events.push(event.clone());
        state.event_keys.insert(key, index);
        state.writes += 1;
        Ok(true)
    }

    async fn insert_donation_if_absent(&self, donation: &LoanDonation) -> Result<bool, MirrorError> {
        self.find_or_create_user_by_address(donation.lender).await?;

        let key = (donation.transaction_hash.clone(), donation.log_index);
        let mut state = self.state.write().await;
        if state.donation_keys.contains_key(&key) {
            return Ok(false);
        }
        let index = state.donations.len();
        state.donations.push(donation.clone());
        state.donation_keys.insert(key, index);
        state.writes += 1;
        Ok(true)
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<(Vec<MirroredLoan>, i64), MirrorError> {
        let state = self.state.read().await;
        let matching: Vec<&MirroredLoan> = state
            .loans
            .values()
            .filter(|l| filter.contract.map_or(true, |c| l.contract == c))
            .filter(|l| filter.status.map_or(true, |s| l.status == s))
            .filter(|l| filter.borrower.map_or(true, |b| l.borrower == b))
            .collect();

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .rev()
            .skip(filter.offset().max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn donations_for_loan(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> Result<Vec<LoanDonation>, MirrorError> {
        Ok(self
            .state
            .read()
            .await
            .donations
            .iter()
            .filter(|d| d.contract == contract && d.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn events_for_loan(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> Result<Vec<LoanEvent>, MirrorError> {
        Ok(self
            .state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.contract == contract && e.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn load_cursor(&self, contract: Address) -> Result<Option<u64>, MirrorError> {
        Ok(self.state.read().await.cursors.get(&contract).copied())
    }

    async fn save_cursor(&self, contract: Address, block: u64) -> Result<(), MirrorError> {
        self.state.write().await.cursors.insert(contract, block);
        Ok(())
    }

    async fn load_contract_address(&self) -> Result<Option<Address>, MirrorError> {
        Ok(self.state.read().await.contract_address)
    }

    async fn save_contract_address(&self, address: Address) -> Result<(), MirrorError> {
        self.state.write().await.contract_address = Some(address);
        Ok(())
    }
}
