//! In-process loan contract used by the integration tests.
//!
//! `FakeChain` implements `ChainProvider` by decoding calldata with the same
//! `sol!` bindings the gateway uses, applying the contract rules to an
//! in-memory book and emitting receipts and logs.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use alloy_sol_types::{SolCall, SolEvent, SolInterface};
use uuid::Uuid;

use mfuko_server::chain::{
    BlockTag, ChainClient, ChainError, ChainOptions, ChainProvider, ContractLog, LogFilter,
    TransactionReceipt, TransactionRequest,
};
use mfuko_server::commands::LoanCommandService;
use mfuko_server::gateway::abi::{IFundingLoans, IRepaymentLoans};
use mfuko_server::gateway::{LoanContractGateway, MAX_BLOCK_RANGE};
use mfuko_server::loan::{
    fixed_clock, FundingLoan, Lender, LoanDonation, LoanEvent, LoanKind, RepaymentLoan,
};
use mfuko_server::mirror::{
    InMemoryLoanMirror, LoanFilter, LoanMirror, MirrorError, MirroredLoan, UpsertOutcome,
};
use mfuko_server::sync::SyncEngine;

pub const NOW: u64 = 1_700_000_000;
pub const DAY: u64 = 86_400;
pub const CONTRACT: Address = Address::repeat_byte(0xcc);
pub const OWNER: Address = Address::repeat_byte(0x0a);
pub const BORROWER: Address = Address::repeat_byte(0xb0);
pub const LENDER: Address = Address::repeat_byte(0x1e);
pub const OTHER_LENDER: Address = Address::repeat_byte(0x2e);

pub fn wei(n: u64) -> U256 {
    U256::from(n)
}

fn tx_hash(nonce: u64) -> TxHash {
    B256::from(U256::from(nonce).to_be_bytes::<32>())
}

fn topic_matches(filter: &LogFilter, log: &ContractLog) -> bool {
    filter.topics.iter().enumerate().all(|(i, wanted)| match wanted {
        Some(topic) => log.topics.get(i) == Some(topic),
        None => true,
    })
}

pub struct FakeState {
    pub kind: LoanKind,
    pub owner: Address,
    pub accounts: Vec<Address>,
    pub chain_id: u64,
    pub now: u64,
    pub block: u64,
    pub repayment: Vec<RepaymentLoan>,
    pub funding: Vec<FundingLoan>,
    pub logs: Vec<ContractLog>,
    pub receipts: HashMap<TxHash, TransactionReceipt>,
    /// Receipts held back to simulate a transaction that is never mined in time
    pub withheld: HashMap<TxHash, TransactionReceipt>,
    pub withhold_receipts: bool,
    pub reject_sends: bool,
    pub last_revert: Option<String>,
    /// The next transaction reverts with this reason whatever it does
    pub force_revert: Option<String>,
    /// Reads of loans at or beyond this position fail
    pub fail_reads_from: Option<u64>,
    /// Every view call fails once a transaction has been sent
    pub fail_reads_after_send: bool,
    /// Widest `eth_getLogs` range the node accepts
    pub max_log_range: u64,
    pub pause_next_read: Option<Arc<ReadPause>>,
    pub sent: Vec<TransactionRequest>,
    pub nonce: u64,
}

#[derive(Clone)]
pub struct FakeChain(pub Arc<Mutex<FakeState>>);

impl FakeChain {
    pub fn new(kind: LoanKind) -> Self {
        Self(Arc::new(Mutex::new(FakeState {
            kind,
            owner: OWNER,
            accounts: vec![BORROWER],
            chain_id: 31337,
            now: NOW,
            block: 100,
            repayment: Vec::new(),
            funding: Vec::new(),
            logs: Vec::new(),
            receipts: HashMap::new(),
            withheld: HashMap::new(),
            withhold_receipts: false,
            reject_sends: false,
            last_revert: None,
            force_revert: None,
            fail_reads_from: None,
            fail_reads_after_send: false,
            max_log_range: MAX_BLOCK_RANGE,
            pause_next_read: None,
            sent: Vec::new(),
            nonce: 0,
        })))
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.0.lock().unwrap()
    }

    pub fn sent_count(&self) -> usize {
        self.state().sent.len()
    }

    /// Hold the next view call until the returned pause is released
    pub fn pause_next_read(&self) -> Arc<ReadPause> {
        let pause = Arc::new(ReadPause::default());
        self.state().pause_next_read = Some(pause.clone());
        pause
    }

    pub fn set_account(&self, account: Address) {
        self.state().accounts = vec![account];
    }

    pub fn release_receipts(&self) {
        let mut state = self.state();
        let withheld: Vec<_> = state.withheld.drain().collect();
        state.receipts.extend(withheld);
        state.withhold_receipts = false;
    }

    /// Insert a repayment loan directly, bypassing the contract rules
    pub fn seed_repayment(&self, loan: RepaymentLoan) {
        self.state().repayment.push(loan);
    }

    /// Insert a funding loan directly, emitting its creation log
    pub fn seed_funding(&self, loan: FundingLoan) {
        let mut state = self.state();
        let id = state.funding.len() as u64;
        state.nonce += 1;
        state.block += 1;
        let tx = tx_hash(state.nonce);
        let block = state.block;
        let event = IFundingLoans::LoanCreated {
            loanId: U256::from(id),
            borrower: loan.borrower,
            title: loan.title.clone(),
            amountRequired: loan.amount_required,
        };
        state.logs.push(log_of(&event, tx, block, 0));
        state.funding.push(FundingLoan { id, ..loan });
    }

    /// Change a loan's collected amount without emitting any log
    pub fn set_collected_silently(&self, id: u64, collected: U256) {
        self.state().funding[id as usize].amount_collected = collected;
    }
}

/// A view call parked mid-flight
#[derive(Default)]
pub struct ReadPause {
    pub reached: Notify,
    pub release: Notify,
}

fn log_of<E: SolEvent>(event: &E, tx: TxHash, block: u64, index: u64) -> ContractLog {
    let data = event.encode_log_data();
    ContractLog {
        address: CONTRACT,
        topics: data.topics().to_vec(),
        data: data.data.clone(),
        block_number: block,
        transaction_hash: tx,
        log_index: index,
    }
}

pub fn repayment_loan(id: u64, total: u64, repaid: u64, deadline: u64, approved: bool) -> RepaymentLoan {
    RepaymentLoan {
        id,
        borrower: BORROWER,
        principal: wei(total * 100 / 105),
        interest_rate: 5,
        repayment_deadline: deadline,
        total_repayment_amount: wei(total),
        amount_repaid: wei(repaid),
        is_approved: approved,
        is_repaid: repaid >= total,
    }
}

pub fn funding_loan(required: u64, collected: u64, deadline: u64) -> FundingLoan {
    FundingLoan {
        id: 0,
        borrower: BORROWER,
        title: "Tailoring shop".to_string(),
        description: "Two sewing machines".to_string(),
        amount_required: wei(required),
        deadline,
        amount_collected: wei(collected),
        document_link: String::new(),
        lenders: Vec::new(),
        approved: true,
    }
}

type LogBuilder = Box<dyn Fn(TxHash, u64, u64) -> ContractLog + Send>;
type Logs = Vec<LogBuilder>;

impl FakeState {
    fn encode_view(&self, data: &[u8]) -> Option<Result<Vec<u8>, ChainError>> {
        match self.kind {
            LoanKind::Repayment => {
                let call = IRepaymentLoans::IRepaymentLoansCalls::abi_decode(data, true).ok()?;
                use IRepaymentLoans::IRepaymentLoansCalls as C;
                Some(Ok(match call {
                    C::owner(_) => IRepaymentLoans::ownerCall::abi_encode_returns(&(self.owner,)),
                    C::loanCounter(_) => IRepaymentLoans::loanCounterCall::abi_encode_returns(&(
                        U256::from(self.repayment.len() as u64 + 1),
                    )),
                    C::loans(c) => {
                        let id = u64::try_from(c.loanId).unwrap_or(u64::MAX);
                        if let Some(limit) = self.fail_reads_from {
                            if id > limit {
                                return Some(Err(ChainError::Rpc {
                                    code: -32000,
                                    message: "node unavailable".to_string(),
                                }));
                            }
                        }
                        match id.checked_sub(1).and_then(|i| self.repayment.get(i as usize)) {
                            Some(l) => IRepaymentLoans::loansCall::abi_encode_returns(&(
                                U256::from(l.id),
                                l.borrower,
                                l.principal,
                                U256::from(l.interest_rate),
                                U256::from(l.repayment_deadline),
                                l.total_repayment_amount,
                                l.amount_repaid,
                                l.is_approved,
                                l.is_repaid,
                            )),
                            None => IRepaymentLoans::loansCall::abi_encode_returns(&(
                                U256::ZERO,
                                Address::ZERO,
                                U256::ZERO,
                                U256::ZERO,
                                U256::ZERO,
                                U256::ZERO,
                                U256::ZERO,
                                false,
                                false,
                            )),
                        }
                    }
                    C::borrowerLoans(c) => {
                        let ids: Vec<U256> = self
                            .repayment
                            .iter()
                            .filter(|l| l.borrower == c.borrower)
                            .map(|l| U256::from(l.id))
                            .collect();
                        IRepaymentLoans::borrowerLoansCall::abi_encode_returns(&(ids,))
                    }
                    _ => return None,
                }))
            }
            LoanKind::Funding => {
                let call = IFundingLoans::IFundingLoansCalls::abi_decode(data, true).ok()?;
                use IFundingLoans::IFundingLoansCalls as C;
                Some(Ok(match call {
                    C::owner(_) => IFundingLoans::ownerCall::abi_encode_returns(&(self.owner,)),
                    C::numberOfLoans(_) => IFundingLoans::numberOfLoansCall::abi_encode_returns(&(
                        U256::from(self.funding.len() as u64),
                    )),
                    C::getAllLoans(c) => {
                        let start = u64::try_from(c.start).unwrap_or(u64::MAX);
                        let count = u64::try_from(c.count).unwrap_or(u64::MAX);
                        if let Some(limit) = self.fail_reads_from {
                            if start >= limit {
                                return Some(Err(ChainError::Rpc {
                                    code: -32000,
                                    message: "node unavailable".to_string(),
                                }));
                            }
                        }
                        let records: Vec<IFundingLoans::FundingLoanRecord> = self
                            .funding
                            .iter()
                            .skip(start as usize)
                            .take(count as usize)
                            .map(|l| IFundingLoans::FundingLoanRecord {
                                borrower: l.borrower,
                                title: l.title.clone(),
                                description: l.description.clone(),
                                amountRequired: l.amount_required,
                                deadline: U256::from(l.deadline),
                                amountCollected: l.amount_collected,
                                documentLink: l.document_link.clone(),
                                lenders: l.lenders.iter().map(|x| x.address).collect(),
                                donations: l.lenders.iter().map(|x| x.amount).collect(),
                                approved: l.approved,
                            })
                            .collect();
                        IFundingLoans::getAllLoansCall::abi_encode_returns(&(records,))
                    }
                    C::getLenders(c) => {
                        let id = u64::try_from(c.loanId).unwrap_or(u64::MAX) as usize;
                        let lenders = self.funding.get(id).map(|l| l.lenders.clone()).unwrap_or_default();
                        IFundingLoans::getLendersCall::abi_encode_returns(&(
                            lenders.iter().map(|x| x.address).collect::<Vec<_>>(),
                            lenders.iter().map(|x| x.amount).collect::<Vec<_>>(),
                        ))
                    }
                    _ => return None,
                }))
            }
        }
    }

    /// Apply a state-changing call; returns the emitted events as log builders
    fn execute(&mut self, from: Address, data: &[u8], value: U256) -> Result<Logs, String> {
        let now = self.now;
        let mut logs: Logs = Vec::new();

        match self.kind {
            LoanKind::Repayment => {
                use IRepaymentLoans::IRepaymentLoansCalls as C;
                let call = IRepaymentLoans::IRepaymentLoansCalls::abi_decode(data, true)
                    .map_err(|e| e.to_string())?;
                match call {
                    C::requestLoan(c) => {
                        let rate = u64::try_from(c.interestRate).map_err(|e| e.to_string())?;
                        let period = u64::try_from(c.repaymentPeriod).map_err(|e| e.to_string())?;
                        let id = self.repayment.len() as u64 + 1;
                        self.repayment.push(RepaymentLoan {
                            id,
                            borrower: from,
                            principal: c.amount,
                            interest_rate: rate,
                            repayment_deadline: now + period,
                            total_repayment_amount: c.amount + c.amount * U256::from(rate) / U256::from(100u64),
                            amount_repaid: U256::ZERO,
                            is_approved: false,
                            is_repaid: false,
                        });
                    }
                    C::approveLoan(c) => {
                        if from != self.owner {
                            return Err("Only owner can call this function".to_string());
                        }
                        let loan = self.repayment_mut(c.loanId)?;
                        loan.is_approved = true;
                    }
                    C::repayLoan(c) => {
                        let loan = self.repayment_mut(c.loanId)?;
                        if loan.borrower != from {
                            return Err("Only the borrower can repay".to_string());
                        }
                        if !loan.is_approved || loan.is_repaid {
                            return Err("Loan is not repayable".to_string());
                        }
                        loan.amount_repaid += value;
                        if loan.amount_repaid >= loan.total_repayment_amount {
                            loan.is_repaid = true;
                        }
                    }
                    C::applyPenalty(c) => {
                        if from != self.owner {
                            return Err("Only owner can call this function".to_string());
                        }
                        let loan = self.repayment_mut(c.loanId)?;
                        if now <= loan.repayment_deadline || loan.is_repaid {
                            return Err("Loan is not overdue".to_string());
                        }
                        loan.total_repayment_amount += loan.total_repayment_amount / U256::from(10u64);
                    }
                    _ => return Err("not a transaction".to_string()),
                }
            }
            LoanKind::Funding => {
                use IFundingLoans::IFundingLoansCalls as C;
                let call = IFundingLoans::IFundingLoansCalls::abi_decode(data, true)
                    .map_err(|e| e.to_string())?;
                match call {
                    C::createLoan(c) => {
                        let deadline = u64::try_from(c.deadline).map_err(|e| e.to_string())?;
                        if deadline <= now {
                            return Err("The deadline should be a date in the future.".to_string());
                        }
                        let id = self.funding.len() as u64;
                        self.funding.push(FundingLoan {
                            id,
                            borrower: from,
                            title: c.title.clone(),
                            description: c.description,
                            amount_required: c.amountRequired,
                            deadline,
                            amount_collected: U256::ZERO,
                            document_link: c.documentLink,
                            lenders: Vec::new(),
                            approved: false,
                        });
                        let event = IFundingLoans::LoanCreated {
                            loanId: U256::from(id),
                            borrower: from,
                            title: c.title,
                            amountRequired: c.amountRequired,
                        };
                        logs.push(Box::new(move |tx, block, index| log_of(&event, tx, block, index)));
                    }
                    C::approveLoan(c) => {
                        if from != self.owner {
                            return Err("Only owner can call this function".to_string());
                        }
                        let loan = self.funding_mut(c.loanId)?;
                        loan.approved = true;
                    }
                    C::donateToLoan(c) => {
                        let loan = self.funding_mut(c.loanId)?;
                        if now >= loan.deadline {
                            return Err("This loan request has expired.".to_string());
                        }
                        if loan.amount_collected + value > loan.amount_required {
                            return Err("Donation exceeds the amount required.".to_string());
                        }
                        loan.amount_collected += value;
                        match loan.lenders.iter_mut().find(|l| l.address == from) {
                            Some(lender) => lender.amount += value,
                            None => loan.lenders.push(Lender {
                                address: from,
                                amount: value,
                            }),
                        }

                        let donated = IFundingLoans::DonatedToLoan {
                            loanId: c.loanId,
                            donor: from,
                            amount: value,
                        };
                        logs.push(Box::new(move |tx, block, index| log_of(&donated, tx, block, index)));

                        if loan.amount_collected == loan.amount_required {
                            let funded = IFundingLoans::LoanFunded {
                                loanId: c.loanId,
                                borrower: loan.borrower,
                                totalAmount: loan.amount_collected,
                            };
                            logs.push(Box::new(move |tx, block, index| log_of(&funded, tx, block, index)));
                        }
                    }
                    _ => return Err("not a transaction".to_string()),
                }
            }
        }

        Ok(logs)
    }

    fn repayment_mut(&mut self, id: U256) -> Result<&mut RepaymentLoan, String> {
        let id = u64::try_from(id).map_err(|e| e.to_string())?;
        id.checked_sub(1)
            .and_then(|i| self.repayment.get_mut(i as usize))
            .ok_or_else(|| "Loan does not exist".to_string())
    }

    fn funding_mut(&mut self, id: U256) -> Result<&mut FundingLoan, String> {
        let id = u64::try_from(id).map_err(|e| e.to_string())?;
        self.funding
            .get_mut(id as usize)
            .ok_or_else(|| "Loan does not exist".to_string())
    }
}

impl ChainProvider for FakeChain {
    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError> {
        let state = self.state();
        if state.reject_sends {
            return Err(ChainError::UserRejected);
        }
        Ok(state.accounts.clone())
    }

    async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
        Ok(self.state().accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.state().chain_id)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state().block)
    }

    async fn call(&self, request: &TransactionRequest, _: BlockTag) -> Result<Bytes, ChainError> {
        let pause = self.state().pause_next_read.take();
        if let Some(pause) = pause {
            pause.reached.notify_one();
            pause.release.notified().await;
        }

        let state = self.state();
        if state.fail_reads_after_send && !state.sent.is_empty() {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "node unavailable".to_string(),
            });
        }
        match state.encode_view(&request.data) {
            Some(result) => result.map(Bytes::from),
            None => match state.last_revert.clone() {
                Some(reason) => Err(ChainError::TransactionReverted {
                    tx_hash: None,
                    reason,
                }),
                None => Ok(Bytes::new()),
            },
        }
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, ChainError> {
        let mut state = self.state();
        if state.reject_sends {
            return Err(ChainError::UserRejected);
        }

        state.sent.push(request.clone());
        state.nonce += 1;
        state.block += 1;
        let tx = tx_hash(state.nonce);
        let block = state.block;

        let from = request.from.unwrap_or(Address::ZERO);
        let value = request.value.unwrap_or(U256::ZERO);
        let outcome = match state.force_revert.take() {
            Some(reason) => Err(reason),
            None => state.execute(from, &request.data, value),
        };

        let (succeeded, logs) = match outcome {
            Ok(builders) => {
                state.last_revert = None;
                let logs: Vec<ContractLog> = builders
                    .iter()
                    .enumerate()
                    .map(|(i, build)| build(tx, block, i as u64))
                    .collect();
                (true, logs)
            }
            Err(reason) => {
                state.last_revert = Some(reason);
                (false, Vec::new())
            }
        };

        state.logs.extend(logs.iter().cloned());
        let receipt = TransactionReceipt {
            transaction_hash: tx,
            block_number: block,
            succeeded,
            logs,
        };
        if state.withhold_receipts {
            state.withheld.insert(tx, receipt);
        } else {
            state.receipts.insert(tx, receipt);
        }

        Ok(tx)
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.state().receipts.get(&tx_hash).cloned())
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<ContractLog>, ChainError> {
        let state = self.state();
        let span = filter.to_block.saturating_sub(filter.from_block).saturating_add(1);
        if span > state.max_log_range {
            return Err(ChainError::Rpc {
                code: -32005,
                message: "query exceeds max block range".to_string(),
            });
        }

        Ok(state
            .logs
            .iter()
            .filter(|log| log.address == filter.address)
            .filter(|log| log.block_number >= filter.from_block && log.block_number <= filter.to_block)
            .filter(|log| topic_matches(filter, log))
            .cloned()
            .collect())
    }
}

/// In-memory mirror whose loan upserts can be switched to fail or hang
#[derive(Default)]
pub struct FlakyMirror {
    pub inner: InMemoryLoanMirror,
    pub fail_upserts: AtomicBool,
    pub hang_upserts: AtomicBool,
}

impl FlakyMirror {
    pub fn failing() -> Self {
        let mirror = Self::default();
        mirror.fail_upserts.store(true, Ordering::SeqCst);
        mirror
    }

    /// Upserts never complete, like a database stuck on a lock
    pub fn hanging() -> Self {
        let mirror = Self::default();
        mirror.hang_upserts.store(true, Ordering::SeqCst);
        mirror
    }
}

impl LoanMirror for FlakyMirror {
    async fn ping(&self) -> Result<(), MirrorError> {
        self.inner.ping().await
    }

    async fn find_or_create_user_by_address(&self, address: Address) -> Result<Uuid, MirrorError> {
        self.inner.find_or_create_user_by_address(address).await
    }

    async fn find_loan_by_chain_id(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> Result<Option<MirroredLoan>, MirrorError> {
        self.inner.find_loan_by_chain_id(contract, loan_id).await
    }

    async fn upsert_loan(&self, loan: &MirroredLoan) -> Result<UpsertOutcome, MirrorError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(MirrorError::Unavailable("connection refused".to_string()));
        }
        if self.hang_upserts.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.upsert_loan(loan).await
    }

    async fn insert_event_if_absent(&self, event: &LoanEvent) -> Result<bool, MirrorError> {
        self.inner.insert_event_if_absent(event).await
    }

    async fn insert_donation_if_absent(&self, donation: &LoanDonation) -> Result<bool, MirrorError> {
        self.inner.insert_donation_if_absent(donation).await
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<(Vec<MirroredLoan>, i64), MirrorError> {
        self.inner.list_loans(filter).await
    }

    async fn donations_for_loan(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> Result<Vec<LoanDonation>, MirrorError> {
        self.inner.donations_for_loan(contract, loan_id).await
    }

    async fn events_for_loan(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> Result<Vec<LoanEvent>, MirrorError> {
        self.inner.events_for_loan(contract, loan_id).await
    }

    async fn load_cursor(&self, contract: Address) -> Result<Option<u64>, MirrorError> {
        self.inner.load_cursor(contract).await
    }

    async fn save_cursor(&self, contract: Address, block: u64) -> Result<(), MirrorError> {
        self.inner.save_cursor(contract, block).await
    }

    async fn load_contract_address(&self) -> Result<Option<Address>, MirrorError> {
        self.inner.load_contract_address().await
    }

    async fn save_contract_address(&self, address: Address) -> Result<(), MirrorError> {
        self.inner.save_contract_address(address).await
    }
}

pub struct Harness<M> {
    pub fake: FakeChain,
    pub chain: Arc<ChainClient<FakeChain>>,
    pub gateway: Arc<LoanContractGateway<FakeChain>>,
    pub sync: Arc<SyncEngine<FakeChain, M>>,
    pub commands: Arc<LoanCommandService<FakeChain, M>>,
    pub mirror: Arc<M>,
}

pub const MIRROR_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

pub fn test_options() -> ChainOptions {
    ChainOptions {
        confirmation_timeout: Duration::from_millis(300),
        receipt_poll_interval: Duration::from_millis(5),
    }
}

pub fn harness(kind: LoanKind) -> Harness<InMemoryLoanMirror> {
    harness_with_mirror(kind, InMemoryLoanMirror::new())
}

pub fn harness_with_mirror<M: LoanMirror>(kind: LoanKind, mirror: M) -> Harness<M> {
    let fake = FakeChain::new(kind);
    let chain = Arc::new(ChainClient::new(fake.clone(), CONTRACT, test_options()));
    let gateway = Arc::new(LoanContractGateway::new(chain.clone(), kind, fixed_clock(NOW)));
    let mirror = Arc::new(mirror);
    let sync = Arc::new(SyncEngine::new(gateway.clone(), mirror.clone(), 2));
    let commands = Arc::new(
        LoanCommandService::new(sync.clone())
            .with_background_sync(false)
            .with_mirror_write_timeout(MIRROR_WRITE_TIMEOUT),
    );

    Harness {
        fake,
        chain,
        gateway,
        sync,
        commands,
        mirror,
    }
}
