//! Typed access to the loan contract
//!
//! The gateway is bound to one contract address and one loan book
//! ([`LoanKind`]). Reads decode ABI tuples into [`Loan`] immediately; writes
//! validate locally, then go through [`ChainClient::submit`] and
//! [`ChainClient::wait_for_confirmation`].

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use futures_util::future::try_join_all;
use thiserror::Error;

use crate::chain::{
    ChainClient, ChainError, ChainProvider, ContractLog, LogFilter, PendingTx, SignerBinding,
    TransactionReceipt,
};
use crate::loan::{Clock, FundingLoan, Lender, Loan, LoanKind, RepaymentLoan};

pub mod abi;
pub mod validate;

use abi::{IFundingLoans, IRepaymentLoans};
pub use validate::{InputError, LoanRequest, NewFundingLoan};

/// Largest block span requested from `eth_getLogs` at once; public nodes reject wider ranges
pub const MAX_BLOCK_RANGE: u64 = 5_000;

/// Split `[from, to]` into consecutive spans of at most [`MAX_BLOCK_RANGE`] blocks
pub fn block_chunks(from: u64, to: u64) -> Vec<(u64, u64)> {
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = to.min(start.saturating_add(MAX_BLOCK_RANGE - 1));
        chunks.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    chunks
}

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Loan {0} not found")]
    LoanNotFound(u64),

    #[error("{operation} is not available on a {kind} loan contract")]
    UnsupportedOperation {
        operation: &'static str,
        kind: LoanKind,
    },

    #[error("Contract rejected the transaction: {reason}")]
    ContractRejected {
        tx_hash: Option<TxHash>,
        reason: String,
    },

    #[error("Failed to decode contract data: {0}")]
    Decode(String),

    #[error(transparent)]
    Chain(ChainError),
}

impl From<ChainError> for GatewayError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::TransactionReverted { tx_hash, reason } => {
                GatewayError::ContractRejected { tx_hash, reason }
            }
            other => GatewayError::Chain(other),
        }
    }
}

impl From<alloy_sol_types::Error> for GatewayError {
    fn from(err: alloy_sol_types::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

/// Decoded contract event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    LoanCreated {
        loan_id: u64,
        borrower: Address,
        title: String,
        amount_required: U256,
    },
    DonatedToLoan {
        loan_id: u64,
        donor: Address,
        amount: U256,
    },
    LoanFunded {
        loan_id: u64,
        borrower: Address,
        total_amount: U256,
    },
}

impl ContractEvent {
    pub fn loan_id(&self) -> u64 {
        match self {
            ContractEvent::LoanCreated { loan_id, .. }
            | ContractEvent::DonatedToLoan { loan_id, .. }
            | ContractEvent::LoanFunded { loan_id, .. } => *loan_id,
        }
    }
}

/// A contract event with its position on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent {
    pub event: ContractEvent,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub log_index: u64,
}

/// Decode a funding-book log; `None` for logs of other events
pub fn decode_event(log: &ContractLog) -> Option<Result<ObservedEvent, GatewayError>> {
    let topic0 = *log.topics.first()?;
    let topics = log.topics.iter().copied();

    let event = if topic0 == IFundingLoans::LoanCreated::SIGNATURE_HASH {
        IFundingLoans::LoanCreated::decode_raw_log(topics, &log.data, true)
            .map_err(GatewayError::from)
            .and_then(|e| {
                Ok(ContractEvent::LoanCreated {
                    loan_id: abi::to_u64(e.loanId, "loanId")?,
                    borrower: e.borrower,
                    title: e.title,
                    amount_required: e.amountRequired,
                })
            })
    } else if topic0 == IFundingLoans::DonatedToLoan::SIGNATURE_HASH {
        IFundingLoans::DonatedToLoan::decode_raw_log(topics, &log.data, true)
            .map_err(GatewayError::from)
            .and_then(|e| {
                Ok(ContractEvent::DonatedToLoan {
                    loan_id: abi::to_u64(e.loanId, "loanId")?,
                    donor: e.donor,
                    amount: e.amount,
                })
            })
    } else if topic0 == IFundingLoans::LoanFunded::SIGNATURE_HASH {
        IFundingLoans::LoanFunded::decode_raw_log(topics, &log.data, true)
            .map_err(GatewayError::from)
            .and_then(|e| {
                Ok(ContractEvent::LoanFunded {
                    loan_id: abi::to_u64(e.loanId, "loanId")?,
                    borrower: e.borrower,
                    total_amount: e.totalAmount,
                })
            })
    } else {
        return None;
    };

    Some(event.map(|event| ObservedEvent {
        event,
        tx_hash: log.transaction_hash,
        block_number: log.block_number,
        log_index: log.log_index,
    }))
}

/// Typed operations over the configured loan contract
pub struct LoanContractGateway<P> {
    chain: Arc<ChainClient<P>>,
    kind: LoanKind,
    clock: Clock,
    deployment_block: u64,
}

impl<P: ChainProvider> LoanContractGateway<P> {
    pub fn new(chain: Arc<ChainClient<P>>, kind: LoanKind, clock: Clock) -> Self {
        Self {
            chain,
            kind,
            clock,
            deployment_block: 0,
        }
    }

    /// First block that can hold contract logs; history scans start here
    pub fn with_deployment_block(mut self, block: u64) -> Self {
        self.deployment_block = block;
        self
    }

    pub fn deployment_block(&self) -> u64 {
        self.deployment_block
    }

    pub fn chain(&self) -> &Arc<ChainClient<P>> {
        &self.chain
    }

    pub fn kind(&self) -> LoanKind {
        self.kind
    }

    pub fn now(&self) -> u64 {
        (self.clock)()
    }

    pub async fn contract_address(&self) -> Address {
        self.chain.contract_address().await
    }

    fn require(&self, kind: LoanKind, operation: &'static str) -> Result<(), GatewayError> {
        if self.kind != kind {
            return Err(GatewayError::UnsupportedOperation {
                operation,
                kind: self.kind,
            });
        }
        Ok(())
    }

    async fn read<C: SolCall>(&self, call: C) -> Result<C::Return, GatewayError> {
        let output = self.chain.call(Bytes::from(call.abi_encode())).await?;
        Ok(C::abi_decode_returns(&output, true)?)
    }

    async fn send<C: SolCall>(
        &self,
        signer: &SignerBinding,
        call: C,
        value: Option<U256>,
    ) -> Result<PendingTx, GatewayError> {
        Ok(self
            .chain
            .submit(signer, Bytes::from(call.abi_encode()), value)
            .await?)
    }

    // ===== Reads =====

    pub async fn owner(&self) -> Result<Address, GatewayError> {
        Ok(match self.kind {
            LoanKind::Repayment => self.read(IRepaymentLoans::ownerCall {}).await?._0,
            LoanKind::Funding => self.read(IFundingLoans::ownerCall {}).await?._0,
        })
    }

    /// Client-side gating only; the contract enforces ownership itself
    pub async fn is_admin(&self, address: Address) -> Result<bool, GatewayError> {
        Ok(self.owner().await? == address)
    }

    /// Number of loans in the book
    pub async fn loan_count(&self) -> Result<u64, GatewayError> {
        match self.kind {
            LoanKind::Repayment => {
                // loanCounter is the next id; ids start at 1
                let next = self.read(IRepaymentLoans::loanCounterCall {}).await?._0;
                Ok(abi::to_u64(next, "loanCounter")?.saturating_sub(1))
            }
            LoanKind::Funding => {
                let count = self.read(IFundingLoans::numberOfLoansCall {}).await?._0;
                abi::to_u64(count, "numberOfLoans")
            }
        }
    }

    /// Chain id of the loan at position `index` in the book
    fn id_at(&self, index: u64) -> u64 {
        match self.kind {
            LoanKind::Repayment => index + 1,
            LoanKind::Funding => index,
        }
    }

    async fn repayment_loan(&self, id: u64) -> Result<RepaymentLoan, GatewayError> {
        let raw = self
            .read(IRepaymentLoans::loansCall {
                loanId: U256::from(id),
            })
            .await?;

        // Unknown ids read back as the zero struct
        if raw.borrower == Address::ZERO {
            return Err(GatewayError::LoanNotFound(id));
        }
        abi::repayment_loan(raw)
    }

    async fn funding_page(&self, start: u64, count: u64) -> Result<Vec<FundingLoan>, GatewayError> {
        let records = self
            .read(IFundingLoans::getAllLoansCall {
                start: U256::from(start),
                count: U256::from(count),
            })
            .await?
            ._0;

        records
            .into_iter()
            .zip(start..)
            .map(|(record, id)| abi::funding_loan(id, record))
            .collect()
    }

    pub async fn get_loan(&self, id: u64) -> Result<Loan, GatewayError> {
        match self.kind {
            LoanKind::Repayment => Ok(Loan::Repayment(self.repayment_loan(id).await?)),
            LoanKind::Funding => {
                if id >= self.loan_count().await? {
                    return Err(GatewayError::LoanNotFound(id));
                }
                self.funding_page(id, 1)
                    .await?
                    .into_iter()
                    .next()
                    .map(Loan::Funding)
                    .ok_or(GatewayError::LoanNotFound(id))
            }
        }
    }

    /// Page of loans by position; `count` is clamped to what remains
    pub async fn get_all_loans(&self, start: u64, count: u64) -> Result<Vec<Loan>, GatewayError> {
        let total = self.loan_count().await?;
        if start >= total || count == 0 {
            return Ok(Vec::new());
        }
        let count = count.min(total - start);

        match self.kind {
            LoanKind::Repayment => {
                let reads = (start..start + count).map(|index| self.repayment_loan(self.id_at(index)));
                Ok(try_join_all(reads)
                    .await?
                    .into_iter()
                    .map(Loan::Repayment)
                    .collect())
            }
            LoanKind::Funding => Ok(self
                .funding_page(start, count)
                .await?
                .into_iter()
                .map(Loan::Funding)
                .collect()),
        }
    }

    pub async fn get_borrower_loans(&self, borrower: Address) -> Result<Vec<Loan>, GatewayError> {
        match self.kind {
            LoanKind::Repayment => {
                let ids = self
                    .read(IRepaymentLoans::borrowerLoansCall { borrower })
                    .await?
                    ._0;
                let reads = ids
                    .into_iter()
                    .map(|id| async move { self.repayment_loan(abi::to_u64(id, "loanId")?).await });
                Ok(try_join_all(reads)
                    .await?
                    .into_iter()
                    .map(Loan::Repayment)
                    .collect())
            }
            LoanKind::Funding => {
                let total = self.loan_count().await?;
                let loans = self.get_all_loans(0, total).await?;
                Ok(loans
                    .into_iter()
                    .filter(|loan| loan.borrower() == borrower)
                    .collect())
            }
        }
    }

    pub async fn get_lenders(&self, id: u64) -> Result<Vec<Lender>, GatewayError> {
        self.require(LoanKind::Funding, "getLenders")?;
        if id >= self.loan_count().await? {
            return Err(GatewayError::LoanNotFound(id));
        }

        let lenders = self
            .read(IFundingLoans::getLendersCall {
                loanId: U256::from(id),
            })
            .await?;
        Ok(abi::lenders(lenders._0, lenders._1))
    }

    pub async fn latest_block(&self) -> Result<u64, GatewayError> {
        Ok(self.chain.provider().block_number().await?)
    }

    /// Decoded events from one `eth_getLogs` request
    async fn events_in(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
        loan_id: Option<u64>,
    ) -> Result<Vec<ObservedEvent>, GatewayError> {
        let mut topics = vec![None];
        if let Some(id) = loan_id {
            topics.push(Some(B256::from(U256::from(id).to_be_bytes::<32>())));
        }

        let filter = LogFilter {
            address,
            from_block,
            to_block,
            topics,
        };

        let logs = self.chain.provider().logs(&filter).await?;
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_event(log) {
                Some(Ok(event)) => events.push(event),
                Some(Err(e)) => {
                    tracing::warn!(tx_hash = %log.transaction_hash, error = %e, "Skipping undecodable log");
                }
                None => {}
            }
        }
        Ok(events)
    }

    /// Funding-book events in `[from_block, to_block]`, optionally for one loan.
    ///
    /// Wide ranges are fetched in [`MAX_BLOCK_RANGE`] chunks.
    pub async fn loan_events(
        &self,
        from_block: u64,
        to_block: u64,
        loan_id: Option<u64>,
    ) -> Result<Vec<ObservedEvent>, GatewayError> {
        if self.kind != LoanKind::Funding {
            return Ok(Vec::new());
        }

        let address = self.contract_address().await;
        let mut events = Vec::new();
        for (from, to) in block_chunks(from_block, to_block) {
            events.extend(self.events_in(address, from, to, loan_id).await?);
        }
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    /// Every event of one loan since the deployment block
    pub async fn loan_history(&self, loan_id: u64) -> Result<Vec<ObservedEvent>, GatewayError> {
        let latest = self.latest_block().await?;
        self.loan_events(self.deployment_block, latest, Some(loan_id))
            .await
    }

    /// Transaction that created `loan_id`, when the chain can tell.
    ///
    /// Walks back from the head so a recent creation costs one request.
    pub async fn creation_tx(&self, loan_id: u64) -> Result<Option<ObservedEvent>, GatewayError> {
        if self.kind != LoanKind::Funding {
            return Ok(None);
        }

        let address = self.contract_address().await;
        let latest = self.latest_block().await?;
        for (from, to) in block_chunks(self.deployment_block, latest).into_iter().rev() {
            let created = self
                .events_in(address, from, to, Some(loan_id))
                .await?
                .into_iter()
                .find(|e| matches!(e.event, ContractEvent::LoanCreated { .. }));
            if created.is_some() {
                return Ok(created);
            }
        }
        Ok(None)
    }

    /// Id of the loan created by a confirmed `createLoan`
    pub fn created_loan_id(&self, receipt: &TransactionReceipt) -> Option<u64> {
        receipt
            .logs
            .iter()
            .filter_map(decode_event)
            .filter_map(Result::ok)
            .find_map(|e| match e.event {
                ContractEvent::LoanCreated { loan_id, .. } => Some(loan_id),
                _ => None,
            })
    }

    // ===== Writes =====
    //
    // Each write is sent from the binding the caller validated against.

    pub async fn submit_request_loan(
        &self,
        signer: &SignerBinding,
        request: &LoanRequest,
    ) -> Result<PendingTx, GatewayError> {
        self.require(LoanKind::Repayment, "requestLoan")?;
        validate::validate_loan_request(request)?;

        self.send(
            signer,
            IRepaymentLoans::requestLoanCall {
                amount: request.amount,
                interestRate: U256::from(request.interest_rate),
                repaymentPeriod: U256::from(request.period_seconds),
            },
            None,
        )
        .await
    }

    pub async fn submit_create_loan(
        &self,
        signer: &SignerBinding,
        loan: &NewFundingLoan,
    ) -> Result<PendingTx, GatewayError> {
        self.require(LoanKind::Funding, "createLoan")?;
        validate::validate_new_funding_loan(loan, self.now())?;

        self.send(
            signer,
            IFundingLoans::createLoanCall {
                title: loan.title.clone(),
                description: loan.description.clone(),
                amountRequired: loan.amount_required,
                deadline: U256::from(loan.deadline),
                documentLink: loan.document_link.clone(),
            },
            None,
        )
        .await
    }

    pub async fn submit_approve(&self, signer: &SignerBinding, id: u64) -> Result<PendingTx, GatewayError> {
        let loan_id = U256::from(id);
        match self.kind {
            LoanKind::Repayment => {
                self.send(signer, IRepaymentLoans::approveLoanCall { loanId: loan_id }, None)
                    .await
            }
            LoanKind::Funding => {
                self.send(signer, IFundingLoans::approveLoanCall { loanId: loan_id }, None)
                    .await
            }
        }
    }

    pub async fn submit_repay(
        &self,
        signer: &SignerBinding,
        loan: &RepaymentLoan,
        value_sent: U256,
    ) -> Result<PendingTx, GatewayError> {
        validate::validate_repayment(loan, value_sent)?;
        self.send(
            signer,
            IRepaymentLoans::repayLoanCall {
                loanId: U256::from(loan.id),
            },
            Some(value_sent),
        )
        .await
    }

    pub async fn submit_penalty(
        &self,
        signer: &SignerBinding,
        loan: &RepaymentLoan,
    ) -> Result<PendingTx, GatewayError> {
        validate::validate_penalty(loan, self.now())?;
        self.send(
            signer,
            IRepaymentLoans::applyPenaltyCall {
                loanId: U256::from(loan.id),
            },
            None,
        )
        .await
    }

    pub async fn submit_donation(
        &self,
        signer: &SignerBinding,
        loan: &FundingLoan,
        amount: U256,
    ) -> Result<PendingTx, GatewayError> {
        validate::validate_donation(loan, amount, self.now())?;
        self.send(
            signer,
            IFundingLoans::donateToLoanCall {
                loanId: U256::from(loan.id),
            },
            Some(amount),
        )
        .await
    }

    /// Wait for a submitted transaction using the configured timeout
    pub async fn confirm(&self, pending: &PendingTx) -> Result<TransactionReceipt, GatewayError> {
        let timeout = self.chain.options().confirmation_timeout;
        Ok(self.chain.wait_for_confirmation(pending, timeout).await?)
    }

    pub async fn repayment(&self, id: u64) -> Result<RepaymentLoan, GatewayError> {
        self.require(LoanKind::Repayment, "loans")?;
        self.repayment_loan(id).await
    }

    pub async fn funding(&self, id: u64) -> Result<FundingLoan, GatewayError> {
        self.require(LoanKind::Funding, "getAllLoans")?;
        match self.get_loan(id).await? {
            Loan::Funding(loan) => Ok(loan),
            Loan::Repayment(_) => Err(GatewayError::LoanNotFound(id)),
        }
    }

    // ===== Submit and confirm =====
    //
    // One-shot forms that bind the current signer themselves.

    pub async fn request_loan(&self, request: &LoanRequest) -> Result<TransactionReceipt, GatewayError> {
        let signer = self.chain.signer().await?;
        let pending = self.submit_request_loan(&signer, request).await?;
        self.confirm(&pending).await
    }

    /// Returns the new loan id when the receipt carries `LoanCreated`
    pub async fn create_loan(
        &self,
        loan: &NewFundingLoan,
    ) -> Result<(Option<u64>, TransactionReceipt), GatewayError> {
        let signer = self.chain.signer().await?;
        let pending = self.submit_create_loan(&signer, loan).await?;
        let receipt = self.confirm(&pending).await?;
        Ok((self.created_loan_id(&receipt), receipt))
    }

    pub async fn approve_loan(&self, id: u64) -> Result<TransactionReceipt, GatewayError> {
        let signer = self.chain.signer().await?;
        let pending = self.submit_approve(&signer, id).await?;
        self.confirm(&pending).await
    }

    pub async fn repay_loan(&self, id: u64, value_sent: U256) -> Result<TransactionReceipt, GatewayError> {
        let signer = self.chain.signer().await?;
        let loan = self.repayment(id).await?;
        let pending = self.submit_repay(&signer, &loan, value_sent).await?;
        self.confirm(&pending).await
    }

    pub async fn apply_penalty(&self, id: u64) -> Result<TransactionReceipt, GatewayError> {
        let signer = self.chain.signer().await?;
        let loan = self.repayment(id).await?;
        let pending = self.submit_penalty(&signer, &loan).await?;
        self.confirm(&pending).await
    }

    pub async fn donate_to_loan(&self, id: u64, amount: U256) -> Result<TransactionReceipt, GatewayError> {
        let signer = self.chain.signer().await?;
        let loan = self.funding(id).await?;
        let pending = self.submit_donation(&signer, &loan, amount).await?;
        self.confirm(&pending).await
    }
}
