//! User-facing loan commands
//!
//! Every command runs `Validating → Submitting → Confirming → Syncing → Done`
//! and ends in `Failed` on the first error. Results are projected from a
//! fresh chain read, never from the mirror.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{Address, TxHash, U256};
use serde::Serialize;
use thiserror::Error;
use tokio::time::{sleep, Instant};

use crate::chain::{ChainError, ChainProvider, PendingTx, SignerBinding, TransactionReceipt};
use crate::gateway::validate::{
    validate_donation, validate_loan_request, validate_new_funding_loan, validate_penalty,
    validate_repayment,
};
use crate::gateway::{GatewayError, InputError, LoanContractGateway, LoanRequest, NewFundingLoan};
use crate::loan::{project, Loan, LoanView};
use crate::mirror::LoanMirror;
use crate::sync::{SyncEngine, SyncError, SyncReport};

/// Command errors
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Loan {0} not found")]
    LoanNotFound(u64),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Submission failed: {0}")]
    SubmissionError(ChainError),

    #[error("Contract rejected the transaction: {reason}")]
    ContractRejected {
        tx_hash: Option<TxHash>,
        reason: String,
    },

    #[error("Transaction {tx_hash} was not confirmed in time")]
    ConfirmationTimeout { tx_hash: TxHash },

    #[error("Signer changed before the operation finished")]
    StaleSigner { tx_hash: Option<TxHash> },

    #[error("An earlier submission {tx_hash} is still unresolved, sync before retrying")]
    UnresolvedSubmission { tx_hash: TxHash },

    /// The transaction landed; only the follow-up read failed
    #[error("Transaction {tx_hash} was confirmed but the loan could not be read back: {message}")]
    PostConfirmationRead { tx_hash: TxHash, message: String },

    #[error("Chain read failed: {0}")]
    ChainRead(String),
}

impl From<GatewayError> for CommandError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Input(e) => CommandError::InvalidInput(e),
            GatewayError::LoanNotFound(id) => CommandError::LoanNotFound(id),
            e @ GatewayError::UnsupportedOperation { .. } => CommandError::Unsupported(e.to_string()),
            GatewayError::ContractRejected { tx_hash, reason } => {
                CommandError::ContractRejected { tx_hash, reason }
            }
            GatewayError::Decode(message) => CommandError::ChainRead(message),
            GatewayError::Chain(ChainError::NotConnected) => {
                CommandError::Unauthorized("wallet is not connected".to_string())
            }
            GatewayError::Chain(ChainError::StaleSigner) => CommandError::StaleSigner { tx_hash: None },
            GatewayError::Chain(ChainError::TransactionTimedOut { tx_hash }) => {
                CommandError::ConfirmationTimeout { tx_hash }
            }
            GatewayError::Chain(e) => CommandError::ChainRead(e.to_string()),
        }
    }
}

impl From<ChainError> for CommandError {
    fn from(err: ChainError) -> Self {
        GatewayError::from(err).into()
    }
}

/// Wallet and RPC failures while sending are submission errors
fn submission_error(err: GatewayError) -> CommandError {
    match err {
        GatewayError::Chain(
            e @ (ChainError::NoWalletFound(_)
            | ChainError::UserRejected
            | ChainError::Rpc { .. }
            | ChainError::Transport(_)
            | ChainError::InvalidResponse(_)),
        ) => CommandError::SubmissionError(e),
        other => other.into(),
    }
}

fn confirmation_error(err: GatewayError, tx_hash: TxHash) -> CommandError {
    match err {
        GatewayError::ContractRejected { reason, .. } => CommandError::ContractRejected {
            tx_hash: Some(tx_hash),
            reason,
        },
        GatewayError::Chain(ChainError::StaleSigner) => CommandError::StaleSigner {
            tx_hash: Some(tx_hash),
        },
        other => other.into(),
    }
}

/// Any read failure after a confirmed transaction keeps its hash
fn post_confirmation_error(err: impl std::fmt::Display, tx_hash: TxHash) -> CommandError {
    CommandError::PostConfirmationRead {
        tx_hash,
        message: err.to_string(),
    }
}

impl CommandError {
    /// Outcomes after which the chain may have moved without us seeing it
    fn needs_resync(&self) -> bool {
        matches!(
            self,
            CommandError::ContractRejected { tx_hash: Some(_), .. }
                | CommandError::ConfirmationTimeout { .. }
                | CommandError::StaleSigner { tx_hash: Some(_) }
                | CommandError::PostConfirmationRead { .. }
        )
    }
}

/// Command lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStage {
    Idle,
    Validating,
    Submitting,
    Confirming,
    Syncing,
    Done,
    Failed,
}

/// Result of a successful command
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub view: LoanView,
    pub tx_hash: Option<TxHash>,
    /// Set when the chain succeeded but the mirror write failed or was still pending
    pub mirror_warning: Option<String>,
}

/// Stage tracker for one command invocation
struct CommandRun {
    command: &'static str,
    loan_id: Option<u64>,
}

impl CommandRun {
    fn start(command: &'static str, loan_id: Option<u64>) -> Self {
        let run = Self { command, loan_id };
        run.enter(CommandStage::Idle);
        run
    }

    fn enter(&self, stage: CommandStage) {
        tracing::info!(command = self.command, loan_id = ?self.loan_id, stage = ?stage, "Command stage");
    }

    fn fail(&self, err: CommandError) -> CommandError {
        tracing::warn!(
            command = self.command,
            loan_id = ?self.loan_id,
            stage = ?CommandStage::Failed,
            error = %err,
            "Command failed"
        );
        err
    }
}

/// A create/request whose confirmation timed out
#[derive(Debug, Clone, Copy)]
struct Submission {
    tx_hash: TxHash,
    submitted_at: Instant,
}

impl Submission {
    fn expired(&self, ttl: Duration) -> bool {
        self.submitted_at.elapsed() >= ttl
    }
}

type Unresolved = Arc<Mutex<HashMap<Address, Submission>>>;

fn forget(unresolved: &Unresolved, signer: Address, tx_hash: TxHash) {
    if let Ok(mut map) = unresolved.lock() {
        if map.get(&signer).map(|s| s.tx_hash) == Some(tx_hash) {
            map.remove(&signer);
        }
    }
}

/// Check receipts for unresolved submissions; forget those that landed or expired
async fn resolve_submissions<P: ChainProvider>(
    gateway: &LoanContractGateway<P>,
    unresolved: &Unresolved,
    ttl: Duration,
) {
    let snapshot: Vec<(Address, Submission)> = match unresolved.lock() {
        Ok(map) => map.iter().map(|(a, s)| (*a, *s)).collect(),
        Err(_) => return,
    };

    for (signer, submission) in snapshot {
        let tx_hash = submission.tx_hash;
        match gateway.chain().provider().transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => {
                tracing::info!(
                    signer = %signer,
                    tx_hash = %tx_hash,
                    succeeded = receipt.succeeded,
                    "Unresolved submission settled"
                );
                forget(unresolved, signer, tx_hash);
            }
            Ok(None) if submission.expired(ttl) => {
                tracing::warn!(
                    signer = %signer,
                    tx_hash = %tx_hash,
                    "Unresolved submission expired without a receipt, assuming it was dropped"
                );
                forget(unresolved, signer, tx_hash);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(tx_hash = %tx_hash, error = %e, "Receipt lookup failed");
            }
        }
    }
}

async fn sync_and_resolve<P: ChainProvider, M: LoanMirror>(
    sync: &SyncEngine<P, M>,
    unresolved: &Unresolved,
    ttl: Duration,
) -> Result<SyncReport, SyncError> {
    let report = sync.sync_all().await?;
    resolve_submissions(sync.gateway(), unresolved, ttl).await;
    Ok(report)
}

pub struct LoanCommandService<P, M> {
    gateway: Arc<LoanContractGateway<P>>,
    sync: Arc<SyncEngine<P, M>>,
    unresolved: Unresolved,
    unresolved_ttl: Duration,
    mirror_write_timeout: Duration,
    background_sync: bool,
}

impl<P: ChainProvider, M: LoanMirror> LoanCommandService<P, M> {
    pub const DEFAULT_MIRROR_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_UNRESOLVED_TTL: Duration = Duration::from_secs(900);

    pub fn new(sync: Arc<SyncEngine<P, M>>) -> Self {
        Self {
            gateway: sync.gateway().clone(),
            sync,
            unresolved: Arc::new(Mutex::new(HashMap::new())),
            unresolved_ttl: Self::DEFAULT_UNRESOLVED_TTL,
            mirror_write_timeout: Self::DEFAULT_MIRROR_WRITE_TIMEOUT,
            background_sync: true,
        }
    }

    /// Enable or disable the `sync_all` spawned after each command
    pub fn with_background_sync(mut self, enabled: bool) -> Self {
        self.background_sync = enabled;
        self
    }

    /// Longest wait for the single-loan mirror write before returning anyway
    pub fn with_mirror_write_timeout(mut self, timeout: Duration) -> Self {
        self.mirror_write_timeout = timeout;
        self
    }

    /// Age after which an unresolved submission no longer blocks its signer
    pub fn with_unresolved_ttl(mut self, ttl: Duration) -> Self {
        self.unresolved_ttl = ttl;
        self
    }

    pub fn gateway(&self) -> &Arc<LoanContractGateway<P>> {
        &self.gateway
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine<P, M>> {
        &self.sync
    }

    /// Unresolved, unexpired submission for `signer`, if any
    pub fn unresolved_submission(&self, signer: Address) -> Option<TxHash> {
        self.unresolved
            .lock()
            .ok()?
            .get(&signer)
            .filter(|s| !s.expired(self.unresolved_ttl))
            .map(|s| s.tx_hash)
    }

    fn spawn_resync(&self) {
        if !self.background_sync {
            return;
        }
        let sync = self.sync.clone();
        let unresolved = self.unresolved.clone();
        let ttl = self.unresolved_ttl;
        tokio::spawn(async move {
            if let Err(e) = sync_and_resolve(&sync, &unresolved, ttl).await {
                tracing::warn!(error = %e, "Background sync failed");
            }
        });
    }

    async fn signer(&self, run: &CommandRun) -> Result<SignerBinding, CommandError> {
        self.gateway
            .chain()
            .signer()
            .await
            .map_err(|e| run.fail(e.into()))
    }

    async fn require_admin(&self, run: &CommandRun, signer: &SignerBinding) -> Result<(), CommandError> {
        let is_admin = self
            .gateway
            .is_admin(signer.address)
            .await
            .map_err(|e| run.fail(e.into()))?;
        if !is_admin {
            return Err(run.fail(CommandError::Unauthorized(
                "only the contract owner can do this".to_string(),
            )));
        }
        Ok(())
    }

    fn ensure_resolved(&self, run: &CommandRun, signer: &SignerBinding) -> Result<(), CommandError> {
        let Ok(mut map) = self.unresolved.lock() else {
            return Ok(());
        };
        match map.get(&signer.address).copied() {
            Some(submission) if submission.expired(self.unresolved_ttl) => {
                tracing::warn!(
                    signer = %signer.address,
                    tx_hash = %submission.tx_hash,
                    "Unresolved submission expired, allowing a new one"
                );
                map.remove(&signer.address);
                Ok(())
            }
            Some(submission) => Err(run.fail(CommandError::UnresolvedSubmission {
                tx_hash: submission.tx_hash,
            })),
            None => Ok(()),
        }
    }

    async fn confirm(
        &self,
        run: &CommandRun,
        pending: &PendingTx,
        track_unresolved: bool,
    ) -> Result<TransactionReceipt, CommandError> {
        run.enter(CommandStage::Confirming);

        match self.gateway.confirm(pending).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                let err = confirmation_error(e, pending.tx_hash);
                if track_unresolved && matches!(err, CommandError::ConfirmationTimeout { .. }) {
                    if let Ok(mut map) = self.unresolved.lock() {
                        map.insert(
                            pending.signer.address,
                            Submission {
                                tx_hash: pending.tx_hash,
                                submitted_at: Instant::now(),
                            },
                        );
                    }
                }
                Err(self.fail_after_submit(run, err))
            }
        }
    }

    /// Fail a command whose transaction was sent, resyncing when its fate is unknown
    fn fail_after_submit(&self, run: &CommandRun, err: CommandError) -> CommandError {
        if err.needs_resync() {
            self.spawn_resync();
        }
        run.fail(err)
    }

    /// Mirror one loan from a spawned task, waiting at most `mirror_write_timeout`.
    ///
    /// Returns the warning to report; a write that outlives the wait keeps running.
    async fn mirror_loan(&self, loan: Loan) -> Option<String> {
        let loan_id = loan.id();
        let sync = self.sync.clone();
        let write = tokio::spawn(async move { sync.sync_loan(&loan).await });

        match tokio::time::timeout(self.mirror_write_timeout, write).await {
            Ok(Ok(Ok(_))) => None,
            Ok(Ok(Err(e))) => {
                tracing::warn!(loan_id, error = %e, "Mirror update failed after confirmed command");
                Some(e.to_string())
            }
            Ok(Err(e)) => {
                tracing::error!(loan_id, error = %e, "Mirror update task aborted");
                Some(format!("mirror update aborted: {}", e))
            }
            Err(_) => {
                tracing::warn!(
                    loan_id,
                    timeout_ms = self.mirror_write_timeout.as_millis() as u64,
                    "Mirror update still pending, continuing in background"
                );
                Some(format!(
                    "mirror update still pending after {}ms",
                    self.mirror_write_timeout.as_millis()
                ))
            }
        }
    }

    /// Re-read and project the loan a confirmed command touched, then mirror it
    async fn finish(
        &self,
        run: &CommandRun,
        loan_id: u64,
        tx_hash: TxHash,
    ) -> Result<CommandOutcome, CommandError> {
        run.enter(CommandStage::Syncing);

        let loan = self
            .gateway
            .get_loan(loan_id)
            .await
            .map_err(|e| self.fail_after_submit(run, post_confirmation_error(e, tx_hash)))?;
        let view = project(&loan, self.gateway.now());

        let mirror_warning = self.mirror_loan(loan).await;
        self.spawn_resync();

        run.enter(CommandStage::Done);
        Ok(CommandOutcome {
            view,
            tx_hash: Some(tx_hash),
            mirror_warning,
        })
    }

    /// Create a crowdfunded loan
    pub async fn create_loan(&self, loan: NewFundingLoan) -> Result<CommandOutcome, CommandError> {
        let run = CommandRun::start("create_loan", None);

        run.enter(CommandStage::Validating);
        let signer = self.signer(&run).await?;
        self.ensure_resolved(&run, &signer)?;
        validate_new_funding_loan(&loan, self.gateway.now()).map_err(|e| run.fail(e.into()))?;

        run.enter(CommandStage::Submitting);
        let pending = self
            .gateway
            .submit_create_loan(&signer, &loan)
            .await
            .map_err(|e| run.fail(submission_error(e)))?;

        let receipt = self.confirm(&run, &pending, true).await?;
        let tx_hash = pending.tx_hash;

        let loan_id = match self.gateway.created_loan_id(&receipt) {
            Some(id) => id,
            None => self
                .gateway
                .loan_count()
                .await
                .map_err(|e| self.fail_after_submit(&run, post_confirmation_error(e, tx_hash)))?
                .checked_sub(1)
                .ok_or_else(|| {
                    self.fail_after_submit(&run, post_confirmation_error("created loan not found", tx_hash))
                })?,
        };

        self.finish(&run, loan_id, tx_hash).await
    }

    /// Request an interest-bearing loan
    pub async fn request_loan(&self, request: LoanRequest) -> Result<CommandOutcome, CommandError> {
        let run = CommandRun::start("request_loan", None);

        run.enter(CommandStage::Validating);
        let signer = self.signer(&run).await?;
        self.ensure_resolved(&run, &signer)?;
        validate_loan_request(&request).map_err(|e| run.fail(e.into()))?;

        run.enter(CommandStage::Submitting);
        let pending = self
            .gateway
            .submit_request_loan(&signer, &request)
            .await
            .map_err(|e| run.fail(submission_error(e)))?;

        self.confirm(&run, &pending, true).await?;
        let tx_hash = pending.tx_hash;

        // requestLoan emits no event; the newest of the signer's loans is the one just created
        let loan_id = self
            .gateway
            .get_borrower_loans(signer.address)
            .await
            .map_err(|e| self.fail_after_submit(&run, post_confirmation_error(e, tx_hash)))?
            .iter()
            .map(Loan::id)
            .max()
            .ok_or_else(|| {
                self.fail_after_submit(&run, post_confirmation_error("requested loan not found", tx_hash))
            })?;

        self.finish(&run, loan_id, tx_hash).await
    }

    /// Contribute `amount` to a funding loan
    pub async fn donate(&self, loan_id: u64, amount: U256) -> Result<CommandOutcome, CommandError> {
        let run = CommandRun::start("donate", Some(loan_id));

        run.enter(CommandStage::Validating);
        let signer = self.signer(&run).await?;
        let loan = self
            .gateway
            .funding(loan_id)
            .await
            .map_err(|e| run.fail(e.into()))?;
        validate_donation(&loan, amount, self.gateway.now()).map_err(|e| run.fail(e.into()))?;

        run.enter(CommandStage::Submitting);
        let pending = self
            .gateway
            .submit_donation(&signer, &loan, amount)
            .await
            .map_err(|e| run.fail(submission_error(e)))?;

        self.confirm(&run, &pending, false).await?;
        self.finish(&run, loan_id, pending.tx_hash).await
    }

    /// Repay an approved loan; only its borrower may do so
    pub async fn repay(&self, loan_id: u64, value_sent: U256) -> Result<CommandOutcome, CommandError> {
        let run = CommandRun::start("repay", Some(loan_id));

        run.enter(CommandStage::Validating);
        let signer = self.signer(&run).await?;
        let loan = self
            .gateway
            .repayment(loan_id)
            .await
            .map_err(|e| run.fail(e.into()))?;
        if loan.borrower != signer.address {
            return Err(run.fail(CommandError::Unauthorized(
                "only the borrower can repay this loan".to_string(),
            )));
        }
        validate_repayment(&loan, value_sent).map_err(|e| run.fail(e.into()))?;

        run.enter(CommandStage::Submitting);
        let pending = self
            .gateway
            .submit_repay(&signer, &loan, value_sent)
            .await
            .map_err(|e| run.fail(submission_error(e)))?;

        self.confirm(&run, &pending, false).await?;
        self.finish(&run, loan_id, pending.tx_hash).await
    }

    /// Approve a pending loan; a no-op for loans already approved
    pub async fn approve(&self, loan_id: u64) -> Result<CommandOutcome, CommandError> {
        let run = CommandRun::start("approve", Some(loan_id));

        run.enter(CommandStage::Validating);
        let signer = self.signer(&run).await?;
        self.require_admin(&run, &signer).await?;
        let loan = self
            .gateway
            .get_loan(loan_id)
            .await
            .map_err(|e| run.fail(e.into()))?;

        if loan.is_approved() {
            tracing::info!(loan_id, "Loan already approved, nothing to submit");
            run.enter(CommandStage::Done);
            return Ok(CommandOutcome {
                view: project(&loan, self.gateway.now()),
                tx_hash: None,
                mirror_warning: None,
            });
        }

        run.enter(CommandStage::Submitting);
        let pending = self
            .gateway
            .submit_approve(&signer, loan_id)
            .await
            .map_err(|e| run.fail(submission_error(e)))?;

        self.confirm(&run, &pending, false).await?;
        self.finish(&run, loan_id, pending.tx_hash).await
    }

    /// Penalise an overdue loan
    pub async fn apply_penalty(&self, loan_id: u64) -> Result<CommandOutcome, CommandError> {
        let run = CommandRun::start("apply_penalty", Some(loan_id));

        run.enter(CommandStage::Validating);
        let signer = self.signer(&run).await?;
        self.require_admin(&run, &signer).await?;
        let loan = self
            .gateway
            .repayment(loan_id)
            .await
            .map_err(|e| run.fail(e.into()))?;
        validate_penalty(&loan, self.gateway.now()).map_err(|e| run.fail(e.into()))?;

        run.enter(CommandStage::Submitting);
        let pending = self
            .gateway
            .submit_penalty(&signer, &loan)
            .await
            .map_err(|e| run.fail(submission_error(e)))?;

        self.confirm(&run, &pending, false).await?;
        self.finish(&run, loan_id, pending.tx_hash).await
    }

    /// Full reconciliation; also settles unresolved submissions
    pub async fn sync_all(&self) -> Result<SyncReport, SyncError> {
        sync_and_resolve(&self.sync, &self.unresolved, self.unresolved_ttl).await
    }

    /// Background loop running `sync_all`
    pub async fn run_periodic_sync(self: Arc<Self>, interval: Duration) {
        tracing::info!(interval_secs = interval.as_secs(), "Periodic loan sync started");

        loop {
            sleep(interval).await;
            if let Err(e) = self.sync_all().await {
                tracing::error!(error = %e, "Periodic loan sync failed");
            }
        }
    }
}
