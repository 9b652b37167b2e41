//! Signer binding, submission and confirmation over a [`ChainProvider`]

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, TxHash, U256};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;

use super::{BlockTag, ChainError, ChainProvider, TransactionReceipt, TransactionRequest};

/// Timing knobs for submission and confirmation
#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
        }
    }
}

/// The signer an operation was started with.
///
/// `generation` identifies the binding; any wallet or contract change bumps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerBinding {
    pub address: Address,
    pub chain_id: u64,
    pub generation: u64,
}

/// Handle for a submitted, not yet confirmed transaction
#[derive(Debug, Clone)]
pub struct PendingTx {
    pub tx_hash: TxHash,
    pub request: TransactionRequest,
    pub signer: SignerBinding,
}

/// Changes that invalidate the current binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    ContractChanged(Address),
    Disconnected,
}

/// Process-wide wallet session over a provider
pub struct ChainClient<P> {
    provider: P,
    contract: RwLock<Address>,
    binding: RwLock<Option<SignerBinding>>,
    generation: watch::Sender<u64>,
    options: ChainOptions,
}

/// Resolves once the published generation differs from `generation`
async fn invalidated(mut rx: watch::Receiver<u64>, generation: u64) {
    loop {
        if *rx.borrow_and_update() != generation {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl<P: ChainProvider> ChainClient<P> {
    pub fn new(provider: P, contract: Address, options: ChainOptions) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            provider,
            contract: RwLock::new(contract),
            binding: RwLock::new(None),
            generation,
            options,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    pub async fn contract_address(&self) -> Address {
        *self.contract.read().await
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Receiver notified on every invalidation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Bump the generation and build the replacement binding, if any
    fn next_binding(&self, next: Option<(Address, u64)>) -> Option<SignerBinding> {
        self.generation.send_modify(|g| *g += 1);
        let generation = *self.generation.borrow();
        next.map(|(address, chain_id)| SignerBinding {
            address,
            chain_id,
            generation,
        })
    }

    /// Request wallet access and bind the first exposed account
    pub async fn connect(&self) -> Result<SignerBinding, ChainError> {
        let accounts = self
            .provider
            .request_accounts()
            .await
            .map_err(|e| match e {
                ChainError::Transport(err) => ChainError::NoWalletFound(err.to_string()),
                other => other,
            })?;

        let address = *accounts
            .first()
            .ok_or_else(|| ChainError::NoWalletFound("wallet exposes no accounts".to_string()))?;
        let chain_id = self.provider.chain_id().await?;

        let mut binding = self.binding.write().await;
        let next = self
            .next_binding(Some((address, chain_id)))
            .ok_or(ChainError::NotConnected)?;
        *binding = Some(next);

        tracing::info!(
            address = %address,
            chain_id,
            generation = next.generation,
            "Wallet connected"
        );

        Ok(next)
    }

    pub async fn current_address(&self) -> Option<Address> {
        self.binding.read().await.map(|b| b.address)
    }

    pub async fn signer(&self) -> Result<SignerBinding, ChainError> {
        (*self.binding.read().await).ok_or(ChainError::NotConnected)
    }

    /// Fail with `StaleSigner` if `binding` has been superseded
    pub fn ensure_current(&self, binding: &SignerBinding) -> Result<(), ChainError> {
        if binding.generation != self.generation() {
            return Err(ChainError::StaleSigner);
        }
        Ok(())
    }

    /// Apply a wallet-side change, invalidating every operation started before it
    pub async fn handle_wallet_event(&self, event: WalletEvent) {
        let mut binding = self.binding.write().await;
        let previous = *binding;

        let next = match (&event, previous) {
            (WalletEvent::AccountsChanged(accounts), Some(current)) => accounts
                .first()
                .map(|&address| (address, current.chain_id)),
            (WalletEvent::ChainChanged(chain_id), Some(current)) => {
                Some((current.address, *chain_id))
            }
            (WalletEvent::ContractChanged(address), _) => {
                *self.contract.write().await = *address;
                None
            }
            (WalletEvent::Disconnected, _) => None,
            (_, None) => return,
        };

        *binding = self.next_binding(next);

        tracing::info!(
            event = ?event,
            generation = self.generation(),
            bound = binding.is_some(),
            "Signer binding invalidated"
        );
    }

    /// Point the session at another contract; requires reconnecting
    pub async fn set_contract_address(&self, address: Address) {
        self.handle_wallet_event(WalletEvent::ContractChanged(address))
            .await;
    }

    pub async fn disconnect(&self) {
        self.handle_wallet_event(WalletEvent::Disconnected).await;
    }

    /// Read-only call against the configured contract
    pub async fn call(&self, data: Bytes) -> Result<Bytes, ChainError> {
        let request = TransactionRequest {
            from: None,
            to: self.contract_address().await,
            data,
            value: None,
        };
        self.provider.call(&request, BlockTag::Latest).await
    }

    /// Submit a state-changing call from `signer` without waiting for it to be mined.
    ///
    /// `signer` is the binding the caller validated against; if it has been
    /// superseded nothing is sent and the call fails with `StaleSigner`.
    pub async fn submit(
        &self,
        signer: &SignerBinding,
        data: Bytes,
        value: Option<U256>,
    ) -> Result<PendingTx, ChainError> {
        let signer = *signer;
        let invalidation = invalidated(self.subscribe(), signer.generation);
        self.ensure_current(&signer)?;

        let request = TransactionRequest {
            from: Some(signer.address),
            to: self.contract_address().await,
            data,
            value: value.filter(|v| !v.is_zero()),
        };

        let tx_hash = tokio::select! {
            result = self.provider.send_transaction(&request) => result?,
            _ = invalidation => return Err(ChainError::StaleSigner),
        };

        tracing::info!(tx_hash = %tx_hash, from = %signer.address, "Transaction submitted");

        Ok(PendingTx {
            tx_hash,
            request,
            signer,
        })
    }

    async fn poll_receipt(&self, tx_hash: TxHash) -> TransactionReceipt {
        loop {
            match self.provider.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(tx_hash = %tx_hash, error = %e, "Receipt poll failed, retrying");
                }
            }
            sleep(self.options.receipt_poll_interval).await;
        }
    }

    /// Re-run the call at the mined block to recover the revert reason
    async fn revert_reason(&self, pending: &PendingTx, block_number: u64) -> String {
        match self
            .provider
            .call(&pending.request, BlockTag::Number(block_number))
            .await
        {
            Err(ChainError::TransactionReverted { reason, .. }) => reason,
            _ => "transaction reverted".to_string(),
        }
    }

    /// Wait until the transaction is mined.
    ///
    /// Fails with `StaleSigner` as soon as the binding it was submitted under is
    /// invalidated, even while the receipt is still outstanding.
    pub async fn wait_for_confirmation(
        &self,
        pending: &PendingTx,
        timeout: Duration,
    ) -> Result<TransactionReceipt, ChainError> {
        let invalidation = invalidated(self.subscribe(), pending.signer.generation);

        let receipt = tokio::select! {
            result = tokio::time::timeout(timeout, self.poll_receipt(pending.tx_hash)) => {
                result.map_err(|_| ChainError::TransactionTimedOut { tx_hash: pending.tx_hash })?
            }
            _ = invalidation => {
                tracing::warn!(tx_hash = %pending.tx_hash, "Signer changed while awaiting confirmation");
                return Err(ChainError::StaleSigner);
            }
        };

        if receipt.succeeded {
            tracing::info!(
                tx_hash = %receipt.transaction_hash,
                block = receipt.block_number,
                "Transaction confirmed"
            );
            return Ok(receipt);
        }

        let reason = self.revert_reason(pending, receipt.block_number).await;
        tracing::warn!(tx_hash = %pending.tx_hash, reason = %reason, "Transaction reverted");

        Err(ChainError::TransactionReverted {
            tx_hash: Some(pending.tx_hash),
            reason,
        })
    }

    /// Compare the wallet's exposed account and chain with the binding
    pub async fn poll_wallet(&self) -> Result<(), ChainError> {
        let Some(current) = *self.binding.read().await else {
            return Ok(());
        };

        let accounts = self.provider.accounts().await?;
        if accounts.first() != Some(&current.address) {
            self.handle_wallet_event(WalletEvent::AccountsChanged(accounts))
                .await;
            return Ok(());
        }

        let chain_id = self.provider.chain_id().await?;
        if chain_id != current.chain_id {
            self.handle_wallet_event(WalletEvent::ChainChanged(chain_id))
                .await;
        }

        Ok(())
    }

    /// Background loop translating wallet changes into invalidations
    pub async fn watch_wallet(self: Arc<Self>, interval: Duration) {
        tracing::info!("Wallet watcher started");

        loop {
            sleep(interval).await;
            if let Err(e) = self.poll_wallet().await {
                tracing::warn!(error = %e, "Wallet poll failed");
            }
        }
    }
}
