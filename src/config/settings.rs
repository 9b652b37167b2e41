//! Runtime contract address setting

use alloy_primitives::Address;
use thiserror::Error;

use super::{parse_contract_address, Config, ConfigError};
use crate::chain::{ChainClient, ChainProvider};
use crate::mirror::{LoanMirror, MirrorError};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

/// Address to start with: the persisted setting if there is one, else the
/// configured address, which is then persisted.
pub async fn load_contract_address<M: LoanMirror>(
    mirror: &M,
    config: &Config,
) -> Result<Address, SettingsError> {
    if let Some(stored) = mirror.load_contract_address().await? {
        if stored != config.contract_address {
            tracing::info!(
                stored = %stored,
                configured = %config.contract_address,
                "Using persisted contract address over configured one"
            );
        }
        return Ok(stored);
    }

    mirror.save_contract_address(config.contract_address).await?;
    Ok(config.contract_address)
}

/// Validate, persist and switch to a new contract address.
///
/// Switching invalidates the signer binding, so in-flight operations fail
/// with `StaleSigner` and the wallet has to reconnect.
pub async fn update_contract_address<P: ChainProvider, M: LoanMirror>(
    chain: &ChainClient<P>,
    mirror: &M,
    raw: &str,
) -> Result<Address, SettingsError> {
    let address = parse_contract_address(raw)?;
    mirror.save_contract_address(address).await?;
    chain.set_contract_address(address).await;

    tracing::info!(contract = %address, "Contract address updated");
    Ok(address)
}
