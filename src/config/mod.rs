//! Configuration management for the loan server
//!
//! Loads and validates configuration from environment variables, with support
//! for different environments (development, staging, production).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use thiserror::Error;

use crate::chain::ChainOptions;
use crate::loan::LoanKind;

mod settings;

pub use settings::{load_contract_address, update_contract_address, SettingsError};

/// Contract the dapp was deployed against; used when nothing else is configured
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0xe46B96B92543AA5E843d21A1bbE63320Eb1e9f49";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),

    #[error("Invalid contract address: {0}")]
    InvalidContractAddress(String),
}

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Parse a contract address of the form `0x` followed by 40 hex digits
pub fn parse_contract_address(value: &str) -> Result<Address, ConfigError> {
    let trimmed = value.trim();
    let well_formed = trimmed
        .strip_prefix("0x")
        .map(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false);

    if !well_formed {
        return Err(ConfigError::InvalidContractAddress(format!(
            "'{}' must be 0x followed by 40 hex characters",
            value
        )));
    }

    Address::from_str(trimmed).map_err(|e| ConfigError::InvalidContractAddress(e.to_string()))
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// EVM JSON-RPC endpoint of the wallet
    pub wallet_rpc_url: String,

    /// Loan contract address
    pub contract_address: Address,

    /// Whether the address came from the environment rather than the default
    pub contract_address_explicit: bool,

    /// Which loan book the contract implements
    pub loan_flavor: LoanKind,

    /// Block the contract was deployed in; log scans never start earlier
    pub deployment_block: u64,

    pub environment: Environment,

    pub port: u16,

    pub db_max_connections: u32,

    /// CORS allowed origins, comma separated
    pub cors_allowed_origins: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,

    pub confirmation_timeout: Duration,

    pub receipt_poll_interval: Duration,

    /// Interval between background `sync_all` runs
    pub sync_interval: Duration,

    /// Loans read per `getAllLoans` page
    pub sync_page_size: u64,

    pub wallet_poll_interval: Duration,

    pub indexer_poll_interval: Duration,

    /// How long a command waits for its mirror write before reporting a warning
    pub mirror_write_timeout: Duration,

    /// Age after which an unconfirmed create/request stops blocking its signer
    pub unresolved_submission_ttl: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .map(|s| s.parse::<Environment>())
            .unwrap_or(Ok(Environment::Development))?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let wallet_rpc_url =
            env::var("WALLET_RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string());

        let (contract_address, contract_address_explicit) = match env::var("LOAN_CONTRACT_ADDRESS") {
            Ok(value) => (parse_contract_address(&value)?, true),
            Err(_) => (parse_contract_address(DEFAULT_CONTRACT_ADDRESS)?, false),
        };

        if environment.is_production() && !contract_address_explicit {
            return Err(ConfigError::MissingEnvVar(
                "LOAN_CONTRACT_ADDRESS (required in production)".to_string(),
            ));
        }

        let loan_flavor = env::var("LOAN_CONTRACT_FLAVOR")
            .unwrap_or_else(|_| "funding".to_string())
            .parse::<LoanKind>()
            .map_err(ConfigError::InvalidValue)?;

        let deployment_block = parse_or("LOAN_CONTRACT_DEPLOYMENT_BLOCK", 0u64);

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", 5u32);

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS").ok();

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let defaults = ChainOptions::default();
        let confirmation_timeout = Duration::from_secs(parse_or(
            "CONFIRMATION_TIMEOUT_SECS",
            defaults.confirmation_timeout.as_secs(),
        ));
        let receipt_poll_interval = Duration::from_millis(parse_or(
            "RECEIPT_POLL_INTERVAL_MS",
            defaults.receipt_poll_interval.as_millis() as u64,
        ));

        let sync_interval = Duration::from_secs(parse_or("SYNC_INTERVAL_SECS", 300u64));
        let sync_page_size = parse_or("SYNC_PAGE_SIZE", 10u64).max(1);
        let wallet_poll_interval = Duration::from_secs(parse_or("WALLET_POLL_INTERVAL_SECS", 2u64));
        let indexer_poll_interval =
            Duration::from_secs(parse_or("INDEXER_POLL_INTERVAL_SECS", 15u64));
        let mirror_write_timeout = Duration::from_millis(parse_or("MIRROR_WRITE_TIMEOUT_MS", 5_000u64));
        let unresolved_submission_ttl =
            Duration::from_secs(parse_or("UNRESOLVED_SUBMISSION_TTL_SECS", 900u64));

        Ok(Config {
            database_url,
            wallet_rpc_url,
            contract_address,
            contract_address_explicit,
            loan_flavor,
            deployment_block,
            environment,
            port,
            db_max_connections,
            cors_allowed_origins,
            log_level,
            confirmation_timeout,
            receipt_poll_interval,
            sync_interval,
            sync_page_size,
            wallet_poll_interval,
            indexer_poll_interval,
            mirror_write_timeout,
            unresolved_submission_ttl,
        })
    }

    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions {
            confirmation_timeout: self.confirmation_timeout,
            receipt_poll_interval: self.receipt_poll_interval,
        }
    }

    /// Database URL with the password masked, for logging
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let prefix = &self.database_url[..colon_pos + 1];
                let suffix = &self.database_url[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.database_url.clone()
    }
}
