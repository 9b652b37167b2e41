//! Mfuko loan server
//!
//! Serves loan views and commands over HTTP, keeping the Postgres mirror in
//! step with the loan contract through periodic sync and a log indexer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use mfuko_server::chain::{ChainClient, JsonRpcProvider};
use mfuko_server::commands::LoanCommandService;
use mfuko_server::config::{load_contract_address, Config};
use mfuko_server::db;
use mfuko_server::gateway::LoanContractGateway;
use mfuko_server::loan::system_clock;
use mfuko_server::mirror::PgLoanMirror;
use mfuko_server::routes;
use mfuko_server::state::AppState;
use mfuko_server::sync::SyncEngine;

const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        flavor = %config.loan_flavor,
        "Starting loan server"
    );

    let db_pool = db::create_pool(&config).await?;
    db::run_migrations(&db_pool).await?;

    let mirror = Arc::new(PgLoanMirror::new(db_pool));
    let contract_address = load_contract_address(mirror.as_ref(), &config).await?;

    let provider = JsonRpcProvider::new(&config.wallet_rpc_url, RPC_REQUEST_TIMEOUT)
        .context("Failed to build the wallet RPC client")?;
    let chain = Arc::new(ChainClient::new(
        provider,
        contract_address,
        config.chain_options(),
    ));

    let gateway = Arc::new(
        LoanContractGateway::new(chain.clone(), config.loan_flavor, system_clock())
            .with_deployment_block(config.deployment_block),
    );
    let sync = Arc::new(SyncEngine::new(
        gateway,
        mirror,
        config.sync_page_size,
    ));
    let commands = Arc::new(
        LoanCommandService::new(sync.clone())
            .with_mirror_write_timeout(config.mirror_write_timeout)
            .with_unresolved_ttl(config.unresolved_submission_ttl),
    );

    tracing::info!(contract = %contract_address, "Loan contract configured");

    // Wallet watcher: invalidates the signer binding on account/chain switches
    let watcher = chain.clone();
    let wallet_poll_interval = config.wallet_poll_interval;
    tokio::spawn(async move {
        watcher.watch_wallet(wallet_poll_interval).await;
    });

    // Periodic full reconciliation
    let periodic = commands.clone();
    let sync_interval = config.sync_interval;
    tokio::spawn(async move {
        periodic.run_periodic_sync(sync_interval).await;
        tracing::error!("Periodic sync task exited unexpectedly");
    });

    // Event indexer
    let indexer = sync.clone();
    let indexer_poll_interval = config.indexer_poll_interval;
    tokio::spawn(async move {
        indexer.run_event_indexer(indexer_poll_interval).await;
    });

    let app_state = AppState::new(commands, config.environment);

    let app = routes::api_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(configure_cors(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed_origins = allowed_origins.unwrap_or_default();

    if allowed_origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
