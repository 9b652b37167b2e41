//! Application state shared across handlers

use std::sync::Arc;

use crate::chain::{ChainClient, ChainProvider};
use crate::commands::LoanCommandService;
use crate::config::Environment;
use crate::gateway::LoanContractGateway;
use crate::mirror::LoanMirror;
use crate::sync::SyncEngine;

/// Shared application state
pub struct AppState<P, M> {
    pub commands: Arc<LoanCommandService<P, M>>,
    pub environment: Environment,
}

// Manual impl: derive would require `P: Clone` and `M: Clone`
impl<P, M> Clone for AppState<P, M> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            environment: self.environment,
        }
    }
}

impl<P, M> AppState<P, M> {
    pub fn new(commands: Arc<LoanCommandService<P, M>>, environment: Environment) -> Self {
        Self {
            commands,
            environment,
        }
    }
}

impl<P: ChainProvider, M: LoanMirror> AppState<P, M> {
    pub fn gateway(&self) -> &Arc<LoanContractGateway<P>> {
        self.commands.gateway()
    }

    pub fn chain(&self) -> &Arc<ChainClient<P>> {
        self.commands.gateway().chain()
    }

    pub fn sync(&self) -> &Arc<SyncEngine<P, M>> {
        self.commands.sync_engine()
    }

    pub fn mirror(&self) -> &Arc<M> {
        self.commands.sync_engine().mirror()
    }
}
