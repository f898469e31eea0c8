use std::time::Duration;

use thiserror::Error;

use crate::state::ActionProgramState;
use crate::types::StepPath;

#[derive(Debug, Error)]
pub enum ActionQueueError {
    #[error("invalid action op at {step}: {reason}")]
    InvalidActionOp { step: StepPath, reason: String },

    #[error("program not found: {0}")]
    ProgramNotFound(String),

    #[error("program {0} is not effective")]
    ProgramNotEffective(String),

    #[error("state store: {0}")]
    StateStore(String),

    #[error("wallet: {0}")]
    Wallet(#[from] WalletError),

    #[error("program {} failed: {}", .state.program_id, summarize(.failures))]
    ProgramFailed {
        state: Box<ActionProgramState>,
        failures: Vec<LeafFailure>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ActionQueueError>;

/// Error reported by the wallet-core collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WalletError {
    #[error("unknown wallet: {0}")]
    UnknownWallet(String),

    #[error("insufficient funds in {wallet_id}: needed {needed}, available {available}")]
    InsufficientFunds {
        wallet_id: String,
        needed: String,
        available: String,
    },

    #[error("no route: {0}")]
    NoRoute(String),

    #[error("stale quote: {0}")]
    StaleQuote(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("network: {0}")]
    Network(String),
}

/// Why a single leaf could not be simulated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("insufficient projected balance in {wallet_id}: needed {needed}, projected {projected}")]
    InsufficientFunds {
        wallet_id: String,
        token_id: Option<String>,
        needed: String,
        projected: String,
    },

    #[error("quote timed out after {0:?}")]
    Timeout(Duration),
}

/// Why a single leaf could not be executed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("step journal: {0}")]
    Store(String),

    /// The network accepted a transaction but the journal write after it
    /// failed. Retrying would broadcast it again.
    #[error("transaction {txid} accepted but not journaled: {reason}")]
    Unjournaled { txid: String, reason: String },
}

impl ExecutionError {
    /// Whether a retry of the leaf could repeat an accepted broadcast.
    pub fn is_unjournaled(&self) -> bool {
        matches!(self, ExecutionError::Unjournaled { .. })
    }
}

/// A leaf execution error attributed to its step.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafFailure {
    pub step: StepPath,
    pub error: ExecutionError,
}

fn summarize(failures: &[LeafFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.step, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

pub(crate) fn store_err(e: impl std::fmt::Display) -> ActionQueueError {
    ActionQueueError::StateStore(e.to_string())
}
