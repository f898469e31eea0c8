use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{ActionKind, StepPath};
use crate::wallet::{TxSummary, WalletAccount};

/// Everything an engine call needs from its caller: the account handle and
/// the client the program's state is scoped to.
#[derive(Clone)]
pub struct ExecutionContext {
    pub account: Arc<dyn WalletAccount>,
    pub client_id: String,
}

impl ExecutionContext {
    pub fn new(account: Arc<dyn WalletAccount>, client_id: impl Into<String>) -> Self {
        Self {
            account,
            client_id: client_id.into(),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Transactions produced (or, in a dry run, that would be produced) by one
/// leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    pub step: StepPath,
    pub action: ActionKind,
    pub broadcast_txs: Vec<TxSummary>,
}
