//! Boundary to the wallet-core collaborator.
//!
//! The engine never builds, signs or encodes transactions itself. It asks the
//! account handle for a `Quote` (the constructed transactions for one leaf plus
//! their network fees and principal balance effects), broadcasts the quoted
//! transactions in order, and waits for confirmation between `seq` steps.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::amount::NativeAmount;
use crate::error::WalletError;
use crate::types::LeafAction;

pub mod paper;

pub use paper::{FaultStage, PaperAccount, PaperFault, PaperLedger, PaperWallet};

// ---------------------------------------------------------------------------
// Wire-level summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFee {
    pub currency_code: String,
    pub native_amount: NativeAmount,
}

/// A transaction as reported back to callers: broadcast (with `txid`) or
/// simulated (without).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSummary {
    pub wallet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    pub network_fee: NetworkFee,
}

/// An amount of one asset held by one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAmount {
    pub wallet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub native_amount: NativeAmount,
}

/// A constructed, signed-on-broadcast transaction. `payload` is opaque to the
/// engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTx {
    pub wallet_id: String,
    pub network_fee: NetworkFee,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PendingTx {
    /// Summary of this transaction before it has a txid.
    pub fn simulated(&self) -> TxSummary {
        TxSummary {
            wallet_id: self.wallet_id.clone(),
            txid: None,
            network_fee: self.network_fee.clone(),
        }
    }
}

/// Everything needed to preview or execute one leaf.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Transactions to broadcast, in order.
    pub txs: Vec<PendingTx>,
    /// Principal amounts leaving wallets (network fees excluded).
    #[serde(default)]
    pub debits: Vec<AssetAmount>,
    /// Principal amounts arriving in wallets.
    #[serde(default)]
    pub credits: Vec<AssetAmount>,
}

// ---------------------------------------------------------------------------
// WalletAccount
// ---------------------------------------------------------------------------

/// The account handle supplied by wallet-core.
#[async_trait]
pub trait WalletAccount: Send + Sync {
    /// Spendable balance of a wallet's native currency (`token_id = None`) or
    /// of one of its tokens.
    async fn balance(&self, wallet_id: &str, token_id: Option<&str>)
        -> Result<NativeAmount, WalletError>;

    /// Code of the wallet's native currency, as used in `NetworkFee`.
    async fn currency_code(&self, wallet_id: &str) -> Result<String, WalletError>;

    /// Build (but do not broadcast) the transactions for one leaf.
    async fn quote(&self, action: LeafAction<'_>) -> Result<Quote, WalletError>;

    /// Sign and submit one transaction. Returns once the network accepted it.
    async fn broadcast(&self, tx: &PendingTx) -> Result<TxSummary, WalletError>;

    /// Wait until a broadcast transaction is confirmed deeply enough for
    /// dependent steps to spend its outputs.
    async fn wait_for_confirmation(&self, _tx: &TxSummary) -> Result<(), WalletError> {
        Ok(())
    }

    /// Make sure `token_id` is enabled on `wallet_id` so it can receive funds.
    async fn enable_token(&self, _wallet_id: &str, _token_id: &str) -> Result<(), WalletError> {
        Ok(())
    }
}
