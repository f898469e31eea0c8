//! In-memory wallet-core used for previews, demos and tests.
//!
//! A `PaperLedger` is plain data (YAML-loadable): wallets with a native
//! currency, per-transaction network fee, token balances and loan books, plus
//! scripted faults. `PaperWallet` wraps a ledger behind the `WalletAccount`
//! trait. Swaps convert 1:1. Spending a token takes an approval transaction
//! before the main one, as on account-based chains.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AssetAmount, NetworkFee, PendingTx, Quote, TxSummary, WalletAccount};
use crate::amount::NativeAmount;
use crate::error::{Result, WalletError};
use crate::types::{ActionKind, LeafAction, LoanKind};

const NATIVE_KEY: &str = "native";

// ---------------------------------------------------------------------------
// Ledger data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperLedger {
    #[serde(default)]
    pub wallets: BTreeMap<String, PaperAccount>,
    #[serde(default)]
    pub faults: Vec<PaperFault>,
    /// Artificial latency added to every quote.
    #[serde(default)]
    pub quote_delay_ms: u64,
    /// Artificial latency before every confirmation.
    #[serde(default)]
    pub confirm_delay_ms: u64,
    /// Transactions accepted so far; the source of txids.
    #[serde(default)]
    pub tx_count: u64,
}

impl PaperLedger {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Builder-style helper for tests and fixtures.
    pub fn with_wallet(mut self, wallet_id: &str, account: PaperAccount) -> Self {
        self.wallets.insert(wallet_id.to_string(), account);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperAccount {
    pub currency_code: String,
    /// Fee charged in the native currency for every transaction.
    #[serde(default)]
    pub network_fee: NativeAmount,
    #[serde(default)]
    pub native_balance: NativeAmount,
    #[serde(default)]
    pub tokens: BTreeMap<String, NativeAmount>,
    #[serde(default)]
    pub enabled_tokens: BTreeSet<String>,
    /// Loan collateral by asset (`native` for the native currency).
    #[serde(default)]
    pub collateral: BTreeMap<String, NativeAmount>,
    /// Loan debt by asset (`native` for the native currency).
    #[serde(default)]
    pub debt: BTreeMap<String, NativeAmount>,
}

impl PaperAccount {
    pub fn new(currency_code: &str, native_balance: u128, network_fee: u128) -> Self {
        Self {
            currency_code: currency_code.to_string(),
            network_fee: NativeAmount(network_fee),
            native_balance: NativeAmount(native_balance),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token_id: &str, amount: u128) -> Self {
        self.tokens.insert(token_id.to_string(), NativeAmount(amount));
        self.enabled_tokens.insert(token_id.to_string());
        self
    }

    fn balance_of(&self, token_id: Option<&str>) -> NativeAmount {
        match token_id {
            None => self.native_balance,
            Some(t) => self.tokens.get(t).copied().unwrap_or_default(),
        }
    }

    fn slot(&mut self, token_id: Option<&str>) -> &mut NativeAmount {
        match token_id {
            None => &mut self.native_balance,
            Some(t) => self.tokens.entry(t.to_string()).or_default(),
        }
    }

    fn fee(&self) -> NetworkFee {
        NetworkFee {
            currency_code: self.currency_code.clone(),
            native_amount: self.network_fee,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStage {
    Quote,
    Broadcast,
    Confirm,
}

/// A scripted failure. Matches when every set filter matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperFault {
    pub stage: FaultStage,
    #[serde(default)]
    pub action: Option<ActionKind>,
    #[serde(default)]
    pub wallet_id: Option<String>,
    /// How many more times the fault fires; `None` fires forever.
    #[serde(default)]
    pub times: Option<u32>,
    #[serde(default = "default_fault_reason")]
    pub reason: String,
}

fn default_fault_reason() -> String {
    "scripted fault".to_string()
}

impl PaperFault {
    pub fn new(stage: FaultStage, action: ActionKind) -> Self {
        Self {
            stage,
            action: Some(action),
            wallet_id: None,
            times: None,
            reason: default_fault_reason(),
        }
    }

    pub fn times(mut self, n: u32) -> Self {
        self.times = Some(n);
        self
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_string();
        self
    }

    fn matches(&self, stage: FaultStage, action: ActionKind, wallet_id: &str) -> bool {
        self.stage == stage
            && self.action.map_or(true, |a| a == action)
            && self.wallet_id.as_deref().map_or(true, |w| w == wallet_id)
            && self.times != Some(0)
    }
}

// ---------------------------------------------------------------------------
// Transaction payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaperPayload {
    action: ActionKind,
    /// Only the last transaction of a leaf moves principal.
    apply: bool,
    debits: Vec<AssetAmount>,
    credits: Vec<AssetAmount>,
    #[serde(default)]
    loan: Option<(LoanKind, AssetAmount)>,
}

/// One accepted broadcast, in network order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRecord {
    pub action: ActionKind,
    pub wallet_id: String,
    pub txid: String,
}

// ---------------------------------------------------------------------------
// PaperWallet
// ---------------------------------------------------------------------------

pub struct PaperWallet {
    ledger: Mutex<PaperLedger>,
    broadcasts: Mutex<Vec<BroadcastRecord>>,
    quotes: AtomicUsize,
}

impl PaperWallet {
    pub fn new(ledger: PaperLedger) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            broadcasts: Mutex::new(Vec::new()),
            quotes: AtomicUsize::new(0),
        }
    }

    /// Snapshot of the current ledger.
    pub fn ledger(&self) -> PaperLedger {
        self.lock().clone()
    }

    pub fn add_fault(&self, fault: PaperFault) {
        self.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn broadcasts(&self) -> Vec<BroadcastRecord> {
        self.broadcasts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts().len()
    }

    pub fn quote_count(&self) -> usize {
        self.quotes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, PaperLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn build_quote(&self, action: LeafAction<'_>) -> std::result::Result<Quote, WalletError> {
        let mut ledger = self.lock();
        let primary = primary_wallet(action);
        if let Some(reason) = take_fault(&mut ledger, FaultStage::Quote, action.kind(), primary) {
            return Err(WalletError::NoRoute(reason));
        }

        let (debits, credits, loan) = match action {
            LeafAction::Swap(swap) => {
                account(&ledger, &swap.to_wallet_id)?;
                let debit = AssetAmount {
                    wallet_id: swap.from_wallet_id.clone(),
                    token_id: swap.from_token_id.clone(),
                    native_amount: swap.native_amount,
                };
                let credit = AssetAmount {
                    wallet_id: swap.to_wallet_id.clone(),
                    token_id: swap.to_token_id.clone(),
                    native_amount: swap.native_amount,
                };
                (vec![debit], vec![credit], None)
            }
            LeafAction::Loan(kind, loan) => {
                let asset = AssetAmount {
                    wallet_id: loan.wallet_id.clone(),
                    token_id: loan.token_id.clone(),
                    native_amount: loan.native_amount,
                };
                let acct = account(&ledger, &loan.wallet_id)?;
                let key = loan.token_id.as_deref().unwrap_or(NATIVE_KEY);
                match kind {
                    LoanKind::Repay => {
                        let owed = acct.debt.get(key).copied().unwrap_or_default();
                        if loan.native_amount > owed {
                            return Err(WalletError::Rejected(format!(
                                "repay {} exceeds debt {owed}",
                                loan.native_amount
                            )));
                        }
                    }
                    LoanKind::Withdraw => {
                        let held = acct.collateral.get(key).copied().unwrap_or_default();
                        if loan.native_amount > held {
                            return Err(WalletError::Rejected(format!(
                                "withdraw {} exceeds collateral {held}",
                                loan.native_amount
                            )));
                        }
                    }
                    LoanKind::Borrow | LoanKind::Deposit => {}
                }
                let (debits, credits) = match kind {
                    LoanKind::Deposit | LoanKind::Repay => (vec![asset.clone()], vec![]),
                    LoanKind::Borrow | LoanKind::Withdraw => (vec![], vec![asset.clone()]),
                };
                (debits, credits, Some((kind, asset)))
            }
        };

        let payer = account(&ledger, primary)?;
        let needs_approval = debits.iter().any(|d| d.token_id.is_some());
        let mut txs = Vec::new();
        if needs_approval {
            txs.push(PendingTx {
                wallet_id: primary.to_string(),
                network_fee: payer.fee(),
                payload: payload(action.kind(), false, &[], &[], None),
            });
        }
        txs.push(PendingTx {
            wallet_id: primary.to_string(),
            network_fee: payer.fee(),
            payload: payload(action.kind(), true, &debits, &credits, loan),
        });

        Ok(Quote {
            txs,
            debits,
            credits,
        })
    }

    fn apply_broadcast(&self, tx: &PendingTx) -> std::result::Result<TxSummary, WalletError> {
        let body: PaperPayload = serde_json::from_value(tx.payload.clone())
            .map_err(|e| WalletError::Rejected(format!("malformed payload: {e}")))?;

        let mut ledger = self.lock();
        if let Some(reason) = take_fault(&mut ledger, FaultStage::Broadcast, body.action, &tx.wallet_id)
        {
            return Err(WalletError::Network(reason));
        }

        let fee = account(&ledger, &tx.wallet_id)?.network_fee;
        let native = account(&ledger, &tx.wallet_id)?.native_balance;
        if native < fee {
            return Err(WalletError::InsufficientFunds {
                wallet_id: tx.wallet_id.clone(),
                needed: fee.to_string(),
                available: native.to_string(),
            });
        }

        if body.apply {
            for d in &body.debits {
                let have = account(&ledger, &d.wallet_id)?.balance_of(d.token_id.as_deref());
                let fee_share = if d.wallet_id == tx.wallet_id && d.token_id.is_none() {
                    fee
                } else {
                    NativeAmount::ZERO
                };
                if have < d.native_amount.saturating_add(fee_share) {
                    return Err(WalletError::InsufficientFunds {
                        wallet_id: d.wallet_id.clone(),
                        needed: d.native_amount.to_string(),
                        available: have.to_string(),
                    });
                }
            }
            for c in &body.credits {
                let acct = account(&ledger, &c.wallet_id)?;
                if let Some(token) = &c.token_id {
                    if !acct.enabled_tokens.contains(token) {
                        return Err(WalletError::Rejected(format!(
                            "token {token} not enabled on {}",
                            c.wallet_id
                        )));
                    }
                }
            }
        }

        let payer = account_mut(&mut ledger, &tx.wallet_id)?;
        payer.native_balance = payer.native_balance.saturating_sub(fee);

        if body.apply {
            for d in &body.debits {
                let slot = account_mut(&mut ledger, &d.wallet_id)?.slot(d.token_id.as_deref());
                *slot = slot.saturating_sub(d.native_amount);
            }
            for c in &body.credits {
                let slot = account_mut(&mut ledger, &c.wallet_id)?.slot(c.token_id.as_deref());
                *slot = slot.saturating_add(c.native_amount);
            }
            if let Some((kind, asset)) = &body.loan {
                let acct = account_mut(&mut ledger, &asset.wallet_id)?;
                let key = asset.token_id.clone().unwrap_or_else(|| NATIVE_KEY.to_string());
                let book = match kind {
                    LoanKind::Deposit | LoanKind::Withdraw => &mut acct.collateral,
                    LoanKind::Borrow | LoanKind::Repay => &mut acct.debt,
                };
                let entry = book.entry(key).or_default();
                *entry = match kind {
                    LoanKind::Deposit | LoanKind::Borrow => entry.saturating_add(asset.native_amount),
                    LoanKind::Withdraw | LoanKind::Repay => entry.saturating_sub(asset.native_amount),
                };
            }
        }
        ledger.tx_count += 1;
        let txid = format!("paper-{}", ledger.tx_count);
        drop(ledger);

        self.broadcasts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(BroadcastRecord {
                action: body.action,
                wallet_id: tx.wallet_id.clone(),
                txid: txid.clone(),
            });

        Ok(TxSummary {
            wallet_id: tx.wallet_id.clone(),
            txid: Some(txid),
            network_fee: tx.network_fee.clone(),
        })
    }
}

#[async_trait]
impl WalletAccount for PaperWallet {
    async fn balance(
        &self,
        wallet_id: &str,
        token_id: Option<&str>,
    ) -> std::result::Result<NativeAmount, WalletError> {
        let ledger = self.lock();
        Ok(account(&ledger, wallet_id)?.balance_of(token_id))
    }

    async fn currency_code(&self, wallet_id: &str) -> std::result::Result<String, WalletError> {
        let ledger = self.lock();
        Ok(account(&ledger, wallet_id)?.currency_code.clone())
    }

    async fn quote(&self, action: LeafAction<'_>) -> std::result::Result<Quote, WalletError> {
        self.quotes.fetch_add(1, Ordering::SeqCst);
        let delay = self.lock().quote_delay_ms;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.build_quote(action)
    }

    async fn broadcast(&self, tx: &PendingTx) -> std::result::Result<TxSummary, WalletError> {
        self.apply_broadcast(tx)
    }

    async fn wait_for_confirmation(&self, tx: &TxSummary) -> std::result::Result<(), WalletError> {
        let delay = self.lock().confirm_delay_ms;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let action = self
            .broadcasts()
            .into_iter()
            .find(|b| Some(&b.txid) == tx.txid.as_ref())
            .map(|b| b.action);
        // Broadcast by an earlier process: the ledger already holds its effects.
        let Some(action) = action else {
            return Ok(());
        };
        let mut ledger = self.lock();
        match take_fault(&mut ledger, FaultStage::Confirm, action, &tx.wallet_id) {
            Some(reason) => Err(WalletError::Network(reason)),
            None => Ok(()),
        }
    }

    async fn enable_token(
        &self,
        wallet_id: &str,
        token_id: &str,
    ) -> std::result::Result<(), WalletError> {
        let mut ledger = self.lock();
        account_mut(&mut ledger, wallet_id)?
            .enabled_tokens
            .insert(token_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn primary_wallet<'a>(action: LeafAction<'a>) -> &'a str {
    match action {
        LeafAction::Swap(swap) => &swap.from_wallet_id,
        LeafAction::Loan(_, loan) => &loan.wallet_id,
    }
}

fn account<'a>(
    ledger: &'a PaperLedger,
    wallet_id: &str,
) -> std::result::Result<&'a PaperAccount, WalletError> {
    ledger
        .wallets
        .get(wallet_id)
        .ok_or_else(|| WalletError::UnknownWallet(wallet_id.to_string()))
}

fn account_mut<'a>(
    ledger: &'a mut PaperLedger,
    wallet_id: &str,
) -> std::result::Result<&'a mut PaperAccount, WalletError> {
    ledger
        .wallets
        .get_mut(wallet_id)
        .ok_or_else(|| WalletError::UnknownWallet(wallet_id.to_string()))
}

fn take_fault(
    ledger: &mut PaperLedger,
    stage: FaultStage,
    action: ActionKind,
    wallet_id: &str,
) -> Option<String> {
    let fault = ledger
        .faults
        .iter_mut()
        .find(|f| f.matches(stage, action, wallet_id))?;
    if let Some(n) = fault.times.as_mut() {
        *n -= 1;
    }
    Some(fault.reason.clone())
}

fn payload(
    action: ActionKind,
    apply: bool,
    debits: &[AssetAmount],
    credits: &[AssetAmount],
    loan: Option<(LoanKind, AssetAmount)>,
) -> serde_json::Value {
    let body = PaperPayload {
        action,
        apply,
        debits: debits.to_vec(),
        credits: credits.to_vec(),
        loan,
    };
    serde_json::to_value(body).unwrap_or(serde_json::Value::Null)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AmountFor, LoanActionOp, SwapActionOp};

    fn ledger() -> PaperLedger {
        PaperLedger::default()
            .with_wallet("eth", PaperAccount::new("ETH", 50, 2).with_token("usdc", 500))
            .with_wallet("btc", PaperAccount::new("BTC", 1_000, 1))
    }

    fn swap_usdc_to_btc(amount: u128) -> SwapActionOp {
        SwapActionOp {
            from_wallet_id: "eth".into(),
            from_token_id: Some("usdc".into()),
            to_wallet_id: "btc".into(),
            to_token_id: None,
            native_amount: NativeAmount(amount),
            amount_for: AmountFor::To,
        }
    }

    #[tokio::test]
    async fn token_swap_quotes_approval_then_swap() {
        let wallet = PaperWallet::new(ledger());
        let swap = swap_usdc_to_btc(100);
        let quote = wallet.quote(LeafAction::Swap(&swap)).await.unwrap();
        assert_eq!(quote.txs.len(), 2);
        assert_eq!(quote.txs[0].network_fee.currency_code, "ETH");
        assert_eq!(quote.debits[0].native_amount, NativeAmount(100));
        assert_eq!(wallet.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn broadcasting_a_quote_moves_balances_and_fees() {
        let wallet = PaperWallet::new(ledger());
        let swap = swap_usdc_to_btc(100);
        let quote = wallet.quote(LeafAction::Swap(&swap)).await.unwrap();
        for tx in &quote.txs {
            wallet.broadcast(tx).await.unwrap();
        }
        assert_eq!(wallet.balance("eth", Some("usdc")).await.unwrap(), NativeAmount(400));
        assert_eq!(wallet.balance("eth", None).await.unwrap(), NativeAmount(46));
        assert_eq!(wallet.balance("btc", None).await.unwrap(), NativeAmount(1_100));
        assert_eq!(wallet.broadcast_count(), 2);
    }

    #[tokio::test]
    async fn deposit_then_withdraw_tracks_collateral() {
        let wallet = PaperWallet::new(ledger());
        let deposit = LoanActionOp {
            borrow_plugin_id: "aave".into(),
            wallet_id: "btc".into(),
            token_id: None,
            native_amount: NativeAmount(300),
        };
        let quote = wallet
            .quote(LeafAction::Loan(LoanKind::Deposit, &deposit))
            .await
            .unwrap();
        wallet.broadcast(&quote.txs[0]).await.unwrap();
        assert_eq!(
            wallet.ledger().wallets["btc"].collateral["native"],
            NativeAmount(300)
        );

        let too_much = LoanActionOp {
            native_amount: NativeAmount(301),
            ..deposit.clone()
        };
        let err = wallet
            .quote(LeafAction::Loan(LoanKind::Withdraw, &too_much))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Rejected(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn fault_fires_the_scripted_number_of_times() {
        let wallet = PaperWallet::new(ledger());
        wallet.add_fault(PaperFault::new(FaultStage::Quote, ActionKind::Swap).times(1));
        let swap = swap_usdc_to_btc(1);
        assert!(wallet.quote(LeafAction::Swap(&swap)).await.is_err());
        assert!(wallet.quote(LeafAction::Swap(&swap)).await.is_ok());
    }

    #[tokio::test]
    async fn credit_to_disabled_token_is_rejected_until_enabled() {
        let wallet = PaperWallet::new(ledger());
        let borrow = LoanActionOp {
            borrow_plugin_id: "aave".into(),
            wallet_id: "btc".into(),
            token_id: Some("usdt".into()),
            native_amount: NativeAmount(10),
        };
        let quote = wallet
            .quote(LeafAction::Loan(LoanKind::Borrow, &borrow))
            .await
            .unwrap();
        assert!(wallet.broadcast(&quote.txs[0]).await.is_err());
        wallet.enable_token("btc", "usdt").await.unwrap();
        wallet.broadcast(&quote.txs[0]).await.unwrap();
        assert_eq!(wallet.balance("btc", Some("usdt")).await.unwrap(), NativeAmount(10));
    }

    #[test]
    fn ledger_round_trips_through_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.yaml");
        ledger().save(&path).unwrap();
        assert_eq!(PaperLedger::load(&path).unwrap(), ledger());
    }
}
