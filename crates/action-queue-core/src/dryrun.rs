//! Dry-run executor.
//!
//! Walks a program the way the live executor would, but only asks the wallet
//! for quotes. A projected balance sheet stands in for the chain between
//! steps, so a `seq` whose second step spends the output of its first step
//! simulates correctly even though nothing was broadcast.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use tokio::time::timeout;
use tracing::debug;

use crate::amount::NativeAmount;
use crate::context::{ExecutionContext, ExecutionOutput};
use crate::error::SimulationError;
use crate::program::ActionProgram;
use crate::state::{ActionProgramState, StepRecord};
use crate::types::{ActionKind, ActionOp, LeafAction, OpNode, StepPath};
use crate::wallet::AssetAmount;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Which leaves a dry run simulates.
#[derive(Debug, Clone, Copy, Default)]
pub enum DryrunScope<'a> {
    /// Every leaf, as if the program had never run.
    #[default]
    Full,
    /// Only leaves without a confirmed journal record.
    Remaining(&'a BTreeMap<StepPath, StepRecord>),
}

impl DryrunScope<'_> {
    fn is_committed(&self, step: &StepPath) -> bool {
        match self {
            DryrunScope::Full => false,
            DryrunScope::Remaining(steps) => steps.get(step).is_some_and(|r| r.confirmed),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LeafOutcome {
    Simulated(ExecutionOutput),
    Failed(SimulationError),
    /// An earlier `seq` step failed, so this leaf was not simulated.
    NotAttempted,
    /// Already confirmed by an earlier live run.
    AlreadyCommitted,
}

impl LeafOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            LeafOutcome::Simulated(_) => "ok",
            LeafOutcome::Failed(_) => "failed",
            LeafOutcome::NotAttempted => "skipped",
            LeafOutcome::AlreadyCommitted => "committed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafReport {
    pub step: StepPath,
    pub action: ActionKind,
    pub outcome: LeafOutcome,
}

/// Per-leaf results of one dry run, in tree order.
#[derive(Debug, Clone, PartialEq)]
pub struct DryrunReport {
    pub program_id: String,
    pub leaves: Vec<LeafReport>,
}

impl DryrunReport {
    pub fn outputs(&self) -> Vec<&ExecutionOutput> {
        self.leaves
            .iter()
            .filter_map(|l| match &l.outcome {
                LeafOutcome::Simulated(out) => Some(out),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<(&StepPath, &SimulationError)> {
        self.leaves
            .iter()
            .filter_map(|l| match &l.outcome {
                LeafOutcome::Failed(e) => Some((&l.step, e)),
                _ => None,
            })
            .collect()
    }

    /// True when nothing failed and nothing was left unsimulated.
    pub fn is_clean(&self) -> bool {
        self.leaves
            .iter()
            .all(|l| !matches!(l.outcome, LeafOutcome::Failed(_) | LeafOutcome::NotAttempted))
    }

    /// Total simulated network fees, keyed by currency code.
    pub fn network_fees(&self) -> BTreeMap<String, NativeAmount> {
        crate::fees::aggregate_network_fees(self.outputs())
    }
}

/// Flat, serializable view of a report for JSON output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafSummary {
    pub step: StepPath,
    pub action: ActionKind,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub broadcast_txs: Vec<crate::wallet::TxSummary>,
}

impl From<&LeafReport> for LeafSummary {
    fn from(leaf: &LeafReport) -> Self {
        let (error, broadcast_txs) = match &leaf.outcome {
            LeafOutcome::Simulated(out) => (None, out.broadcast_txs.clone()),
            LeafOutcome::Failed(e) => (Some(e.to_string()), Vec::new()),
            _ => (None, Vec::new()),
        };
        Self {
            step: leaf.step.clone(),
            action: leaf.action,
            outcome: leaf.outcome.label(),
            error,
            broadcast_txs,
        }
    }
}

// ---------------------------------------------------------------------------
// Balance sheet
// ---------------------------------------------------------------------------

type AssetKey = (String, Option<String>);

/// Signed balance changes per (wallet, token) relative to the real balances.
#[derive(Debug, Clone, Default)]
struct BalanceSheet {
    deltas: HashMap<AssetKey, i128>,
}

fn signed(amount: NativeAmount) -> i128 {
    i128::try_from(amount.value()).unwrap_or(i128::MAX)
}

fn asset_key(a: &AssetAmount) -> AssetKey {
    (a.wallet_id.clone(), a.token_id.clone())
}

impl BalanceSheet {
    fn delta(&self, key: &AssetKey) -> i128 {
        self.deltas.get(key).copied().unwrap_or(0)
    }

    fn apply(&mut self, key: AssetKey, change: i128) {
        let entry = self.deltas.entry(key).or_insert(0);
        *entry = entry.saturating_add(change);
    }

    fn merge(&mut self, other: &BalanceSheet) {
        for (key, change) in &other.deltas {
            self.apply(key.clone(), *change);
        }
    }

    fn overlay(&self, other: &BalanceSheet) -> BalanceSheet {
        let mut out = self.clone();
        out.merge(other);
        out
    }
}

struct Simulated {
    ok: bool,
    /// Effect of this subtree alone.
    delta: BalanceSheet,
    leaves: Vec<LeafReport>,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Simulate `program` without broadcasting anything.
///
/// Leaf failures (wallet errors, projected shortfalls, quote timeouts) are
/// recorded in the report; this call itself cannot fail. With
/// `DryrunScope::Remaining`, an effective `state` means every leaf is
/// reported as already committed.
pub async fn dryrun_action_program(
    ctx: &ExecutionContext,
    program: &ActionProgram,
    state: &ActionProgramState,
    scope: DryrunScope<'_>,
    quote_timeout: Duration,
) -> DryrunReport {
    if state.effective && matches!(scope, DryrunScope::Remaining(_)) {
        debug!(program_id = %program.program_id, "program already effective, nothing to simulate");
        return DryrunReport {
            program_id: program.program_id.clone(),
            leaves: program
                .action_op
                .leaves()
                .into_iter()
                .map(|(step, leaf)| LeafReport {
                    step,
                    action: leaf.kind(),
                    outcome: LeafOutcome::AlreadyCommitted,
                })
                .collect(),
        };
    }

    let sim = Simulator {
        ctx,
        scope,
        quote_timeout,
    };
    let result = sim
        .node(&program.action_op, StepPath::root(), BalanceSheet::default())
        .await;
    DryrunReport {
        program_id: program.program_id.clone(),
        leaves: result.leaves,
    }
}

struct Simulator<'a> {
    ctx: &'a ExecutionContext,
    scope: DryrunScope<'a>,
    quote_timeout: Duration,
}

impl<'a> Simulator<'a> {
    fn node(
        &'a self,
        op: &'a ActionOp,
        path: StepPath,
        base: BalanceSheet,
    ) -> BoxFuture<'a, Simulated> {
        async move {
            match op.as_node() {
                OpNode::Seq(actions) => {
                    let mut delta = BalanceSheet::default();
                    let mut leaves = Vec::new();
                    for (i, child) in actions.iter().enumerate() {
                        let r = self.node(child, path.child(i), base.overlay(&delta)).await;
                        delta.merge(&r.delta);
                        leaves.extend(r.leaves);
                        if !r.ok {
                            for (j, rest) in actions.iter().enumerate().skip(i + 1) {
                                leaves.extend(not_attempted(rest, path.child(j)));
                            }
                            return Simulated {
                                ok: false,
                                delta,
                                leaves,
                            };
                        }
                    }
                    Simulated {
                        ok: true,
                        delta,
                        leaves,
                    }
                }
                OpNode::Par(actions) => {
                    let children = actions
                        .iter()
                        .enumerate()
                        .map(|(i, child)| self.node(child, path.child(i), base.clone()));
                    let mut out = Simulated {
                        ok: true,
                        delta: BalanceSheet::default(),
                        leaves: Vec::new(),
                    };
                    for r in join_all(children).await {
                        out.ok &= r.ok;
                        out.delta.merge(&r.delta);
                        out.leaves.extend(r.leaves);
                    }
                    out
                }
                OpNode::Leaf(leaf) => self.leaf(leaf, path, &base).await,
            }
        }
        .boxed()
    }

    async fn leaf(&self, leaf: LeafAction<'_>, step: StepPath, base: &BalanceSheet) -> Simulated {
        let action = leaf.kind();
        if self.scope.is_committed(&step) {
            debug!(%step, "step already confirmed, not simulating");
            return Simulated {
                ok: true,
                delta: BalanceSheet::default(),
                leaves: vec![LeafReport {
                    step,
                    action,
                    outcome: LeafOutcome::AlreadyCommitted,
                }],
            };
        }

        let result = match timeout(self.quote_timeout, self.quote_and_check(leaf, base)).await {
            Ok(r) => r,
            Err(_) => Err(SimulationError::Timeout(self.quote_timeout)),
        };
        match result {
            Ok((txs, delta)) => Simulated {
                ok: true,
                delta,
                leaves: vec![LeafReport {
                    step: step.clone(),
                    action,
                    outcome: LeafOutcome::Simulated(ExecutionOutput {
                        step,
                        action,
                        broadcast_txs: txs,
                    }),
                }],
            },
            Err(e) => {
                debug!(%step, error = %e, "leaf failed in dry run");
                Simulated {
                    ok: false,
                    delta: BalanceSheet::default(),
                    leaves: vec![LeafReport {
                        step,
                        action,
                        outcome: LeafOutcome::Failed(e),
                    }],
                }
            }
        }
    }

    async fn quote_and_check(
        &self,
        leaf: LeafAction<'_>,
        base: &BalanceSheet,
    ) -> Result<(Vec<crate::wallet::TxSummary>, BalanceSheet), SimulationError> {
        let quote = self.ctx.account.quote(leaf).await?;

        // Several debits of one asset in one quote are checked together
        let mut needed: BTreeMap<AssetKey, i128> = BTreeMap::new();
        for debit in &quote.debits {
            *needed.entry(asset_key(debit)).or_insert(0) += signed(debit.native_amount);
        }
        for ((wallet_id, token_id), amount) in &needed {
            let real = self
                .ctx
                .account
                .balance(wallet_id, token_id.as_deref())
                .await?;
            let key = (wallet_id.clone(), token_id.clone());
            let projected = signed(real).saturating_add(base.delta(&key));
            if projected < *amount {
                return Err(SimulationError::InsufficientFunds {
                    wallet_id: wallet_id.clone(),
                    token_id: token_id.clone(),
                    needed: amount.to_string(),
                    projected: projected.max(0).to_string(),
                });
            }
        }

        let mut delta = BalanceSheet::default();
        for debit in &quote.debits {
            delta.apply(asset_key(debit), -signed(debit.native_amount));
        }
        for credit in &quote.credits {
            delta.apply(asset_key(credit), signed(credit.native_amount));
        }
        let txs = quote.txs.iter().map(|tx| tx.simulated()).collect();
        Ok((txs, delta))
    }
}

fn not_attempted(op: &ActionOp, path: StepPath) -> Vec<LeafReport> {
    op.leaves()
        .into_iter()
        .map(|(rel, leaf)| {
            let mut indices = path.indices().to_vec();
            indices.extend_from_slice(rel.indices());
            LeafReport {
                step: StepPath::from(indices),
                action: leaf.kind(),
                outcome: LeafOutcome::NotAttempted,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::make_action_program;
    use crate::types::{AmountFor, LoanActionOp, SwapActionOp};
    use crate::wallet::{FaultStage, PaperAccount, PaperFault, PaperLedger, PaperWallet};
    use std::sync::Arc;

    fn swap(from: &str, to: &str, to_token: Option<&str>, amount: u128) -> ActionOp {
        ActionOp::Swap(SwapActionOp {
            from_wallet_id: from.into(),
            from_token_id: None,
            to_wallet_id: to.into(),
            to_token_id: to_token.map(Into::into),
            native_amount: amount.into(),
            amount_for: AmountFor::To,
        })
    }

    fn deposit(wallet: &str, token: &str, amount: u128) -> ActionOp {
        ActionOp::LoanDeposit(LoanActionOp {
            borrow_plugin_id: "aave".into(),
            wallet_id: wallet.into(),
            token_id: Some(token.into()),
            native_amount: amount.into(),
        })
    }

    fn setup(ledger: PaperLedger) -> (Arc<PaperWallet>, ExecutionContext) {
        let wallet = Arc::new(PaperWallet::new(ledger));
        let ctx = ExecutionContext::new(wallet.clone(), "client");
        (wallet, ctx)
    }

    fn ledger() -> PaperLedger {
        PaperLedger::default()
            .with_wallet("w1", PaperAccount::new("BTC", 1_000, 2))
            .with_wallet("w2", PaperAccount::new("ETH", 50, 5).with_token("usdc", 0))
    }

    async fn run(ctx: &ExecutionContext, op: ActionOp) -> DryrunReport {
        let program = make_action_program(op).unwrap();
        let state = ActionProgramState::new("client", &program.program_id);
        dryrun_action_program(ctx, &program, &state, DryrunScope::Full, Duration::from_secs(5)).await
    }

    #[tokio::test]
    async fn seq_feeds_credits_into_later_steps() {
        let (wallet, ctx) = setup(ledger());
        let report = run(
            &ctx,
            ActionOp::Seq {
                actions: vec![swap("w1", "w2", Some("usdc"), 100), deposit("w2", "usdc", 100)],
            },
        )
        .await;

        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.outputs().len(), 2);
        assert_eq!(report.outputs()[1].action, ActionKind::LoanDeposit);
        assert!(report.outputs()[0].broadcast_txs.iter().all(|t| t.txid.is_none()));
        assert_eq!(wallet.broadcast_count(), 0);
        // Real balances untouched
        assert_eq!(wallet.ledger().wallets["w2"].tokens["usdc"], NativeAmount::ZERO);
    }

    #[tokio::test]
    async fn seq_marks_later_steps_not_attempted_after_a_failure() {
        let (_wallet, ctx) = setup(ledger());
        let report = run(
            &ctx,
            ActionOp::Seq {
                actions: vec![deposit("w2", "usdc", 100), swap("w2", "w1", None, 10)],
            },
        )
        .await;

        assert_eq!(report.leaves.len(), 2);
        assert!(matches!(
            report.leaves[0].outcome,
            LeafOutcome::Failed(SimulationError::InsufficientFunds { .. })
        ));
        assert_eq!(report.leaves[1].outcome, LeafOutcome::NotAttempted);
        assert_eq!(report.failures()[0].0.to_string(), "0");
    }

    #[tokio::test]
    async fn par_children_do_not_see_each_other() {
        let (_wallet, ctx) = setup(ledger());
        // Both children need the usdc the swap would produce; the par sibling
        // must not count it.
        let report = run(
            &ctx,
            ActionOp::Par {
                actions: vec![swap("w1", "w2", Some("usdc"), 100), deposit("w2", "usdc", 100)],
            },
        )
        .await;

        assert!(matches!(report.leaves[0].outcome, LeafOutcome::Simulated(_)));
        assert!(matches!(report.leaves[1].outcome, LeafOutcome::Failed(_)));
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].0.to_string(), "1");
    }

    #[tokio::test]
    async fn par_effects_are_visible_after_the_par() {
        let (_wallet, ctx) = setup(ledger());
        let report = run(
            &ctx,
            ActionOp::Seq {
                actions: vec![
                    ActionOp::Par {
                        actions: vec![
                            swap("w1", "w2", Some("usdc"), 60),
                            swap("w1", "w2", Some("usdc"), 40),
                        ],
                    },
                    deposit("w2", "usdc", 100),
                ],
            },
        )
        .await;
        assert!(report.is_clean(), "{report:?}");
    }

    #[tokio::test]
    async fn wallet_errors_are_attributed_to_their_leaf() {
        let (wallet, ctx) = setup(ledger());
        wallet.add_fault(PaperFault::new(FaultStage::Quote, ActionKind::Swap).reason("no liquidity"));
        let report = run(
            &ctx,
            ActionOp::Par {
                actions: vec![
                    swap("w1", "w2", None, 10),
                    ActionOp::LoanBorrow(LoanActionOp {
                        borrow_plugin_id: "aave".into(),
                        wallet_id: "w2".into(),
                        token_id: Some("usdc".into()),
                        native_amount: 10u128.into(),
                    }),
                ],
            },
        )
        .await;
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.to_string(), "0");
        assert!(failures[0].1.to_string().contains("no liquidity"));
    }

    #[tokio::test]
    async fn slow_quote_times_out_that_leaf_only() {
        let mut l = ledger();
        l.quote_delay_ms = 200;
        let (_wallet, ctx) = setup(l);
        let program = make_action_program(swap("w1", "w2", None, 10)).unwrap();
        let state = ActionProgramState::new("client", &program.program_id);
        let report = dryrun_action_program(
            &ctx,
            &program,
            &state,
            DryrunScope::Full,
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(
            report.leaves[0].outcome,
            LeafOutcome::Failed(SimulationError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn network_fees_are_summed_per_currency() {
        let (_wallet, ctx) = setup(ledger());
        let report = run(
            &ctx,
            ActionOp::Seq {
                actions: vec![swap("w1", "w2", Some("usdc"), 100), deposit("w2", "usdc", 100)],
            },
        )
        .await;
        let fees = report.network_fees();
        assert_eq!(fees["BTC"], NativeAmount::new(2));
        // Token deposit quotes an approval plus the deposit
        assert_eq!(fees["ETH"], NativeAmount::new(10));
    }

    #[tokio::test]
    async fn remaining_scope_skips_confirmed_steps() {
        let (_wallet, ctx) = setup(ledger());
        let program = make_action_program(ActionOp::Seq {
            actions: vec![swap("w1", "w2", None, 10), swap("w1", "w2", None, 20)],
        })
        .unwrap();
        let state = ActionProgramState::new("client", &program.program_id);
        let mut steps = BTreeMap::new();
        steps.insert(
            StepPath::from(vec![0]),
            StepRecord {
                txs: Vec::new(),
                total_txs: 1,
                confirmed: true,
            },
        );
        let report = dryrun_action_program(
            &ctx,
            &program,
            &state,
            DryrunScope::Remaining(&steps),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(report.leaves[0].outcome, LeafOutcome::AlreadyCommitted);
        assert!(matches!(report.leaves[1].outcome, LeafOutcome::Simulated(_)));
    }
}
