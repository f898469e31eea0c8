//! Loan accounts and the programs that act on them.
//!
//! A loan account remembers which programs were run against it, so a UI can
//! show "deposit in progress" by joining the account's edges with program
//! states. The builders below produce the op trees for the common loan flows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::amount::NativeAmount;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::program::ActionProgram;
use crate::runtime::ActionQueue;
use crate::state::ActionProgramState;
use crate::types::{ActionOp, AmountFor, LoanActionOp, LoanKind, SwapActionOp};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoanProgramType {
    LoanCreate,
    LoanBorrow,
    LoanDeposit,
    LoanRepay,
    LoanWithdraw,
}

impl LoanProgramType {
    pub fn as_str(self) -> &'static str {
        match self {
            LoanProgramType::LoanCreate => "loan-create",
            LoanProgramType::LoanBorrow => "loan-borrow",
            LoanProgramType::LoanDeposit => "loan-deposit",
            LoanProgramType::LoanRepay => "loan-repay",
            LoanProgramType::LoanWithdraw => "loan-withdraw",
        }
    }
}

impl FromStr for LoanProgramType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "loan-create" => Ok(LoanProgramType::LoanCreate),
            "loan-borrow" => Ok(LoanProgramType::LoanBorrow),
            "loan-deposit" => Ok(LoanProgramType::LoanDeposit),
            "loan-repay" => Ok(LoanProgramType::LoanRepay),
            "loan-withdraw" => Ok(LoanProgramType::LoanWithdraw),
            other => Err(format!("unknown loan program type: {other}")),
        }
    }
}

impl From<LoanKind> for LoanProgramType {
    fn from(kind: LoanKind) -> Self {
        match kind {
            LoanKind::Borrow => LoanProgramType::LoanBorrow,
            LoanKind::Deposit => LoanProgramType::LoanDeposit,
            LoanKind::Repay => LoanProgramType::LoanRepay,
            LoanKind::Withdraw => LoanProgramType::LoanWithdraw,
        }
    }
}

impl fmt::Display for LoanProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanProgramEdge {
    pub program_id: String,
    pub program_type: LoanProgramType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanAccount {
    pub id: String,
    pub borrow_plugin_id: String,
    /// Wallet holding the collateral and receiving borrowed funds.
    pub borrow_wallet_id: String,
    #[serde(default)]
    pub program_edges: Vec<LoanProgramEdge>,
}

impl LoanAccount {
    pub fn new(
        id: impl Into<String>,
        borrow_plugin_id: impl Into<String>,
        borrow_wallet_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            borrow_plugin_id: borrow_plugin_id.into(),
            borrow_wallet_id: borrow_wallet_id.into(),
            program_edges: Vec::new(),
        }
    }

    /// Record that `edge.program_id` runs against this account. Returns false
    /// when the edge was already recorded.
    pub fn add_program_edge(&mut self, edge: LoanProgramEdge) -> bool {
        if self.program_edges.contains(&edge) {
            return false;
        }
        self.program_edges.push(edge);
        true
    }

    pub fn edges_of_type(&self, program_type: LoanProgramType) -> impl Iterator<Item = &LoanProgramEdge> {
        self.program_edges
            .iter()
            .filter(move |e| e.program_type == program_type)
    }
}

/// Run `program` on behalf of `loan_account`.
///
/// The program edge is recorded and the account persisted before execution
/// starts, so the link survives even if the run fails or the process dies.
pub async fn run_loan_action_program(
    queue: &ActionQueue,
    ctx: &ExecutionContext,
    loan_account: &mut LoanAccount,
    program: &ActionProgram,
    program_type: LoanProgramType,
) -> Result<ActionProgramState> {
    let added = loan_account.add_program_edge(LoanProgramEdge {
        program_id: program.program_id.clone(),
        program_type,
    });
    if added {
        queue.store().save_loan_account(&ctx.client_id, loan_account)?;
    } else {
        debug!(loan_account = %loan_account.id, program_id = %program.program_id, "edge already recorded");
    }
    queue.run_action_program(ctx, program).await
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// An amount of one asset in one wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanAsset {
    pub wallet_id: String,
    pub token_id: Option<String>,
    pub native_amount: NativeAmount,
}

/// Source funds for a deposit or repayment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingSource {
    pub wallet_id: String,
    pub token_id: Option<String>,
}

fn loan_leaf(kind: LoanKind, borrow_plugin_id: &str, asset: &LoanAsset) -> ActionOp {
    let op = LoanActionOp {
        borrow_plugin_id: borrow_plugin_id.to_string(),
        wallet_id: asset.wallet_id.clone(),
        token_id: asset.token_id.clone(),
        native_amount: asset.native_amount,
    };
    match kind {
        LoanKind::Borrow => ActionOp::LoanBorrow(op),
        LoanKind::Deposit => ActionOp::LoanDeposit(op),
        LoanKind::Repay => ActionOp::LoanRepay(op),
        LoanKind::Withdraw => ActionOp::LoanWithdraw(op),
    }
}

/// Swap `source` into `target` when they are different assets.
fn swap_into(source: &FundingSource, target: &LoanAsset) -> Option<ActionOp> {
    if source.wallet_id == target.wallet_id && source.token_id == target.token_id {
        return None;
    }
    Some(ActionOp::Swap(SwapActionOp {
        from_wallet_id: source.wallet_id.clone(),
        from_token_id: source.token_id.clone(),
        to_wallet_id: target.wallet_id.clone(),
        to_token_id: target.token_id.clone(),
        native_amount: target.native_amount,
        amount_for: AmountFor::To,
    }))
}

/// Steps that move `source` funds into the loan as `collateral`.
pub fn make_deposit_actions(
    borrow_plugin_id: &str,
    source: &FundingSource,
    collateral: &LoanAsset,
) -> Vec<ActionOp> {
    let mut actions: Vec<ActionOp> = swap_into(source, collateral).into_iter().collect();
    actions.push(loan_leaf(LoanKind::Deposit, borrow_plugin_id, collateral));
    actions
}

/// Steps that pay down `debt` using `source` funds.
pub fn make_repay_actions(
    borrow_plugin_id: &str,
    source: &FundingSource,
    debt: &LoanAsset,
) -> Vec<ActionOp> {
    let mut actions: Vec<ActionOp> = swap_into(source, debt).into_iter().collect();
    actions.push(loan_leaf(LoanKind::Repay, borrow_plugin_id, debt));
    actions
}

/// Open a loan: fund and deposit the collateral, borrow against it, and send
/// the borrowed funds to `payout` when that is another wallet or token.
pub fn make_loan_create_action(
    borrow_plugin_id: &str,
    source: &FundingSource,
    collateral: &LoanAsset,
    principal: &LoanAsset,
    payout: Option<&FundingSource>,
) -> ActionOp {
    let mut actions = make_deposit_actions(borrow_plugin_id, source, collateral);
    actions.push(loan_leaf(LoanKind::Borrow, borrow_plugin_id, principal));
    if let Some(payout) = payout {
        let from = FundingSource {
            wallet_id: principal.wallet_id.clone(),
            token_id: principal.token_id.clone(),
        };
        let target = LoanAsset {
            wallet_id: payout.wallet_id.clone(),
            token_id: payout.token_id.clone(),
            native_amount: principal.native_amount,
        };
        if let Some(ActionOp::Swap(mut swap)) = swap_into(&from, &target) {
            // Send everything that was borrowed; the payout amount floats
            swap.amount_for = AmountFor::From;
            actions.push(ActionOp::Swap(swap));
        }
    }
    ActionOp::Seq { actions }
}

/// A single loan action, wrapped in a `seq` like every other loan program.
pub fn make_loan_action(kind: LoanKind, borrow_plugin_id: &str, asset: &LoanAsset) -> ActionOp {
    ActionOp::Seq {
        actions: vec![loan_leaf(kind, borrow_plugin_id, asset)],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
