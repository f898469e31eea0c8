//! Network-fee aggregation and the fee-cover swap.
//!
//! A loan program often runs most of its transactions from the borrow wallet
//! while the user funds it from a different wallet. When the borrow wallet
//! cannot pay the simulated network fees, a swap from the source wallet into
//! the borrow wallet's native currency is added to the first `par` batch.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::amount::NativeAmount;
use crate::context::{ExecutionContext, ExecutionOutput};
use crate::dryrun::{dryrun_action_program, DryrunReport, DryrunScope};
use crate::error::Result;
use crate::program::{make_action_program, ActionProgram};
use crate::state::ActionProgramState;
use crate::types::{ActionOp, AmountFor, SwapActionOp};

/// Sum every transaction's network fee, keyed by currency code.
pub fn aggregate_network_fees<'a>(
    outputs: impl IntoIterator<Item = &'a ExecutionOutput>,
) -> BTreeMap<String, NativeAmount> {
    let mut fees: BTreeMap<String, NativeAmount> = BTreeMap::new();
    for output in outputs {
        for tx in &output.broadcast_txs {
            let entry = fees.entry(tx.network_fee.currency_code.clone()).or_default();
            *entry = entry.saturating_add(tx.network_fee.native_amount);
        }
    }
    fees
}

/// Amount the fee wallet is topped up by: twice the fee, less what it holds.
pub fn fee_cover_amount(fee: NativeAmount, balance: NativeAmount) -> NativeAmount {
    fee.saturating_mul(2).saturating_sub(balance)
}

/// Everything `inject_fee_cover_swap` needs to decide on and build the swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeCoverPlan {
    /// Wallet that pays most of the program's network fees.
    pub fee_wallet_id: String,
    /// Native currency code of the fee wallet.
    pub fee_currency_code: String,
    /// Native balance of the fee wallet before the program runs.
    pub fee_wallet_balance: NativeAmount,
    /// Aggregated simulated network fees per currency.
    pub network_fees: BTreeMap<String, NativeAmount>,
    pub source_wallet_id: String,
    pub source_token_id: Option<String>,
}

impl FeeCoverPlan {
    pub fn fee(&self) -> Option<NativeAmount> {
        self.network_fees.get(&self.fee_currency_code).copied()
    }

    /// The shortfall-covering amount, when the fee wallet cannot pay.
    pub fn shortfall_cover(&self) -> Option<NativeAmount> {
        if self.source_wallet_id == self.fee_wallet_id {
            return None;
        }
        let fee = self.fee()?;
        (fee > self.fee_wallet_balance).then(|| fee_cover_amount(fee, self.fee_wallet_balance))
    }
}

/// Rewrite `program` so its first step also tops up the fee wallet.
///
/// Applies only to `seq` roots: the leading run of `swap` children plus the
/// fee swap become one `par` placed first, followed by the remaining
/// children. The result is recompiled, so it carries a new program id.
/// Returns `None` when no top-up is needed.
pub fn inject_fee_cover_swap(
    program: &ActionProgram,
    plan: &FeeCoverPlan,
) -> Result<Option<ActionProgram>> {
    let Some(amount) = plan.shortfall_cover() else {
        return Ok(None);
    };
    let ActionOp::Seq { actions } = &program.action_op else {
        debug!(program_id = %program.program_id, "root is not a seq, fee cover not injected");
        return Ok(None);
    };

    let lead = actions
        .iter()
        .take_while(|op| matches!(op, ActionOp::Swap(_)))
        .count();
    let mut batch: Vec<ActionOp> = actions[..lead].to_vec();
    batch.push(ActionOp::Swap(SwapActionOp {
        from_wallet_id: plan.source_wallet_id.clone(),
        from_token_id: plan.source_token_id.clone(),
        to_wallet_id: plan.fee_wallet_id.clone(),
        to_token_id: None,
        native_amount: amount,
        amount_for: AmountFor::To,
    }));

    let mut seq = Vec::with_capacity(actions.len() - lead + 1);
    seq.push(ActionOp::Par { actions: batch });
    seq.extend(actions[lead..].iter().cloned());

    let injected = make_action_program(ActionOp::Seq { actions: seq })?;
    info!(
        from = %program.program_id,
        to = %injected.program_id,
        amount = %amount,
        currency = %plan.fee_currency_code,
        "injected fee-cover swap"
    );
    Ok(Some(injected))
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Where fee top-ups come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeFunding {
    pub fee_wallet_id: String,
    pub source_wallet_id: String,
    pub source_token_id: Option<String>,
}

/// A compiled program ready for `run_action_program`, with its preview.
#[derive(Debug, Clone)]
pub struct PlannedProgram {
    pub program: ActionProgram,
    /// Dry run of the program as first compiled.
    pub report: DryrunReport,
    pub plan: FeeCoverPlan,
    pub fee_cover_injected: bool,
}

/// Compile `op`, dry-run it, and inject the fee-cover swap if needed.
pub async fn plan_action_program(
    ctx: &ExecutionContext,
    op: ActionOp,
    funding: &FeeFunding,
    quote_timeout: Duration,
) -> Result<PlannedProgram> {
    let program = make_action_program(op)?;
    let state = ActionProgramState::new(&ctx.client_id, &program.program_id);
    let report =
        dryrun_action_program(ctx, &program, &state, DryrunScope::Full, quote_timeout).await;

    let fee_currency_code = ctx.account.currency_code(&funding.fee_wallet_id).await?;
    let fee_wallet_balance = ctx.account.balance(&funding.fee_wallet_id, None).await?;

    let plan = FeeCoverPlan {
        fee_wallet_id: funding.fee_wallet_id.clone(),
        fee_currency_code,
        fee_wallet_balance,
        network_fees: report.network_fees(),
        source_wallet_id: funding.source_wallet_id.clone(),
        source_token_id: funding.source_token_id.clone(),
    };
    let injected = inject_fee_cover_swap(&program, &plan)?;
    Ok(PlannedProgram {
        fee_cover_injected: injected.is_some(),
        program: injected.unwrap_or(program),
        report,
        plan,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
