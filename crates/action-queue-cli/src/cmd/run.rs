use crate::output::{print_json, print_table};
use action_queue_core::{
    context::ExecutionContext,
    fees::{plan_action_program, FeeFunding},
    loan::{run_loan_action_program, LoanAccount, LoanProgramType},
    make_action_program,
    state::ActionProgramState,
    wallet::PaperWallet,
    ActionQueueError,
};
use anyhow::{anyhow, Context};
use std::path::Path;
use std::sync::Arc;

/// Loan account a run is recorded against.
pub struct LoanTarget {
    pub id: String,
    pub borrow_plugin_id: String,
    pub program_type: String,
}

pub fn run(
    root: &Path,
    op_path: &Path,
    ledger_path: &Path,
    client: &str,
    funding: Option<FeeFunding>,
    loan: Option<LoanTarget>,
    json: bool,
) -> anyhow::Result<()> {
    let op = super::load_op(op_path)?;
    let ledger = super::load_ledger(ledger_path)?;
    let queue = super::open_queue(root)?;
    let wallet = Arc::new(PaperWallet::new(ledger));
    let ctx = ExecutionContext::new(wallet.clone(), client);
    let rt = tokio::runtime::Runtime::new()?;

    let (program, fee_cover_injected) = match &funding {
        Some(funding) => {
            let planned = rt
                .block_on(plan_action_program(&ctx, op, funding, queue.config().quote_timeout()))
                .context("failed to plan fee cover")?;
            (planned.program, planned.fee_cover_injected)
        }
        None => (make_action_program(op)?, false),
    };

    let mut loan_account = match &loan {
        Some(target) => {
            let program_type: LoanProgramType =
                target.program_type.parse().map_err(|e: String| anyhow!(e))?;
            let account = queue
                .store()
                .load_loan_account(client, &target.id)
                .context("failed to load loan account")?
                .unwrap_or_else(|| {
                    LoanAccount::new(&target.id, &target.borrow_plugin_id, program_borrow_wallet(&program))
                });
            Some((account, program_type))
        }
        None => None,
    };

    let result = rt.block_on(async {
        match loan_account.as_mut() {
            Some((account, program_type)) => {
                run_loan_action_program(&queue, &ctx, account, &program, *program_type).await
            }
            None => queue.run_action_program(&ctx, &program).await,
        }
    });

    // Broadcasts moved paper balances even when a later step failed
    wallet
        .ledger()
        .save(ledger_path)
        .with_context(|| format!("failed to write ledger {}", ledger_path.display()))?;

    let (state, failed) = match result {
        Ok(state) => (state, None),
        Err(ActionQueueError::ProgramFailed { state, failures }) => {
            let summary = failures
                .iter()
                .map(|f| format!("step {}: {}", f.step, f.error))
                .collect::<Vec<_>>()
                .join("; ");
            (*state, Some(summary))
        }
        Err(e) => return Err(e).context("failed to run program"),
    };

    let outputs = queue
        .program_outputs(client, &program)
        .context("failed to read step journal")?;
    if json {
        print_json(&serde_json::json!({
            "state": state,
            "outputs": outputs,
            "fee_cover_injected": fee_cover_injected,
            "error": failed,
        }))?;
    } else {
        if fee_cover_injected {
            println!("fee-cover swap injected");
        }
        print_state_line(&state);
        let rows = outputs
            .iter()
            .flat_map(|out| {
                out.broadcast_txs.iter().map(move |tx| {
                    vec![
                        out.step.to_string(),
                        out.action.to_string(),
                        tx.wallet_id.clone(),
                        tx.txid.clone().unwrap_or_default(),
                    ]
                })
            })
            .collect();
        print_table(&["STEP", "ACTION", "WALLET", "TXID"], rows);
    }

    match failed {
        Some(summary) => Err(anyhow!("program {} failed: {summary}", state.program_id)),
        None => Ok(()),
    }
}

fn print_state_line(state: &ActionProgramState) {
    println!(
        "program {}: {} (attempts: {})",
        state.program_id,
        state.status(),
        state.attempts
    );
}

/// Wallet of the first loan leaf, used as the borrow wallet of a new account.
fn program_borrow_wallet(program: &action_queue_core::ActionProgram) -> String {
    use action_queue_core::types::LeafAction;
    program
        .action_op
        .leaves()
        .into_iter()
        .find_map(|(_, leaf)| match leaf {
            LeafAction::Loan(_, op) => Some(op.wallet_id.clone()),
            LeafAction::Swap(_) => None,
        })
        .unwrap_or_default()
}
