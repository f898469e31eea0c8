use crate::output::{print_json, print_table};
use action_queue_core::{
    context::ExecutionContext,
    dryrun::{LeafOutcome, LeafSummary},
    fees::{plan_action_program, FeeFunding},
    make_action_program,
    wallet::PaperWallet,
};
use std::path::Path;
use std::sync::Arc;

pub fn run(
    root: &Path,
    op_path: &Path,
    ledger_path: &Path,
    funding: Option<FeeFunding>,
    client: &str,
    json: bool,
) -> anyhow::Result<()> {
    let op = super::load_op(op_path)?;
    let ledger = super::load_ledger(ledger_path)?;
    let queue = super::open_queue(root)?;
    let wallet = Arc::new(PaperWallet::new(ledger));
    let ctx = ExecutionContext::new(wallet, client);

    let rt = tokio::runtime::Runtime::new()?;
    let (program, report, plan, injected) = rt.block_on(async {
        match &funding {
            Some(funding) => {
                let planned =
                    plan_action_program(&ctx, op, funding, queue.config().quote_timeout()).await?;
                Ok::<_, anyhow::Error>((
                    planned.program,
                    planned.report,
                    Some(planned.plan),
                    planned.fee_cover_injected,
                ))
            }
            None => {
                let program = make_action_program(op)?;
                let report = queue.dryrun_remaining(&ctx, &program).await?;
                Ok((program, report, None, false))
            }
        }
    })?;

    let fees = report.network_fees();
    if json {
        let leaves: Vec<LeafSummary> = report.leaves.iter().map(LeafSummary::from).collect();
        print_json(&serde_json::json!({
            "program_id": program.program_id,
            "simulated_program_id": report.program_id,
            "clean": report.is_clean(),
            "leaves": leaves,
            "network_fees": fees,
            "fee_cover": plan,
            "fee_cover_injected": injected,
        }))?;
        return Ok(());
    }

    let rows = report
        .leaves
        .iter()
        .map(|leaf| {
            let detail = match &leaf.outcome {
                LeafOutcome::Simulated(out) => out
                    .broadcast_txs
                    .iter()
                    .map(|tx| format!("{} {}", tx.network_fee.native_amount, tx.network_fee.currency_code))
                    .collect::<Vec<_>>()
                    .join(", "),
                LeafOutcome::Failed(e) => e.to_string(),
                LeafOutcome::NotAttempted | LeafOutcome::AlreadyCommitted => String::new(),
            };
            vec![
                leaf.step.to_string(),
                leaf.action.to_string(),
                leaf.outcome.label().to_string(),
                detail,
            ]
        })
        .collect();
    print_table(&["STEP", "ACTION", "RESULT", "FEES / ERROR"], rows);

    println!();
    for (code, amount) in &fees {
        println!("network fee: {amount} {code}");
    }
    if injected {
        println!(
            "fee-cover swap injected: program {} (pass the same fee options to `aq run`)",
            program.program_id
        );
    } else {
        println!("program: {}", program.program_id);
    }
    Ok(())
}
