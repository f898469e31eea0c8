use crate::output::{format_ms, print_json, print_table};
use action_queue_core::{context::ExecutionContext, scheduler::ProgramScheduler, wallet::PaperWallet};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;

pub fn run(root: &Path, ledger_path: &Path, client: &str, json: bool) -> anyhow::Result<()> {
    let ledger = super::load_ledger(ledger_path)?;
    let queue = super::open_queue(root)?;
    let wallet = Arc::new(PaperWallet::new(ledger));
    let ctx = ExecutionContext::new(wallet.clone(), client);
    let mut scheduler =
        ProgramScheduler::from_store(queue.store(), client).context("failed to load schedule")?;

    let rt = tokio::runtime::Runtime::new()?;
    let states = rt.block_on(queue.run_due(&ctx, &mut scheduler));

    wallet
        .ledger()
        .save(ledger_path)
        .with_context(|| format!("failed to write ledger {}", ledger_path.display()))?;
    let states = states.context("failed to run due programs")?;

    if json {
        return print_json(&serde_json::json!({
            "ran": states,
            "pending": scheduler.len(),
            "next_due_at": scheduler.next_due_at(),
        }));
    }
    if states.is_empty() {
        println!("Nothing due.");
    } else {
        let rows = states
            .iter()
            .map(|s| {
                vec![
                    s.program_id.chars().take(16).collect(),
                    s.status().to_string(),
                    s.attempts.to_string(),
                    s.last_error.clone().unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["PROGRAM", "STATUS", "ATTEMPTS", "LAST ERROR"], rows);
    }
    if let Some(next) = scheduler.next_due_at() {
        println!("next due: {}", format_ms(next));
    }
    Ok(())
}
