use crate::output::{format_ms, print_json, print_table};
use anyhow::{bail, Context};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum StateSubcommand {
    /// List program states
    List {
        /// Only this client's programs (default: every client)
        #[arg(long)]
        client: Option<String>,
    },
    /// Show one program's state and step journal
    Show {
        program_id: String,
        #[arg(long, default_value = super::DEFAULT_CLIENT)]
        client: String,
    },
    /// Delete an effective program's state and step journal
    Clear {
        program_id: String,
        #[arg(long, default_value = super::DEFAULT_CLIENT)]
        client: String,
    },
}

pub fn run(root: &Path, subcmd: StateSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        StateSubcommand::List { client } => list(root, client.as_deref(), json),
        StateSubcommand::Show { program_id, client } => show(root, &program_id, &client, json),
        StateSubcommand::Clear { program_id, client } => clear(root, &program_id, &client, json),
    }
}

fn list(root: &Path, client: Option<&str>, json: bool) -> anyhow::Result<()> {
    let queue = super::open_queue(root)?;
    let states = queue
        .store()
        .list_states(client)
        .context("failed to list program states")?;

    if json {
        return print_json(&states);
    }
    if states.is_empty() {
        println!("No programs.");
        return Ok(());
    }
    let rows = states
        .iter()
        .map(|s| {
            vec![
                s.client_id.clone(),
                s.program_id.chars().take(16).collect(),
                s.status().to_string(),
                s.attempts.to_string(),
                format_ms(s.next_execution_time),
            ]
        })
        .collect();
    print_table(&["CLIENT", "PROGRAM", "STATUS", "ATTEMPTS", "NEXT"], rows);
    Ok(())
}

fn show(root: &Path, program_id: &str, client: &str, json: bool) -> anyhow::Result<()> {
    let queue = super::open_queue(root)?;
    let Some(state) = queue
        .store()
        .load_state(client, program_id)
        .context("failed to load program state")?
    else {
        bail!("program '{program_id}' not found for client '{client}'");
    };
    let program = queue
        .store()
        .load_program(client, program_id)
        .context("failed to load program")?;
    let outputs = match &program {
        Some(p) => queue.program_outputs(client, p)?,
        None => Vec::new(),
    };

    if json {
        return print_json(&serde_json::json!({
            "state": state,
            "program": program,
            "outputs": outputs,
        }));
    }

    println!("Program:        {}", state.program_id);
    println!("Client:         {}", state.client_id);
    println!("Status:         {}", state.status());
    println!("Attempts:       {}", state.attempts);
    println!("Last execution: {}", format_ms(state.last_execution_time));
    println!("Next execution: {}", format_ms(state.next_execution_time));
    if let Some(err) = &state.last_error {
        println!("Last error:     {err}");
    }
    if !outputs.is_empty() {
        println!();
        let rows = outputs
            .iter()
            .map(|out| {
                let txids: Vec<String> = out
                    .broadcast_txs
                    .iter()
                    .filter_map(|tx| tx.txid.clone())
                    .collect();
                vec![out.step.to_string(), out.action.to_string(), txids.join(", ")]
            })
            .collect();
        print_table(&["STEP", "ACTION", "TXIDS"], rows);
    }
    Ok(())
}

fn clear(root: &Path, program_id: &str, client: &str, json: bool) -> anyhow::Result<()> {
    let queue = super::open_queue(root)?;
    queue
        .store()
        .clear_program(client, program_id)
        .with_context(|| format!("failed to clear program '{program_id}'"))?;

    if json {
        return print_json(&serde_json::json!({ "cleared": program_id }));
    }
    println!("Cleared program {program_id}");
    Ok(())
}
