pub mod compile;
pub mod dryrun;
pub mod init;
pub mod recover;
pub mod run;
pub mod state;
pub mod tick;

use action_queue_core::{
    config::EngineConfig, paths, store::StateStore, types::ActionOp, wallet::PaperLedger,
    ActionQueue,
};
use anyhow::Context;
use std::path::Path;

/// Client id used when `--client` is not given.
pub const DEFAULT_CLIENT: &str = "default";

/// Read an op tree from a JSON file.
pub fn load_op(path: &Path) -> anyhow::Result<ActionOp> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("invalid op tree in {}", path.display()))
}

pub fn load_ledger(path: &Path) -> anyhow::Result<PaperLedger> {
    PaperLedger::load(path).with_context(|| format!("failed to load ledger {}", path.display()))
}

/// Open the state store and config under `root`.
pub fn open_queue(root: &Path) -> anyhow::Result<ActionQueue> {
    let config = EngineConfig::load(root).context("failed to load config")?;
    let db = paths::state_db_path(root);
    let store = StateStore::open(&db)
        .with_context(|| format!("failed to open state store {}", db.display()))?;
    Ok(ActionQueue::new(store, config))
}
