use crate::output::print_json;
use action_queue_core::{config::EngineConfig, io, paths};
use anyhow::Context;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let dir = paths::queue_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let config_path = paths::config_path(root);
    let created = !config_path.exists();
    if created {
        EngineConfig::default()
            .save(root)
            .context("failed to write config")?;
    }

    if json {
        print_json(&serde_json::json!({
            "root": root.display().to_string(),
            "config_created": created,
        }))?;
    } else if created {
        println!("Initialized action queue in: {}", dir.display());
    } else {
        println!("Action queue already initialized: {}", dir.display());
    }
    Ok(())
}
