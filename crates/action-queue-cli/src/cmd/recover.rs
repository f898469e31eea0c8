use crate::output::print_json;
use anyhow::Context;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let queue = super::open_queue(root)?;
    let max_age = queue.config().recovery_max_age();
    let recovered = queue
        .store()
        .startup_recovery(max_age, queue.now_ms())
        .context("startup recovery failed")?;

    if json {
        print_json(&serde_json::json!({ "recovered": recovered }))?;
    } else {
        println!("Recovered {recovered} stranded program(s)");
    }
    Ok(())
}
