use crate::output::print_json;
use action_queue_core::make_action_program;
use std::path::Path;

pub fn run(op_path: &Path, json: bool) -> anyhow::Result<()> {
    let op = super::load_op(op_path)?;
    let program = make_action_program(op)?;

    if json {
        print_json(&serde_json::json!({
            "program_id": program.program_id,
            "leaves": program.action_op.leaves().len(),
            "program": program,
        }))?;
    } else {
        println!("{}", program.program_id);
    }
    Ok(())
}
