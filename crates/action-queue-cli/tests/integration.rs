#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn aq(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("aq").unwrap();
    cmd.current_dir(dir.path())
        .env("AQ_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

const LEDGER: &str = "\
wallets:
  btc:
    currency_code: BTC
    network_fee: 1
    native_balance: 1000
  eth:
    currency_code: ETH
    network_fee: 2
    native_balance: 100
";

const SWAP_THEN_DEPOSIT: &str = r#"{
  "type": "seq",
  "actions": [
    {"type": "swap", "fromWalletId": "btc", "toWalletId": "eth", "toTokenId": "wbtc",
     "nativeAmount": "5", "amountFor": "to"},
    {"type": "loan-deposit", "borrowPluginId": "aave", "walletId": "eth", "tokenId": "wbtc",
     "nativeAmount": "5"}
  ]
}"#;

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.output().unwrap();
    assert!(
        out.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// aq init / compile
// ---------------------------------------------------------------------------

#[test]
fn init_creates_queue_dir_and_config() {
    let dir = TempDir::new().unwrap();
    aq(&dir).arg("init").assert().success();
    assert!(dir.path().join(".action-queue").is_dir());
    assert!(dir.path().join(".action-queue/config.yaml").exists());

    aq(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already initialized"));
}

#[test]
fn compile_prints_a_stable_program_id() {
    let dir = TempDir::new().unwrap();
    let op = write(&dir, "op.json", SWAP_THEN_DEPOSIT);

    let first = aq(&dir).arg("compile").arg(&op).output().unwrap();
    let second = aq(&dir).arg("compile").arg(&op).output().unwrap();
    assert!(first.status.success());
    let id = String::from_utf8(first.stdout).unwrap();
    assert_eq!(id.trim().len(), 64);
    assert_eq!(id, String::from_utf8(second.stdout).unwrap());
}

#[test]
fn compile_rejects_an_empty_par() {
    let dir = TempDir::new().unwrap();
    let op = write(
        &dir,
        "op.json",
        r#"{"type":"seq","actions":[{"type":"par","actions":[]}]}"#,
    );
    aq(&dir)
        .arg("compile")
        .arg(&op)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid action op at 0"));
}

// ---------------------------------------------------------------------------
// aq dryrun
// ---------------------------------------------------------------------------

#[test]
fn dryrun_reports_leaves_and_fees_without_touching_the_ledger() {
    let dir = TempDir::new().unwrap();
    let op = write(&dir, "op.json", SWAP_THEN_DEPOSIT);
    let ledger = write(&dir, "ledger.yaml", LEDGER);

    let v = json_stdout(aq(&dir).args(["--json", "dryrun"]).arg(&op).arg("--ledger").arg(&ledger));
    assert_eq!(v["clean"], true);
    assert_eq!(v["leaves"].as_array().unwrap().len(), 2);
    assert_eq!(v["leaves"][1]["action"], "loan-deposit");
    assert_eq!(v["network_fees"]["BTC"], "1");
    assert_eq!(v["network_fees"]["ETH"], "4");
    assert_eq!(std::fs::read_to_string(&ledger).unwrap(), LEDGER);
}

#[test]
fn dryrun_injects_fee_cover_swap_when_fee_wallet_is_short() {
    let dir = TempDir::new().unwrap();
    let op = write(&dir, "op.json", SWAP_THEN_DEPOSIT);
    let ledger = write(
        &dir,
        "ledger.yaml",
        "wallets:\n  btc: {currency_code: BTC, network_fee: 1, native_balance: 1000}\n  eth: {currency_code: ETH, network_fee: 5, native_balance: 3}\n",
    );

    let v = json_stdout(
        aq(&dir)
            .args(["--json", "dryrun"])
            .arg(&op)
            .arg("--ledger")
            .arg(&ledger)
            .args(["--fee-wallet", "eth", "--source-wallet", "btc"]),
    );
    assert_eq!(v["fee_cover_injected"], true);
    assert_eq!(v["fee_cover"]["networkFees"]["ETH"], "10");
    assert_ne!(v["program_id"], v["simulated_program_id"]);
}

// ---------------------------------------------------------------------------
// aq run / state
// ---------------------------------------------------------------------------

#[test]
fn run_executes_and_persists_state_and_ledger() {
    let dir = TempDir::new().unwrap();
    let op = write(&dir, "op.json", SWAP_THEN_DEPOSIT);
    let ledger = write(&dir, "ledger.yaml", LEDGER);

    let v = json_stdout(aq(&dir).args(["--json", "run"]).arg(&op).arg("--ledger").arg(&ledger));
    assert_eq!(v["state"]["effective"], true);
    assert_eq!(v["outputs"].as_array().unwrap().len(), 2);
    let program_id = v["state"]["programId"].as_str().unwrap().to_string();

    let written = std::fs::read_to_string(&ledger).unwrap();
    assert!(written.contains("wbtc"), "ledger not updated:\n{written}");

    aq(&dir)
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("effective"));

    let shown = json_stdout(aq(&dir).args(["--json", "state", "show", &program_id]));
    assert_eq!(shown["state"]["effective"], true);
    assert_eq!(shown["outputs"][0]["action"], "swap");

    // Second run is a no-op
    let again = json_stdout(aq(&dir).args(["--json", "run"]).arg(&op).arg("--ledger").arg(&ledger));
    assert_eq!(again["state"]["effective"], true);
    assert_eq!(std::fs::read_to_string(&ledger).unwrap(), written);
}

#[test]
fn run_records_the_program_on_a_loan_account() {
    let dir = TempDir::new().unwrap();
    let op = write(&dir, "op.json", SWAP_THEN_DEPOSIT);
    let ledger = write(&dir, "ledger.yaml", LEDGER);
    aq(&dir)
        .arg("run")
        .arg(&op)
        .arg("--ledger")
        .arg(&ledger)
        .args(["--loan-account", "loan-1", "--loan-plugin", "aave", "--loan-type", "loan-deposit"])
        .assert()
        .success();

    aq(&dir)
        .arg("run")
        .arg(&op)
        .arg("--ledger")
        .arg(&ledger)
        .args(["--loan-account", "loan-1", "--loan-plugin", "aave", "--loan-type", "loan-close"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown loan program type"));
}

#[test]
fn failed_run_exits_nonzero_and_tick_retries_after_backoff() {
    let dir = TempDir::new().unwrap();
    aq(&dir).arg("init").assert().success();
    // No backoff so the retry is due immediately
    std::fs::write(
        dir.path().join(".action-queue/config.yaml"),
        "backoff:\n  base_secs: 0\n  max_secs: 0\n",
    )
    .unwrap();
    let op = write(&dir, "op.json", SWAP_THEN_DEPOSIT);
    let ledger = write(
        &dir,
        "ledger.yaml",
        &format!("{LEDGER}faults:\n  - stage: broadcast\n    action: loan-deposit\n    times: 1\n    reason: mempool full\n"),
    );

    aq(&dir)
        .arg("run")
        .arg(&op)
        .arg("--ledger")
        .arg(&ledger)
        .assert()
        .failure()
        .stderr(predicate::str::contains("mempool full"));

    let v = json_stdout(aq(&dir).args(["--json", "tick", "--ledger"]).arg(&ledger));
    let ran = v["ran"].as_array().unwrap();
    assert_eq!(ran.len(), 1);
    assert_eq!(ran[0]["effective"], true);
    assert_eq!(v["pending"], 0);

    aq(&dir)
        .args(["tick", "--ledger"])
        .arg(&ledger)
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing due."));
}

#[test]
fn run_with_fee_wallet_executes_the_fee_covered_program() {
    let dir = TempDir::new().unwrap();
    let op = write(&dir, "op.json", SWAP_THEN_DEPOSIT);
    let ledger = write(
        &dir,
        "ledger.yaml",
        "wallets:\n  btc: {currency_code: BTC, network_fee: 1, native_balance: 1000}\n  eth: {currency_code: ETH, network_fee: 5, native_balance: 3}\n",
    );

    let planned = json_stdout(
        aq(&dir)
            .args(["--json", "dryrun"])
            .arg(&op)
            .arg("--ledger")
            .arg(&ledger)
            .args(["--fee-wallet", "eth", "--source-wallet", "btc"]),
    );

    let v = json_stdout(
        aq(&dir)
            .args(["--json", "run"])
            .arg(&op)
            .arg("--ledger")
            .arg(&ledger)
            .args(["--fee-wallet", "eth", "--source-wallet", "btc"]),
    );
    assert_eq!(v["fee_cover_injected"], true);
    assert_eq!(v["state"]["effective"], true);
    assert_eq!(v["state"]["programId"], planned["program_id"]);
    // swap and fee swap in one par, then the deposit
    let steps: Vec<&str> = v["outputs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["step"].as_str().unwrap())
        .collect();
    assert_eq!(steps, vec!["0.0", "0.1", "1"]);

    let written = std::fs::read_to_string(&ledger).unwrap();
    assert!(written.contains("wbtc"), "ledger not updated:\n{written}");
}

#[test]
fn state_clear_only_removes_effective_programs() {
    let dir = TempDir::new().unwrap();
    aq(&dir).arg("init").assert().success();
    std::fs::write(
        dir.path().join(".action-queue/config.yaml"),
        "backoff:\n  base_secs: 0\n  max_secs: 0\n",
    )
    .unwrap();
    let op = write(&dir, "op.json", SWAP_THEN_DEPOSIT);
    let ledger = write(
        &dir,
        "ledger.yaml",
        &format!("{LEDGER}faults:\n  - stage: broadcast\n    action: loan-deposit\n    times: 1\n    reason: mempool full\n"),
    );
    let id = String::from_utf8(aq(&dir).arg("compile").arg(&op).output().unwrap().stdout).unwrap();
    let id = id.trim();

    aq(&dir).arg("run").arg(&op).arg("--ledger").arg(&ledger).assert().failure();
    aq(&dir)
        .args(["state", "clear", id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not effective"));

    aq(&dir).args(["tick", "--ledger"]).arg(&ledger).assert().success();
    aq(&dir)
        .args(["state", "clear", id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared program"));
    aq(&dir)
        .args(["state", "show", id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn state_show_unknown_program_fails() {
    let dir = TempDir::new().unwrap();
    aq(&dir)
        .args(["state", "show", "deadbeef"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn recover_on_fresh_store_recovers_nothing() {
    let dir = TempDir::new().unwrap();
    aq(&dir)
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("Recovered 0"));
}
