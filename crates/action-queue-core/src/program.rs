//! Compile `ActionOp` trees into identified, executable programs.
//!
//! The program id is the lowercase hex SHA-256 of the op tree's canonical
//! JSON (object keys sorted, no insignificant whitespace), so structurally
//! identical trees always compile to the same id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ActionQueueError, Result};
use crate::types::{ActionOp, LoanActionOp, StepPath, SwapActionOp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionProgram {
    pub program_id: String,
    pub action_op: ActionOp,
}

impl ActionProgram {
    /// Check that this program is what `make_action_program` would produce
    /// for its op tree: a valid tree under its own content hash.
    pub fn verify(&self) -> Result<()> {
        validate(&self.action_op, &StepPath::root())?;
        let expected = program_id_for(&self.action_op)?;
        if expected != self.program_id {
            return Err(invalid(
                &StepPath::root(),
                format!(
                    "program id {} does not match its content (expected {expected})",
                    self.program_id
                ),
            ));
        }
        Ok(())
    }
}

/// Validate `op` and wrap it in a program with a content-derived id.
pub fn make_action_program(op: ActionOp) -> Result<ActionProgram> {
    validate(&op, &StepPath::root())?;
    let program_id = program_id_for(&op)?;
    Ok(ActionProgram {
        program_id,
        action_op: op,
    })
}

/// Content hash of an op tree.
pub fn program_id_for(op: &ActionOp) -> Result<String> {
    // serde_json::Value keeps object keys in a BTreeMap, which gives a
    // canonical key order independent of struct field order.
    let canonical = serde_json::to_value(op)?;
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn invalid(step: &StepPath, reason: impl Into<String>) -> ActionQueueError {
    ActionQueueError::InvalidActionOp {
        step: step.clone(),
        reason: reason.into(),
    }
}

fn validate(op: &ActionOp, path: &StepPath) -> Result<()> {
    match op {
        ActionOp::Seq { actions } | ActionOp::Par { actions } => {
            if actions.is_empty() {
                return Err(invalid(path, format!("empty {} node", op.kind())));
            }
            for (i, child) in actions.iter().enumerate() {
                validate(child, &path.child(i))?;
            }
            Ok(())
        }
        ActionOp::Swap(swap) => validate_swap(swap, path),
        ActionOp::LoanBorrow(loan)
        | ActionOp::LoanDeposit(loan)
        | ActionOp::LoanRepay(loan)
        | ActionOp::LoanWithdraw(loan) => validate_loan(loan, path),
    }
}

fn validate_swap(swap: &SwapActionOp, path: &StepPath) -> Result<()> {
    require_id(&swap.from_wallet_id, "fromWalletId", path)?;
    require_id(&swap.to_wallet_id, "toWalletId", path)?;
    if swap.native_amount.is_zero() {
        return Err(invalid(path, "swap nativeAmount must be non-zero"));
    }
    if swap.from_wallet_id == swap.to_wallet_id && swap.from_token_id == swap.to_token_id {
        return Err(invalid(path, "swap source and destination are the same asset"));
    }
    Ok(())
}

fn validate_loan(loan: &LoanActionOp, path: &StepPath) -> Result<()> {
    require_id(&loan.borrow_plugin_id, "borrowPluginId", path)?;
    require_id(&loan.wallet_id, "walletId", path)?;
    if loan.native_amount.is_zero() {
        return Err(invalid(path, "loan nativeAmount must be non-zero"));
    }
    Ok(())
}

fn require_id(value: &str, field: &str, path: &StepPath) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(path, format!("{field} is empty")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::NativeAmount;
    use crate::types::AmountFor;

    fn swap(from: &str, to: &str, amount: u128) -> ActionOp {
        ActionOp::Swap(SwapActionOp {
            from_wallet_id: from.into(),
            from_token_id: None,
            to_wallet_id: to.into(),
            to_token_id: None,
            native_amount: NativeAmount(amount),
            amount_for: AmountFor::To,
        })
    }

    fn deposit(wallet: &str, amount: u128) -> ActionOp {
        ActionOp::LoanDeposit(LoanActionOp {
            borrow_plugin_id: "aave".into(),
            wallet_id: wallet.into(),
            token_id: Some("wbtc".into()),
            native_amount: NativeAmount(amount),
        })
    }

    #[test]
    fn identical_ops_compile_to_same_id() {
        let op = || ActionOp::Seq {
            actions: vec![swap("w1", "w2", 100), deposit("w2", 100)],
        };
        let a = make_action_program(op()).unwrap();
        let b = make_action_program(op()).unwrap();
        assert_eq!(a.program_id, b.program_id);
        assert_eq!(a.program_id.len(), 64);
    }

    #[test]
    fn id_is_independent_of_json_key_order() {
        let a: ActionOp = serde_json::from_str(
            r#"{"type":"loan-repay","borrowPluginId":"aave","walletId":"w","nativeAmount":"5"}"#,
        )
        .unwrap();
        let b: ActionOp = serde_json::from_str(
            r#"{"nativeAmount":5,"walletId":"w","borrowPluginId":"aave","type":"loan-repay"}"#,
        )
        .unwrap();
        assert_eq!(
            make_action_program(a).unwrap().program_id,
            make_action_program(b).unwrap().program_id
        );
    }

    #[test]
    fn different_content_changes_id() {
        let a = make_action_program(deposit("w2", 100)).unwrap();
        let b = make_action_program(deposit("w2", 101)).unwrap();
        assert_ne!(a.program_id, b.program_id);
    }

    #[test]
    fn child_order_changes_id() {
        let a = make_action_program(ActionOp::Par {
            actions: vec![deposit("a", 1), deposit("b", 1)],
        })
        .unwrap();
        let b = make_action_program(ActionOp::Par {
            actions: vec![deposit("b", 1), deposit("a", 1)],
        })
        .unwrap();
        assert_ne!(a.program_id, b.program_id);
    }

    #[test]
    fn empty_seq_is_invalid() {
        let err = make_action_program(ActionOp::Seq { actions: vec![] }).unwrap_err();
        assert!(
            matches!(err, ActionQueueError::InvalidActionOp { ref step, .. } if step.is_root()),
            "got {err:?}"
        );
    }

    #[test]
    fn nested_empty_par_names_its_path() {
        let op = ActionOp::Seq {
            actions: vec![deposit("w", 1), ActionOp::Par { actions: vec![] }],
        };
        let err = make_action_program(op).unwrap_err();
        assert_eq!(err.to_string(), "invalid action op at 1: empty par node");
    }

    #[test]
    fn zero_amount_and_blank_wallet_are_invalid() {
        assert!(make_action_program(deposit("w", 0)).is_err());
        assert!(make_action_program(deposit(" ", 5)).is_err());
    }

    #[test]
    fn swap_into_same_asset_is_invalid() {
        assert!(make_action_program(swap("w1", "w1", 10)).is_err());
    }

    #[test]
    fn compiled_program_verifies() {
        let program = make_action_program(ActionOp::Seq {
            actions: vec![swap("w1", "w2", 1), deposit("w2", 1)],
        })
        .unwrap();
        program.verify().unwrap();
    }

    #[test]
    fn verify_rejects_an_invalid_tree() {
        let forged = ActionProgram {
            program_id: "not-a-hash".into(),
            action_op: ActionOp::Seq { actions: vec![] },
        };
        let err = forged.verify().unwrap_err();
        assert_eq!(err.to_string(), "invalid action op at root: empty seq node");
    }

    #[test]
    fn verify_rejects_an_id_that_does_not_match_the_content() {
        let mut program = make_action_program(deposit("w2", 100)).unwrap();
        program.action_op = deposit("w2", 5_000);
        let err = program.verify().unwrap_err();
        assert!(
            matches!(err, ActionQueueError::InvalidActionOp { ref reason, .. } if reason.contains("does not match")),
            "got {err:?}"
        );
    }
}
