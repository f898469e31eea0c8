use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::wallet::TxSummary;

// ---------------------------------------------------------------------------
// ActionProgramState
// ---------------------------------------------------------------------------

/// Durable resumability record for one program under one client.
///
/// Transitions: `Pending → Executing → Effective`, or `Executing → Pending`
/// with a later `next_execution_time` after a failed attempt. Timestamps are
/// milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionProgramState {
    pub client_id: String,
    pub program_id: String,
    /// The program's financial effect has taken place. Never retried once set.
    pub effective: bool,
    /// Reentrancy guard: a live execution currently owns this program.
    pub executing: bool,
    pub last_execution_time: i64,
    pub next_execution_time: i64,
    /// Failed attempts so far; drives the backoff delay.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ActionProgramState {
    pub fn new(client_id: impl Into<String>, program_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            program_id: program_id.into(),
            effective: false,
            executing: false,
            last_execution_time: 0,
            next_execution_time: 0,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn status(&self) -> ProgramStatus {
        if self.effective {
            ProgramStatus::Effective
        } else if self.executing {
            ProgramStatus::Executing
        } else {
            ProgramStatus::Pending
        }
    }

    /// Whether the scheduler should pick this program up at `now_ms`.
    pub fn is_due(&self, now_ms: i64) -> bool {
        matches!(self.status(), ProgramStatus::Pending) && self.next_execution_time <= now_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    Pending,
    Executing,
    Effective,
}

impl ProgramStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgramStatus::Pending => "pending",
            ProgramStatus::Executing => "executing",
            ProgramStatus::Effective => "effective",
        }
    }
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepRecord
// ---------------------------------------------------------------------------

/// Journal entry for one leaf of a program.
///
/// Written after every accepted broadcast, so a transaction recorded here is
/// never broadcast again when the program resumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Transactions accepted by the network so far, in broadcast order.
    pub txs: Vec<TxSummary>,
    /// Number of transactions the step's quote required.
    pub total_txs: usize,
    /// Every transaction was broadcast and confirmed.
    pub confirmed: bool,
}

impl StepRecord {
    pub fn fully_broadcast(&self) -> bool {
        self.total_txs > 0 && self.txs.len() >= self.total_txs
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_pending_and_due() {
        let s = ActionProgramState::new("client", "prog");
        assert_eq!(s.status(), ProgramStatus::Pending);
        assert!(s.is_due(0));
        assert_eq!(s.last_execution_time, 0);
        assert_eq!(s.next_execution_time, 0);
    }

    #[test]
    fn executing_and_effective_are_never_due() {
        let mut s = ActionProgramState::new("client", "prog");
        s.executing = true;
        assert!(!s.is_due(i64::MAX));
        s.executing = false;
        s.effective = true;
        assert!(!s.is_due(i64::MAX));
    }

    #[test]
    fn future_next_execution_is_not_due() {
        let mut s = ActionProgramState::new("client", "prog");
        s.next_execution_time = 5_000;
        assert!(!s.is_due(4_999));
        assert!(s.is_due(5_000));
    }

    #[test]
    fn serializes_with_original_field_names() {
        let s = ActionProgramState::new("c", "p");
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["clientId"], "c");
        assert_eq!(v["programId"], "p");
        assert_eq!(v["effective"], false);
        assert_eq!(v["nextExecutionTime"], 0);
        // attempts/lastError are optional on the way in
        let back: ActionProgramState = serde_json::from_str(
            r#"{"clientId":"c","programId":"p","effective":false,"executing":false,
                "lastExecutionTime":0,"nextExecutionTime":0}"#,
        )
        .unwrap();
        assert_eq!(back, s);
    }
}
