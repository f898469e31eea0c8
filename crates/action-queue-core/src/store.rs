//! Durable storage for program state using redb.
//!
//! # Table design
//!
//! Every table is keyed by a string composed of `\0`-separated parts and
//! holds a JSON-encoded value:
//! ```text
//! program_states  client \0 program_id          -> ActionProgramState
//! programs        client \0 program_id          -> ActionProgram
//! program_steps   client \0 program_id \0 path  -> StepRecord
//! loan_accounts   client \0 loan_account_id     -> LoanAccount
//! ```
//!
//! Because the client id leads every key, all records for one client (or one
//! program) form a contiguous key range and are fetched with one range scan.
//! Writes go through redb write transactions, which are serialized, so a
//! read-modify-write inside one transaction is atomic per key.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{store_err, ActionQueueError, Result};
use crate::loan::LoanAccount;
use crate::program::ActionProgram;
use crate::state::{ActionProgramState, StepRecord};
use crate::types::StepPath;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("program_states");
const PROGRAMS: TableDefinition<&str, &[u8]> = TableDefinition::new("programs");
const STEPS: TableDefinition<&str, &[u8]> = TableDefinition::new("program_steps");
const LOAN_ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("loan_accounts");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

const SEP: char = '\0';
/// Sorts immediately after `SEP`; closes a prefix range.
const SEP_END: char = '\u{1}';

fn program_key(client_id: &str, program_id: &str) -> String {
    format!("{client_id}{SEP}{program_id}")
}

fn step_key(client_id: &str, program_id: &str, step: &StepPath) -> String {
    format!("{client_id}{SEP}{program_id}{SEP}{step}")
}

/// `[start, end)` covering every key that begins with `prefix` + `SEP`.
fn prefix_range(prefix: &str) -> (String, String) {
    (format!("{prefix}{SEP}"), format!("{prefix}{SEP_END}"))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

// ---------------------------------------------------------------------------
// BeginOutcome
// ---------------------------------------------------------------------------

/// Result of trying to claim a program for live execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The caller now owns the program; `executing` is set in the store.
    Started(ActionProgramState),
    /// Another execution owns the program.
    AlreadyExecuting(ActionProgramState),
    /// Nothing left to do.
    AlreadyEffective(ActionProgramState),
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Persistent store for program states, programs and step journals.
pub struct StateStore {
    db: Database,
}

impl StateStore {
    /// Open or create the redb database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        Self::init(db)
    }

    /// A store that lives only as long as the returned value.
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(store_err)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        // Ensure the tables exist before any reads
        let wt = db.begin_write().map_err(store_err)?;
        for table in [STATES, PROGRAMS, STEPS, LOAN_ACCOUNTS] {
            wt.open_table(table).map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    // -- generic helpers ------------------------------------------------------

    fn get<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<T>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let t = rt.open_table(table).map_err(store_err)?;
        match t.get(key).map_err(store_err)? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, table: TableDefinition<&str, &[u8]>, key: &str, value: &T) -> Result<()> {
        let bytes = encode(value)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut t = wt.open_table(table).map_err(store_err)?;
            t.insert(key, bytes.as_slice()).map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, T)>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let t = rt.open_table(table).map_err(store_err)?;
        let (start, end) = prefix.map(prefix_range).unwrap_or_default();
        let entries = match prefix {
            Some(_) => t.range(start.as_str()..end.as_str()),
            None => t.iter(),
        }
        .map_err(store_err)?;

        let mut out = Vec::new();
        for entry in entries {
            let (k, v) = entry.map_err(store_err)?;
            out.push((k.value().to_string(), decode(v.value())?));
        }
        Ok(out)
    }

    // -- program state --------------------------------------------------------

    pub fn load_state(&self, client_id: &str, program_id: &str) -> Result<Option<ActionProgramState>> {
        self.get(STATES, &program_key(client_id, program_id))
    }

    pub fn save_state(&self, state: &ActionProgramState) -> Result<()> {
        self.put(STATES, &program_key(&state.client_id, &state.program_id), state)
    }

    /// All states for `client_id`, or for every client when `None`, in key
    /// order.
    pub fn list_states(&self, client_id: Option<&str>) -> Result<Vec<ActionProgramState>> {
        Ok(self
            .scan::<ActionProgramState>(STATES, client_id)?
            .into_iter()
            .map(|(_, s)| s)
            .collect())
    }

    /// Claim `program_id` for execution at `now_ms`.
    ///
    /// Reads, checks and writes the state inside one write transaction, so two
    /// callers racing on the same program cannot both see `Started`. A missing
    /// state is created.
    pub fn try_begin_execution(
        &self,
        client_id: &str,
        program_id: &str,
        now_ms: i64,
    ) -> Result<BeginOutcome> {
        let key = program_key(client_id, program_id);
        let wt = self.db.begin_write().map_err(store_err)?;
        let outcome = {
            let mut t = wt.open_table(STATES).map_err(store_err)?;
            let existing: Option<ActionProgramState> = match t.get(key.as_str()).map_err(store_err)? {
                Some(v) => Some(decode(v.value())?),
                None => None,
            };
            let mut state =
                existing.unwrap_or_else(|| ActionProgramState::new(client_id, program_id));
            if state.effective {
                BeginOutcome::AlreadyEffective(state)
            } else if state.executing {
                BeginOutcome::AlreadyExecuting(state)
            } else {
                state.executing = true;
                state.last_execution_time = now_ms;
                let bytes = encode(&state)?;
                t.insert(key.as_str(), bytes.as_slice()).map_err(store_err)?;
                BeginOutcome::Started(state)
            }
        };
        wt.commit().map_err(store_err)?;
        Ok(outcome)
    }

    /// Reset `executing` on states stranded by a crash.
    ///
    /// A state counts as stranded when `executing` is set and its
    /// `last_execution_time` is older than `max_age` before `now_ms`. Recovered
    /// states become due immediately. Returns the number recovered.
    pub fn startup_recovery(&self, max_age: Duration, now_ms: i64) -> Result<u32> {
        let cutoff = now_ms - i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let stranded: Vec<ActionProgramState> = self
            .list_states(None)?
            .into_iter()
            .filter(|s| s.executing && s.last_execution_time < cutoff)
            .collect();

        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut t = wt.open_table(STATES).map_err(store_err)?;
            for mut state in stranded.iter().cloned() {
                warn!(
                    program_id = %state.program_id,
                    client_id = %state.client_id,
                    "recovering program stranded in executing state"
                );
                state.executing = false;
                state.next_execution_time = now_ms;
                state.last_error = Some("recovered from restart".into());
                let bytes = encode(&state)?;
                t.insert(program_key(&state.client_id, &state.program_id).as_str(), bytes.as_slice())
                    .map_err(store_err)?;
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(stranded.len() as u32)
    }

    // -- programs -------------------------------------------------------------

    pub fn save_program(&self, client_id: &str, program: &ActionProgram) -> Result<()> {
        self.put(PROGRAMS, &program_key(client_id, &program.program_id), program)
    }

    pub fn load_program(&self, client_id: &str, program_id: &str) -> Result<Option<ActionProgram>> {
        self.get(PROGRAMS, &program_key(client_id, program_id))
    }

    // -- step journal ---------------------------------------------------------

    pub fn record_step(
        &self,
        client_id: &str,
        program_id: &str,
        step: &StepPath,
        record: &StepRecord,
    ) -> Result<()> {
        self.put(STEPS, &step_key(client_id, program_id, step), record)
    }

    pub fn load_steps(&self, client_id: &str, program_id: &str) -> Result<BTreeMap<StepPath, StepRecord>> {
        let prefix = program_key(client_id, program_id);
        let mut out = BTreeMap::new();
        for (key, record) in self.scan::<StepRecord>(STEPS, Some(&prefix))? {
            let path_str = key.rsplit(SEP).next().unwrap_or_default();
            let path: StepPath = path_str
                .parse()
                .map_err(|e| store_err(format!("bad step key {key:?}: {e}")))?;
            out.insert(path, record);
        }
        Ok(out)
    }

    /// Remove an effective program's state, record and step journal.
    ///
    /// A program that has not taken effect still needs its journal to resume,
    /// so clearing it is refused.
    pub fn clear_program(&self, client_id: &str, program_id: &str) -> Result<()> {
        match self.load_state(client_id, program_id)? {
            None => return Err(ActionQueueError::ProgramNotFound(program_id.to_string())),
            Some(state) if !state.effective => {
                return Err(ActionQueueError::ProgramNotEffective(program_id.to_string()))
            }
            Some(_) => {}
        }
        let key = program_key(client_id, program_id);
        let step_keys: Vec<String> = self
            .scan::<StepRecord>(STEPS, Some(&key))?
            .into_iter()
            .map(|(k, _)| k)
            .collect();

        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut states = wt.open_table(STATES).map_err(store_err)?;
            states.remove(key.as_str()).map_err(store_err)?;
            let mut programs = wt.open_table(PROGRAMS).map_err(store_err)?;
            programs.remove(key.as_str()).map_err(store_err)?;
            let mut steps = wt.open_table(STEPS).map_err(store_err)?;
            for k in &step_keys {
                steps.remove(k.as_str()).map_err(store_err)?;
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    // -- loan accounts --------------------------------------------------------

    pub fn save_loan_account(&self, client_id: &str, account: &LoanAccount) -> Result<()> {
        self.put(LOAN_ACCOUNTS, &program_key(client_id, &account.id), account)
    }

    pub fn load_loan_account(&self, client_id: &str, account_id: &str) -> Result<Option<LoanAccount>> {
        self.get(LOAN_ACCOUNTS, &program_key(client_id, account_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
