//! Due-time ordering of pending programs.
//!
//! The executor itself never sleeps or polls. A caller builds a
//! `ProgramScheduler` from the store, then calls `ActionQueue::run_due`
//! whenever it wakes up (on startup, on a timer, on app foreground).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::Result;
use crate::state::ActionProgramState;
use crate::store::StateStore;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduledProgram {
    pub next_execution_time: i64,
    pub client_id: String,
    pub program_id: String,
}

/// Min-heap of pending programs for one client, keyed by next execution
/// time.
///
/// Rescheduling a program leaves its old heap entry in place; stale entries
/// are dropped when popped.
#[derive(Debug, Default)]
pub struct ProgramScheduler {
    client_id: String,
    heap: BinaryHeap<Reverse<ScheduledProgram>>,
    /// Current due time per queued program.
    queued: HashMap<String, i64>,
}

impl ProgramScheduler {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Queue every pending program stored for `client_id`.
    pub fn from_store(store: &StateStore, client_id: &str) -> Result<Self> {
        let mut scheduler = Self::new(client_id);
        for state in store.list_states(Some(client_id))? {
            scheduler.schedule(&state);
        }
        Ok(scheduler)
    }

    /// Queue `state` at its next execution time, replacing any earlier entry.
    /// Effective and executing programs, and other clients' programs, are
    /// dropped from the queue instead.
    pub fn schedule(&mut self, state: &ActionProgramState) {
        if state.client_id != self.client_id || state.effective || state.executing {
            self.queued.remove(&state.program_id);
            return;
        }
        self.queued
            .insert(state.program_id.clone(), state.next_execution_time);
        self.heap.push(Reverse(ScheduledProgram {
            next_execution_time: state.next_execution_time,
            client_id: state.client_id.clone(),
            program_id: state.program_id.clone(),
        }));
    }

    /// Remove and return every entry due at or before `now_ms`, earliest first.
    pub fn pop_due(&mut self, now_ms: i64) -> Vec<ScheduledProgram> {
        let mut due = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.next_execution_time > now_ms {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            if self.queued.get(&entry.program_id) == Some(&entry.next_execution_time) {
                self.queued.remove(&entry.program_id);
                due.push(entry);
            }
        }
        self.drop_stale_top();
        due
    }

    /// Due time of the earliest queued program.
    pub fn next_due_at(&mut self) -> Option<i64> {
        self.drop_stale_top();
        self.heap.peek().map(|Reverse(e)| e.next_execution_time)
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    fn drop_stale_top(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.queued.get(&top.program_id) == Some(&top.next_execution_time) {
                break;
            }
            self.heap.pop();
        }
    }
}
