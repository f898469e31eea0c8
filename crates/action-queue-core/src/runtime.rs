//! Live executor.
//!
//! `ActionQueue` owns the state store and engine config and drives programs
//! through `pending → executing → effective`. Every accepted broadcast is
//! journaled before the next one, so a program interrupted by a crash or a
//! failed step resumes exactly where it stopped.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{BackoffConfig, EngineConfig};
use crate::context::{ExecutionContext, ExecutionOutput};
use crate::dryrun::{dryrun_action_program, DryrunReport, DryrunScope};
use crate::error::{ActionQueueError, ExecutionError, LeafFailure, Result};
use crate::program::ActionProgram;
use crate::scheduler::ProgramScheduler;
use crate::state::{ActionProgramState, Clock, StepRecord, SystemClock};
use crate::store::{BeginOutcome, StateStore};
use crate::types::{ActionOp, LeafAction, OpNode, StepPath};

pub struct ActionQueue {
    store: StateStore,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl ActionQueue {
    pub fn new(store: StateStore, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Execute `program` for `ctx.client_id`.
    ///
    /// Returns the current state without doing anything when the program is
    /// already effective or another invocation owns it. On failure the state
    /// goes back to pending with a backoff delay and the error carries every
    /// failed leaf. A program that does not verify against its own id is
    /// rejected before anything is stored.
    pub async fn run_action_program(
        &self,
        ctx: &ExecutionContext,
        program: &ActionProgram,
    ) -> Result<ActionProgramState> {
        program.verify()?;
        let client_id = ctx.client_id.as_str();
        let program_id = program.program_id.as_str();
        self.store.save_program(client_id, program)?;

        let mut state = match self
            .store
            .try_begin_execution(client_id, program_id, self.now_ms())?
        {
            BeginOutcome::Started(state) => state,
            BeginOutcome::AlreadyExecuting(state) => {
                debug!(program_id, client_id, "program already executing, not starting");
                return Ok(state);
            }
            BeginOutcome::AlreadyEffective(state) => {
                debug!(program_id, client_id, "program already effective");
                return Ok(state);
            }
        };
        info!(program_id, client_id, attempt = state.attempts + 1, "executing action program");

        let failures = match self.store.load_steps(client_id, program_id) {
            Ok(steps) => {
                let run = Run {
                    queue: self,
                    ctx,
                    program_id,
                    steps: &steps,
                };
                run.node(&program.action_op, StepPath::root()).await
            }
            Err(e) => vec![LeafFailure {
                step: StepPath::root(),
                error: ExecutionError::Store(e.to_string()),
            }],
        };

        match settle_attempt(&mut state, &failures, self.now_ms(), &self.config.backoff) {
            Settled::Effective => {
                self.store.save_state(&state)?;
                info!(program_id, client_id, "action program effective");
                return Ok(state);
            }
            Settled::Retry => {
                self.store.save_state(&state)?;
                warn!(
                    program_id,
                    client_id,
                    attempts = state.attempts,
                    next_execution_time = state.next_execution_time,
                    "action program failed"
                );
            }
            Settled::Stranded => {
                // Best effort: the store is what just failed
                if let Err(e) = self.store.save_state(&state) {
                    warn!(program_id, client_id, error = %e, "could not record stranded state");
                }
                error!(
                    program_id,
                    client_id,
                    "broadcast not journaled; program left executing for recovery"
                );
            }
        }
        Err(ActionQueueError::ProgramFailed {
            state: Box::new(state),
            failures,
        })
    }

    /// Run a program stored by an earlier `run_action_program` call.
    pub async fn resume_action_program(
        &self,
        ctx: &ExecutionContext,
        program_id: &str,
    ) -> Result<ActionProgramState> {
        let program = self
            .store
            .load_program(&ctx.client_id, program_id)?
            .ok_or_else(|| ActionQueueError::ProgramNotFound(program_id.to_string()))?;
        self.run_action_program(ctx, &program).await
    }

    /// Run every program in `scheduler` that is due now, once each.
    ///
    /// Failed programs are rescheduled at their backoff time; their failures
    /// are already persisted in the state. Returns the resulting states.
    pub async fn run_due(
        &self,
        ctx: &ExecutionContext,
        scheduler: &mut ProgramScheduler,
    ) -> Result<Vec<ActionProgramState>> {
        let mut results = Vec::new();
        for entry in scheduler.pop_due(self.now_ms()) {
            let state = match self.resume_action_program(ctx, &entry.program_id).await {
                Ok(state) => state,
                Err(ActionQueueError::ProgramFailed { state, .. }) => *state,
                Err(ActionQueueError::ProgramNotFound(program_id)) => {
                    warn!(%program_id, "scheduled program has no stored record");
                    continue;
                }
                Err(e) => return Err(e),
            };
            scheduler.schedule(&state);
            results.push(state);
        }
        Ok(results)
    }

    /// Dry-run what is left of `program` for `ctx.client_id`.
    pub async fn dryrun_remaining(
        &self,
        ctx: &ExecutionContext,
        program: &ActionProgram,
    ) -> Result<DryrunReport> {
        let state = self
            .store
            .load_state(&ctx.client_id, &program.program_id)?
            .unwrap_or_else(|| ActionProgramState::new(&ctx.client_id, &program.program_id));
        let steps = self.store.load_steps(&ctx.client_id, &program.program_id)?;
        Ok(dryrun_action_program(
            ctx,
            program,
            &state,
            DryrunScope::Remaining(&steps),
            self.config.quote_timeout(),
        )
        .await)
    }

    /// Journaled broadcasts of a program, one entry per leaf that broadcast
    /// anything, in tree order.
    pub fn program_outputs(&self, client_id: &str, program: &ActionProgram) -> Result<Vec<ExecutionOutput>> {
        let steps = self.store.load_steps(client_id, &program.program_id)?;
        Ok(program
            .action_op
            .leaves()
            .into_iter()
            .filter_map(|(step, leaf)| {
                let record = steps.get(&step)?;
                (!record.txs.is_empty()).then(|| ExecutionOutput {
                    action: leaf.kind(),
                    broadcast_txs: record.txs.clone(),
                    step,
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Attempt outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Effective,
    /// Back to pending, due again after the backoff delay.
    Retry,
    /// An accepted broadcast is missing from the journal. The state keeps
    /// `executing` so no scheduler picks it up; only `startup_recovery` or an
    /// operator releases it.
    Stranded,
}

/// Apply the outcome of one pass to `state`.
fn settle_attempt(
    state: &mut ActionProgramState,
    failures: &[LeafFailure],
    now: i64,
    backoff: &BackoffConfig,
) -> Settled {
    state.last_execution_time = now;
    if failures.is_empty() {
        state.executing = false;
        state.effective = true;
        state.last_error = None;
        return Settled::Effective;
    }

    state.attempts += 1;
    state.last_error = Some(
        failures
            .iter()
            .map(|f| format!("{}: {}", f.step, f.error))
            .collect::<Vec<_>>()
            .join("; "),
    );
    if failures.iter().any(|f| f.error.is_unjournaled()) {
        return Settled::Stranded;
    }
    state.executing = false;
    state.next_execution_time = now + backoff.delay_ms(state.attempts);
    Settled::Retry
}

// ---------------------------------------------------------------------------
// Tree walk
// ---------------------------------------------------------------------------

/// One live pass over a program.
struct Run<'a> {
    queue: &'a ActionQueue,
    ctx: &'a ExecutionContext,
    program_id: &'a str,
    /// Journal as of the start of this pass.
    steps: &'a BTreeMap<StepPath, StepRecord>,
}

impl<'a> Run<'a> {
    /// Returns the failed leaves under `op`; empty means `op` completed.
    fn node(&'a self, op: &'a ActionOp, path: StepPath) -> BoxFuture<'a, Vec<LeafFailure>> {
        async move {
            match op.as_node() {
                OpNode::Seq(actions) => {
                    for (i, child) in actions.iter().enumerate() {
                        let failures = self.node(child, path.child(i)).await;
                        if !failures.is_empty() {
                            debug!(step = %path, remaining = actions.len() - i - 1, "seq stopped");
                            return failures;
                        }
                    }
                    Vec::new()
                }
                OpNode::Par(actions) => {
                    let children = actions
                        .iter()
                        .enumerate()
                        .map(|(i, child)| self.node(child, path.child(i)));
                    join_all(children).await.into_iter().flatten().collect()
                }
                OpNode::Leaf(leaf) => {
                    match self.leaf(leaf, &path).await {
                        Ok(()) => Vec::new(),
                        Err(error) => {
                            warn!(program_id = self.program_id, step = %path, %error, "leaf failed");
                            vec![LeafFailure { step: path, error }]
                        }
                    }
                }
            }
        }
        .boxed()
    }

    async fn leaf(&self, leaf: LeafAction<'_>, step: &StepPath) -> std::result::Result<(), ExecutionError> {
        let mut record = self.steps.get(step).cloned().unwrap_or_default();
        if record.confirmed {
            debug!(%step, "step already confirmed, skipping");
            return Ok(());
        }

        let account = &self.ctx.account;
        if !record.fully_broadcast() {
            let quote = account.quote(leaf).await?;
            for credit in &quote.credits {
                if let Some(token_id) = &credit.token_id {
                    account.enable_token(&credit.wallet_id, token_id).await?;
                }
            }
            record.total_txs = quote.txs.len();
            if !record.txs.is_empty() {
                debug!(%step, already = record.txs.len(), total = record.total_txs, "resuming partially broadcast step");
            }
            for tx in quote.txs.iter().skip(record.txs.len()) {
                let summary = account.broadcast(tx).await?;
                let txid = summary.txid.clone().unwrap_or_default();
                record.txs.push(summary);
                self.journal(step, &record)
                    .map_err(|e| ExecutionError::Unjournaled {
                        txid,
                        reason: e.to_string(),
                    })?;
            }
        }

        let after = self.queue.config.confirmation_timeout();
        for tx in &record.txs {
            timeout(after, account.wait_for_confirmation(tx))
                .await
                .map_err(|_| ExecutionError::Timeout {
                    stage: "confirmation",
                    after,
                })??;
        }
        record.confirmed = true;
        self.journal(step, &record)
    }

    fn journal(&self, step: &StepPath, record: &StepRecord) -> std::result::Result<(), ExecutionError> {
        self.queue
            .store
            .record_step(&self.ctx.client_id, self.program_id, step, record)
            .map_err(|e| ExecutionError::Store(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
