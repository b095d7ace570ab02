// src/exec/runner.rs

//! Worker pool executing step action functions.
//!
//! Each in-flight step gets one blocking worker task. A worker runs the
//! action to completion and always pushes a completion record into the
//! shared completions channel: user errors and panics are both caught at
//! the worker boundary and rendered as `Failure`, never orphaning the
//! step's state.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dag::step::{ActionFn, StepId, StepStatus};
use crate::exec::environment::StepEnvironment;

/// `(step_id, status, return_value)` pushed by a worker when its action
/// finishes.
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub step_id: StepId,
    pub status: StepStatus,
    pub value: Value,
}

/// The pool of in-flight workers, owned by the manager.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    completions_tx: mpsc::UnboundedSender<CompletionRecord>,
    completions_rx: mpsc::UnboundedReceiver<CompletionRecord>,
    active: HashMap<StepId, JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            completions_tx,
            completions_rx,
            active: HashMap::new(),
        }
    }

    /// Number of workers whose completion has not been collected yet.
    pub fn in_flight(&self) -> usize {
        self.active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    /// Spawn a worker for the given step.
    ///
    /// The action runs on the blocking thread pool so user code may block
    /// freely; the manager's loop is never stalled by it.
    pub fn spawn<C>(
        &mut self,
        step_id: StepId,
        action: ActionFn<C>,
        context: Arc<C>,
        environment: StepEnvironment,
    ) where
        C: Send + Sync + 'static,
    {
        let completions_tx = self.completions_tx.clone();
        let id = step_id.clone();

        let handle = tokio::task::spawn_blocking(move || {
            debug!(step = %id, "worker starting action");
            let outcome = catch_unwind(AssertUnwindSafe(|| action(&context, &environment)));

            let record = match outcome {
                Ok(Ok(value)) => {
                    info!(step = %id, "action succeeded");
                    CompletionRecord {
                        step_id: id.clone(),
                        status: StepStatus::Success,
                        value,
                    }
                }
                Ok(Err(err)) => {
                    info!(step = %id, error = %format!("{err:#}"), "action failed");
                    CompletionRecord {
                        step_id: id.clone(),
                        status: StepStatus::Failure,
                        value: json!(format!("{err:#}")),
                    }
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(step = %id, panic = %message, "action panicked");
                    CompletionRecord {
                        step_id: id.clone(),
                        status: StepStatus::Failure,
                        value: json!(format!("action panicked: {message}")),
                    }
                }
            };

            // The receiver only goes away when the manager is gone, at
            // which point the completion has no audience anyway.
            let _ = completions_tx.send(record);
        });

        self.active.insert(step_id, handle);
    }

    /// Non-blocking read of the next completion, if one is pending.
    pub fn try_next_completion(&mut self) -> Option<CompletionRecord> {
        match self.completions_rx.try_recv() {
            Ok(record) => {
                self.forget(&record.step_id);
                Some(record)
            }
            Err(_) => None,
        }
    }

    /// Await the next completion. Used when draining workers at shutdown.
    pub async fn next_completion(&mut self) -> Option<CompletionRecord> {
        if self.active.is_empty() {
            return None;
        }
        let record = self.completions_rx.recv().await?;
        self.forget(&record.step_id);
        Some(record)
    }

    fn forget(&mut self, step_id: &str) {
        self.active.remove(step_id);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
