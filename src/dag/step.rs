// src/dag/step.rs

//! Step identity, lifecycle states and operator control flags.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exec::StepEnvironment;

/// Canonical step identifier type used throughout the crate.
pub type StepId = String;

/// The work a step performs.
///
/// The function receives the shared trail context and a
/// [`StepEnvironment`] for message passing and cooperative
/// pause/interrupt polling. `Ok(value)` marks the step `Success` with
/// `value` as its return value; `Err(e)` marks it `Failure` with the
/// rendered error chain. Panics are caught at the worker boundary and
/// reported as `Failure` as well.
pub type ActionFn<C> = Arc<dyn Fn(&C, &StepEnvironment) -> anyhow::Result<Value> + Send + Sync>;

/// Lifecycle state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepState {
    /// Waiting for predecessors to finish.
    Wait,
    /// All predecessors done; eligible for dispatch.
    Ready,
    /// A worker is executing the action function.
    Run,
    /// Running, but the operator asked the action to hold (cooperative).
    Paused,
    /// Held back by the operator before it ever ran.
    Blocked,
    /// Running, but asked to stop early (cooperative).
    Interrupted,
    Success,
    Failure,
    Skipped,
    /// Can never run because an ancestor failed without recovery.
    Unreachable,
}

impl StepState {
    /// States in which no further automatic progress happens.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepState::Success | StepState::Failure | StepState::Skipped | StepState::Unreachable
        )
    }

    /// States from which `rerun` can requeue the step.
    pub fn is_rerunnable(self) -> bool {
        matches!(
            self,
            StepState::Success | StepState::Failure | StepState::Skipped
        )
    }

    /// States that unblock successors.
    pub fn unblocks_successors(self) -> bool {
        matches!(self, StepState::Success | StepState::Skipped)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a single action-function run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Success,
    Failure,
}

/// Last recorded `(status, return value)` of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub value: Value,
}

/// Operator intents set by API calls and consumed by the state functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlag {
    Pause,
    Skip,
    Block,
    Rerun,
    Interrupt,
}

/// The five operator flags of a step.
///
/// The manager is the only writer. Workers hold a clone of the `Arc` and
/// poll `Pause` / `Interrupt` through their [`StepEnvironment`]; the other
/// flags are manager-internal.
#[derive(Debug, Default)]
pub struct ControlFlags {
    pause: AtomicBool,
    skip: AtomicBool,
    block: AtomicBool,
    rerun: AtomicBool,
    interrupt: AtomicBool,
}

impl ControlFlags {
    fn cell(&self, flag: ControlFlag) -> &AtomicBool {
        match flag {
            ControlFlag::Pause => &self.pause,
            ControlFlag::Skip => &self.skip,
            ControlFlag::Block => &self.block,
            ControlFlag::Rerun => &self.rerun,
            ControlFlag::Interrupt => &self.interrupt,
        }
    }

    pub fn set(&self, flag: ControlFlag, value: bool) {
        self.cell(flag).store(value, Ordering::SeqCst);
    }

    pub fn get(&self, flag: ControlFlag) -> bool {
        self.cell(flag).load(Ordering::SeqCst)
    }

    /// Clear every flag; used when a step reaches a terminal state.
    pub fn clear_all(&self) {
        for flag in [
            ControlFlag::Pause,
            ControlFlag::Skip,
            ControlFlag::Block,
            ControlFlag::Rerun,
            ControlFlag::Interrupt,
        ] {
            self.set(flag, false);
        }
    }
}

/// Immutable identity of a step: id, display name, tags and the action.
///
/// Mutable lifecycle state lives in the trail's step records, owned by
/// the manager.
pub struct Step<C> {
    pub(crate) id: StepId,
    pub(crate) name: String,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) action: ActionFn<C>,
}

impl<C> Step<C> {
    /// Create a step with the given unique id.
    ///
    /// The display name defaults to the id and every step carries a
    /// `name` tag so tag selectors can address it.
    pub fn new<F>(id: impl Into<String>, action: F) -> Self
    where
        F: Fn(&C, &StepEnvironment) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tags: BTreeMap::new(),
            action: Arc::new(action),
        }
    }

    /// Override the human-readable name (kept distinct from the id).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach a free-form tag used by API selectors.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }
}

impl<C> fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Mutable per-step state, owned exclusively by the trail manager.
#[derive(Debug)]
pub struct StepRecord {
    pub state: StepState,
    /// Last `(status, return value)`; reset when the step is dispatched
    /// again after a rerun.
    pub result: Option<StepResult>,
    /// Messages drained from the step's `from_step` queue, waiting to be
    /// returned by `get_step_messages`.
    pub collected_messages: Vec<Value>,
}

impl Default for StepRecord {
    fn default() -> Self {
        Self {
            state: StepState::Wait,
            result: None,
            collected_messages: Vec::new(),
        }
    }
}
