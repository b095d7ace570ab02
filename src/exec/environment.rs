// src/exec/environment.rs

//! The runtime environment handed to action functions.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::dag::step::{ControlFlag, ControlFlags, StepId};

/// Error returned when a capped message queue is full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFull {
    pub step_id: StepId,
}

impl fmt::Display for QueueFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message queue for step '{}' is full", self.step_id)
    }
}

impl std::error::Error for QueueFull {}

#[derive(Debug)]
struct QueueInner {
    items: VecDeque<Value>,
    cap: Option<usize>,
}

/// An SPSC payload queue between the manager and one worker.
///
/// Locking happens only at enqueue/dequeue granularity; the manager and
/// the worker each sit on exactly one end.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    step_id: StepId,
    inner: Arc<Mutex<QueueInner>>,
}

impl MessageQueue {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            inner: Arc::new(Mutex::new(QueueInner {
                items: VecDeque::new(),
                cap: None,
            })),
        }
    }

    /// Apply (or lift) a capacity limit. Existing items are kept even if
    /// they exceed the new cap; the cap only gates future pushes.
    pub fn set_cap(&self, cap: Option<usize>) {
        self.inner.lock().expect("queue lock poisoned").cap = cap;
    }

    pub fn push(&self, value: Value) -> Result<(), QueueFull> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if let Some(cap) = inner.cap {
            if inner.items.len() >= cap {
                return Err(QueueFull {
                    step_id: self.step_id.clone(),
                });
            }
        }
        inner.items.push_back(value);
        Ok(())
    }

    /// Non-blocking FIFO pop.
    pub fn try_pop(&self) -> Option<Value> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .items
            .pop_front()
    }

    /// Take everything currently queued, in FIFO order.
    pub fn drain(&self) -> Vec<Value> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .items
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a push would currently succeed.
    pub fn has_capacity(&self) -> bool {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.cap.map(|cap| inner.items.len() < cap).unwrap_or(true)
    }
}

/// What an action function sees of the trail at runtime.
///
/// Provides the two message queues bridged to the manager and read-only
/// views of the cooperative control signals. Pause and interrupt are
/// *requests*: an action that never polls them simply runs to completion.
#[derive(Debug, Clone)]
pub struct StepEnvironment {
    step_id: StepId,
    to_step: MessageQueue,
    from_step: MessageQueue,
    flags: Arc<ControlFlags>,
}

impl StepEnvironment {
    pub(crate) fn new(
        step_id: impl Into<String>,
        to_step: MessageQueue,
        from_step: MessageQueue,
        flags: Arc<ControlFlags>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            to_step,
            from_step,
            flags,
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Next message sent to this step via `send_message_to_steps`, if any.
    /// Never blocks.
    pub fn recv_message(&self) -> Option<Value> {
        self.to_step.try_pop()
    }

    /// Send a message to the operator; it becomes visible through the
    /// `get_step_messages` API call.
    pub fn send_message(&self, message: Value) -> Result<(), QueueFull> {
        self.from_step.push(message)
    }

    /// Whether the operator has asked this step to pause. Cooperative:
    /// the action decides how (and whether) to hold.
    pub fn pause_requested(&self) -> bool {
        self.flags.get(ControlFlag::Pause)
    }

    /// Whether the operator has asked this step to stop early.
    pub fn interrupt_requested(&self) -> bool {
        self.flags.get(ControlFlag::Interrupt)
    }
}
