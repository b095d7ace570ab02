// src/trail/state_functions.rs

//! Ordered state-transition tables.
//!
//! Each tick, the manager evaluates every step against the ordered list:
//! the first function whose precondition matches fires, and only that
//! one. Destructive operator intents (interrupt, skip) outrank advisory
//! ones (block, pause), which outrank natural progression. When nothing
//! in the ordered list matches, the ignorable list may clear a flag that
//! is inapplicable to the step's current state; those are soft no-ops,
//! reported at debug level only.
//!
//! The tables are pure: they map a snapshot of one step to a transition
//! decision, and the manager applies the decision. That keeps precedence
//! testable without a running trail.

use crate::dag::step::StepState;

/// Everything a state function may consult about one step.
#[derive(Debug, Clone, Copy)]
pub struct StepSnapshot {
    pub state: StepState,
    pub pause_requested: bool,
    pub skip_requested: bool,
    pub block_requested: bool,
    pub rerun_requested: bool,
    pub interrupt_requested: bool,
    /// Whether every predecessor currently unblocks its successors.
    pub predecessors_done: bool,
}

/// The decision a state function hands back to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `Run | Paused -> Interrupted`; the worker keeps polling the flag.
    Interrupt,
    /// `Wait | Ready | Paused | Blocked -> Skipped`.
    Skip,
    /// `Wait | Ready -> Blocked`.
    Block,
    /// `Run -> Paused`; a cooperative signal, the worker keeps running.
    Pause,
    /// Terminal (minus `Unreachable`) `-> Wait`, requeued in the engine.
    Rerun,
    /// `Wait -> Ready` once all predecessors are done.
    Promote,
    /// `Paused -> Run` after the pause request is cleared.
    Resume,
    /// `Blocked -> Wait` after the block request is cleared.
    Unblock,
    /// Drop a flag that cannot apply to the current state.
    ClearInterrupt,
    ClearSkip,
    ClearBlock,
    ClearPause,
}

pub type StateFn = fn(&StepSnapshot) -> Option<Transition>;

fn interrupt_running(s: &StepSnapshot) -> Option<Transition> {
    (s.interrupt_requested && matches!(s.state, StepState::Run | StepState::Paused))
        .then_some(Transition::Interrupt)
}

fn skip_pending(s: &StepSnapshot) -> Option<Transition> {
    (s.skip_requested
        && matches!(
            s.state,
            StepState::Wait | StepState::Ready | StepState::Paused | StepState::Blocked
        ))
    .then_some(Transition::Skip)
}

fn block_pending(s: &StepSnapshot) -> Option<Transition> {
    (s.block_requested && matches!(s.state, StepState::Wait | StepState::Ready))
        .then_some(Transition::Block)
}

fn pause_running(s: &StepSnapshot) -> Option<Transition> {
    (s.pause_requested && s.state == StepState::Run).then_some(Transition::Pause)
}

fn rerun_terminal(s: &StepSnapshot) -> Option<Transition> {
    (s.rerun_requested && s.state.is_rerunnable()).then_some(Transition::Rerun)
}

fn promote_waiting(s: &StepSnapshot) -> Option<Transition> {
    (s.state == StepState::Wait && s.predecessors_done).then_some(Transition::Promote)
}

fn resume_paused(s: &StepSnapshot) -> Option<Transition> {
    (s.state == StepState::Paused && !s.pause_requested).then_some(Transition::Resume)
}

fn unblock_blocked(s: &StepSnapshot) -> Option<Transition> {
    (s.state == StepState::Blocked && !s.block_requested).then_some(Transition::Unblock)
}

/// Precedence order; the first match fires.
pub const STATE_FUNCTIONS: &[(&str, StateFn)] = &[
    ("interrupt_running", interrupt_running),
    ("skip_pending", skip_pending),
    ("block_pending", block_pending),
    ("pause_running", pause_running),
    ("rerun_terminal", rerun_terminal),
    ("promote_waiting", promote_waiting),
    ("resume_paused", resume_paused),
    ("unblock_blocked", unblock_blocked),
];

fn clear_stale_interrupt(s: &StepSnapshot) -> Option<Transition> {
    // While the step is Interrupted its worker is still alive and polls
    // the flag; only clear once no worker can be watching it.
    (s.interrupt_requested
        && !matches!(
            s.state,
            StepState::Run | StepState::Paused | StepState::Interrupted
        ))
    .then_some(Transition::ClearInterrupt)
}

fn clear_stale_skip(s: &StepSnapshot) -> Option<Transition> {
    (s.skip_requested && s.state.is_terminal()).then_some(Transition::ClearSkip)
}

fn clear_stale_block(s: &StepSnapshot) -> Option<Transition> {
    (s.block_requested
        && matches!(s.state, StepState::Run | StepState::Paused | StepState::Interrupted))
    .then_some(Transition::ClearBlock)
    .or_else(|| (s.block_requested && s.state.is_terminal()).then_some(Transition::ClearBlock))
}

fn clear_stale_pause(s: &StepSnapshot) -> Option<Transition> {
    (s.pause_requested && s.state.is_terminal()).then_some(Transition::ClearPause)
}

/// Soft flag clean-up, consulted only when the ordered list found no
/// match for the step.
pub const IGNORABLE_STATE_FUNCTIONS: &[(&str, StateFn)] = &[
    ("clear_stale_interrupt", clear_stale_interrupt),
    ("clear_stale_skip", clear_stale_skip),
    ("clear_stale_block", clear_stale_block),
    ("clear_stale_pause", clear_stale_pause),
];

/// First matching transition for this snapshot, with the name of the
/// function that produced it.
pub fn evaluate(snapshot: &StepSnapshot) -> Option<(&'static str, Transition)> {
    for (name, function) in STATE_FUNCTIONS {
        if let Some(transition) = function(snapshot) {
            return Some((name, transition));
        }
    }
    for (name, function) in IGNORABLE_STATE_FUNCTIONS {
        if let Some(transition) = function(snapshot) {
            return Some((name, transition));
        }
    }
    None
}
