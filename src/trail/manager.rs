// src/trail/manager.rs

//! The trail manager: a single-threaded cooperative event loop.
//!
//! Each tick performs, in this fixed order:
//!
//! 1. serve pending API requests (zero-timeout drain of the socket),
//! 2. collect worker completions,
//! 3. collect messages sent by running steps,
//! 4. run the ordered state functions over every step,
//! 5. dispatch newly runnable steps into the worker pool,
//! 6. check for termination.
//!
//! The manager is the exclusive owner of step states, results and flags;
//! workers communicate only through the completions channel and their
//! message queues. API effects become visible before any step state is
//! advanced in the same tick, so an operator request observed on the
//! wire is never outrun by the trail.

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::dispatch::{handle_api_call, ApiRegistry};
use crate::config::TrailConfig;
use crate::dag::engine::{Readiness, TopologicalEngine};
use crate::dag::step::{ControlFlag, StepResult, StepState, StepStatus};
use crate::errors::Result;
use crate::exec::runner::{CompletionRecord, WorkerPool};
use crate::socket::server::SocketServer;
use crate::trail::server::{StepSummary, TrailSummary};
use crate::trail::state_functions::{evaluate, StepSnapshot, Transition};
use crate::trail::Trail;

/// Upper bound on API requests handled per tick, so a chatty client
/// cannot starve step progress.
const MAX_REQUESTS_PER_TICK: usize = 32;

/// Drives one trail to completion.
pub struct TrailManager<C> {
    trail: Trail<C>,
    engine: TopologicalEngine,
    registry: ApiRegistry<C>,
    workers: WorkerPool,
    socket: SocketServer,
    config: TrailConfig,
    shutdown: bool,
}

impl<C: Send + Sync + 'static> TrailManager<C> {
    pub(crate) fn new(trail: Trail<C>, socket: SocketServer, config: TrailConfig) -> Self {
        let engine = TopologicalEngine::new(trail.graph());
        Self {
            trail,
            engine,
            registry: ApiRegistry::with_default_calls(),
            workers: WorkerPool::new(),
            socket,
            config,
            shutdown: false,
        }
    }

    /// Run the event loop until the trail drains or a shutdown call is
    /// honoured. Returns the final per-step states.
    pub async fn run(mut self) -> Result<TrailSummary> {
        info!(steps = self.trail.len(), "trail manager started");

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            self.serve_api();
            self.drain_completions();
            self.collect_step_messages();
            self.run_state_functions();
            self.dispatch_ready();

            if self.shutdown {
                info!("shutdown requested; draining in-flight workers");
                break;
            }
            if self.workers.is_idle() && self.is_drained() {
                info!("trail drained; manager exiting");
                break;
            }
        }

        // In-flight actions run to completion (or notice their interrupt
        // flag); their outcomes still land in the step records.
        while let Some(record) = self.workers.next_completion().await {
            self.apply_completion(record);
        }
        self.collect_step_messages();

        let summary = self.summary();

        // Close the control socket (and remove its file) before handing
        // back the summary.
        drop(self.socket);

        Ok(summary)
    }

    /// Tick step 1: answer up to `MAX_REQUESTS_PER_TICK` pending calls.
    fn serve_api(&mut self) {
        for envelope in self.socket.drain_pending(MAX_REQUESTS_PER_TICK) {
            let outcome = handle_api_call(&mut self.trail, &self.registry, &envelope.request);
            if !outcome.keep_running {
                info!("shutdown acknowledged");
                self.shutdown = true;
            }
            // A client that hung up just doesn't read its answer.
            let _ = envelope.reply.send(outcome.response);
        }
    }

    /// Tick step 2: fold worker completions into step state.
    fn drain_completions(&mut self) {
        while let Some(record) = self.workers.try_next_completion() {
            self.apply_completion(record);
        }
    }

    fn apply_completion(&mut self, record: CompletionRecord) {
        let CompletionRecord {
            step_id,
            status,
            value,
        } = record;

        let mut new_failure = false;
        match self.trail.entry_mut(&step_id) {
            Some(entry) => match entry.record.state {
                StepState::Run | StepState::Paused | StepState::Interrupted => {
                    let state = match status {
                        StepStatus::Success => StepState::Success,
                        StepStatus::Failure => StepState::Failure,
                    };
                    info!(step = %step_id, from = %entry.record.state, to = %state, "step completed");
                    entry.record.state = state;
                    entry.record.result = Some(StepResult { status, value });
                    entry.flags.set(ControlFlag::Pause, false);
                    entry.flags.set(ControlFlag::Interrupt, false);
                    new_failure = state == StepState::Failure;
                }
                other => {
                    // The step was skipped (or otherwise moved on) while
                    // its worker was still finishing; keep the result but
                    // leave the state alone.
                    debug!(step = %step_id, state = %other, "late completion recorded without transition");
                    entry.record.result = Some(StepResult { status, value });
                }
            },
            None => {
                warn!(step = %step_id, "completion for unknown step; ignoring");
                return;
            }
        }

        // A failure with no rerun pending dooms everything downstream.
        if new_failure && !self.trail.flag(&step_id, ControlFlag::Rerun) {
            self.propagate_unreachable(&step_id);
        }
    }

    fn propagate_unreachable(&mut self, from: &str) {
        let trail = &self.trail;
        let marked = self
            .engine
            .propagate_unreachable(from, |id| readiness_of(trail, id));
        for id in marked {
            if let Some(entry) = self.trail.entry_mut(&id) {
                info!(step = %id, "step is unreachable after upstream failure");
                entry.record.state = StepState::Unreachable;
            }
        }
    }

    /// Tick step 3: move messages from the `from_step` queues into the
    /// per-step buffers served by `get_step_messages`.
    fn collect_step_messages(&mut self) {
        for entry in self.trail.entries_mut() {
            let messages = entry.from_step.drain();
            if !messages.is_empty() {
                debug!(step = %entry.step.id(), count = messages.len(), "collected step messages");
                entry.record.collected_messages.extend(messages);
            }
        }
    }

    /// Tick step 4: ordered state-function dispatch for every step.
    fn run_state_functions(&mut self) {
        for id in self.trail.step_ids() {
            let snapshot = self.snapshot_of(&id);
            if let Some((name, transition)) = evaluate(&snapshot) {
                debug!(step = %id, function = name, ?transition, "state function fired");
                self.apply_transition(&id, transition);
            }
        }
    }

    fn snapshot_of(&self, id: &str) -> StepSnapshot {
        let predecessors_done = self
            .trail
            .graph()
            .predecessors(id)
            .iter()
            .all(|p| {
                self.trail
                    .state_of(p)
                    .map(StepState::unblocks_successors)
                    .unwrap_or(false)
            });

        StepSnapshot {
            state: self.trail.state_of(id).unwrap_or(StepState::Wait),
            pause_requested: self.trail.flag(id, ControlFlag::Pause),
            skip_requested: self.trail.flag(id, ControlFlag::Skip),
            block_requested: self.trail.flag(id, ControlFlag::Block),
            rerun_requested: self.trail.flag(id, ControlFlag::Rerun),
            interrupt_requested: self.trail.flag(id, ControlFlag::Interrupt),
            predecessors_done,
        }
    }

    fn apply_transition(&mut self, id: &str, transition: Transition) {
        match transition {
            Transition::Interrupt => self.set_state(id, StepState::Interrupted),
            Transition::Skip => {
                self.trail.set_flag(id, ControlFlag::Skip, false);
                self.set_state(id, StepState::Skipped);
            }
            Transition::Block => self.set_state(id, StepState::Blocked),
            Transition::Pause => self.set_state(id, StepState::Paused),
            Transition::Rerun => {
                self.trail.set_flag(id, ControlFlag::Rerun, false);
                self.set_state(id, StepState::Wait);
                self.engine.reset(id);
                self.revive_unreachable_descendants(id);
            }
            Transition::Promote => self.set_state(id, StepState::Ready),
            Transition::Resume => self.set_state(id, StepState::Run),
            Transition::Unblock => self.set_state(id, StepState::Wait),
            Transition::ClearInterrupt => self.trail.set_flag(id, ControlFlag::Interrupt, false),
            Transition::ClearSkip => self.trail.set_flag(id, ControlFlag::Skip, false),
            Transition::ClearBlock => self.trail.set_flag(id, ControlFlag::Block, false),
            Transition::ClearPause => self.trail.set_flag(id, ControlFlag::Pause, false),
        }
    }

    fn set_state(&mut self, id: &str, state: StepState) {
        if let Some(entry) = self.trail.entry_mut(id) {
            if entry.record.state != state {
                info!(step = %id, from = %entry.record.state, to = %state, "step state transition");
                entry.record.state = state;
            }
        }
    }

    /// A rerun of a failed step makes its doomed descendants eligible
    /// again: they return to `Wait` and the engine forgets it ever
    /// declared them unreachable.
    fn revive_unreachable_descendants(&mut self, id: &str) {
        let descendants = self
            .trail
            .graph()
            .with_descendants(&[id.to_string()]);
        for descendant in descendants {
            if descendant == id {
                continue;
            }
            if self.trail.state_of(&descendant) == Some(StepState::Unreachable) {
                self.set_state(&descendant, StepState::Wait);
                self.engine.reset(&descendant);
            }
        }
    }

    /// Tick step 5: pull runnable steps from the engine and spawn
    /// workers, up to the configured parallelism.
    fn dispatch_ready(&mut self) {
        let limit = self.config.max_parallel_workers.map(|max| {
            max.saturating_sub(self.workers.in_flight())
        });
        if limit == Some(0) {
            return;
        }

        let trail = &self.trail;
        let ready = self
            .engine
            .next_ready(|id| readiness_of(trail, id), limit);

        for id in ready {
            let context = self.trail.context().clone();
            let Some(entry) = self.trail.entry_mut(&id) else {
                continue;
            };
            info!(step = %id, "dispatching step");
            entry.record.state = StepState::Run;
            entry.record.result = None;
            let action = entry.step.action.clone();
            let environment = entry.environment();
            self.workers.spawn(id, action, context, environment);
        }
    }

    /// Tick step 6 helper: all steps terminal with no rerun pending.
    fn is_drained(&self) -> bool {
        let trail = &self.trail;
        self.engine.is_drained(|id| readiness_of(trail, id))
            && !self
                .trail
                .step_ids()
                .iter()
                .any(|id| self.trail.flag(id, ControlFlag::Rerun))
    }

    fn summary(&self) -> TrailSummary {
        TrailSummary {
            steps: self
                .trail
                .entries()
                .map(|entry| StepSummary {
                    id: entry.step.id().to_string(),
                    name: entry.step.name().to_string(),
                    state: entry.record.state,
                    result: entry.record.result.clone(),
                })
                .collect(),
        }
    }
}

/// Map manager-owned step state onto engine readiness.
///
/// A `Ready` step with a pending pause, block or skip request is
/// withheld (`NotReady`) so the operator intent lands before the step
/// runs.
fn readiness_of<C>(trail: &Trail<C>, id: &str) -> Readiness {
    match trail.state_of(id) {
        Some(StepState::Success) | Some(StepState::Skipped) => Readiness::Done,
        Some(StepState::Failure) | Some(StepState::Unreachable) => Readiness::Unreachable,
        Some(StepState::Ready) => {
            let held = trail.flag(id, ControlFlag::Pause)
                || trail.flag(id, ControlFlag::Block)
                || trail.flag(id, ControlFlag::Skip);
            if held {
                Readiness::NotReady
            } else {
                Readiness::Ready
            }
        }
        _ => Readiness::NotReady,
    }
}
