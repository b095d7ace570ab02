// src/dag/engine.rs

//! Re-evaluating topological traversal.
//!
//! A one-shot topological walk enumerates each node exactly once. The
//! trail manager needs more than that: steps can be paused, blocked,
//! skipped or re-queued for a rerun while the traversal is in flight, so
//! readiness has to be re-evaluated against mutable per-step state on
//! every iteration.
//!
//! [`TopologicalEngine`] generalises Kahn's algorithm into a pull-based
//! producer of runnable steps. The caller supplies a readiness predicate
//! on each call; the engine never blocks, never captures completions and
//! keeps only two pieces of bookkeeping of its own: which steps it has
//! already offered, and which it has declared unreachable.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::dag::graph::TrailGraph;
use crate::dag::step::StepId;

/// Caller-reported readiness of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Eligible to run as soon as all predecessors are `Done`.
    Ready,
    /// Not eligible yet (still waiting, held by the operator, or running).
    NotReady,
    /// Finished in a way that unblocks successors (success or skip).
    Done,
    /// Will never finish; successors must not wait for it.
    Unreachable,
}

/// Pull-based topological traversal over a fixed step graph.
#[derive(Debug)]
pub struct TopologicalEngine {
    /// Step ids in insertion order; iteration order determines
    /// tie-breaking among equally-ready steps.
    order: Vec<StepId>,
    predecessors: HashMap<StepId, Vec<StepId>>,
    successors: HashMap<StepId, Vec<StepId>>,
    /// Steps already handed to the caller and not reset since.
    offered: HashSet<StepId>,
    /// Steps this engine has declared unreachable.
    unreachable: HashSet<StepId>,
}

impl TopologicalEngine {
    pub fn new(graph: &TrailGraph) -> Self {
        let order = graph.step_ids().to_vec();
        let predecessors = order
            .iter()
            .map(|id| (id.clone(), graph.predecessors(id).to_vec()))
            .collect();
        let successors = order
            .iter()
            .map(|id| (id.clone(), graph.successors(id).to_vec()))
            .collect();

        Self {
            order,
            predecessors,
            successors,
            offered: HashSet::new(),
            unreachable: HashSet::new(),
        }
    }

    /// The set of steps that are runnable right now, in insertion order.
    ///
    /// A step is returned when the readiness predicate reports it
    /// `Ready`, every predecessor reports `Done`, and it has not been
    /// offered since its last reset. Offered steps are remembered so a
    /// step in flight is not handed out twice; [`reset`](Self::reset)
    /// re-arms a step for rerun.
    pub fn next_ready<F>(&mut self, readiness: F, limit: Option<usize>) -> Vec<StepId>
    where
        F: Fn(&str) -> Readiness,
    {
        let mut ready = Vec::new();

        for id in &self.order {
            if let Some(limit) = limit {
                if ready.len() >= limit {
                    break;
                }
            }
            if self.offered.contains(id) || readiness(id) != Readiness::Ready {
                continue;
            }

            let preds = self.predecessors.get(id).map(Vec::as_slice).unwrap_or(&[]);
            if preds.iter().all(|p| readiness(p) == Readiness::Done) {
                ready.push(id.clone());
            }
        }

        for id in &ready {
            self.offered.insert(id.clone());
        }
        if !ready.is_empty() {
            debug!(steps = ?ready, "engine offering ready steps");
        }
        ready
    }

    /// Walk the descendants of a failed step and collect every one that
    /// can no longer run.
    ///
    /// Descendants that already read `Done` are left alone and their own
    /// subtrees are not entered through them: a skipped or succeeded step
    /// still satisfies its successors, so failure does not propagate past
    /// it. Returns the newly-unreachable ids; the caller records the
    /// state change.
    pub fn propagate_unreachable<F>(&mut self, from: &str, readiness: F) -> Vec<StepId>
    where
        F: Fn(&str) -> Readiness,
    {
        let mut queue: VecDeque<StepId> = self
            .successors
            .get(from)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        let mut marked = Vec::new();

        while let Some(id) = queue.pop_front() {
            if self.unreachable.contains(&id) {
                continue;
            }
            match readiness(&id) {
                Readiness::Done => {
                    // Satisfies its successors regardless of our failure;
                    // do not walk through it.
                }
                Readiness::Unreachable => {}
                Readiness::Ready | Readiness::NotReady => {
                    self.unreachable.insert(id.clone());
                    if let Some(succs) = self.successors.get(&id) {
                        queue.extend(succs.iter().cloned());
                    }
                    marked.push(id);
                }
            }
        }

        if !marked.is_empty() {
            debug!(from = %from, steps = ?marked, "marking descendants unreachable");
        }
        marked
    }

    /// Forget that a step was offered or declared unreachable, so it can
    /// be returned by `next_ready` again. This is the rerun mechanism.
    pub fn reset(&mut self, id: &str) {
        self.offered.remove(id);
        self.unreachable.remove(id);
    }

    /// Whether this engine has declared the step unreachable.
    pub fn is_unreachable(&self, id: &str) -> bool {
        self.unreachable.contains(id)
    }

    /// The traversal is drained when every step is `Done` or
    /// `Unreachable`. Rerun requests are the caller's knowledge: a
    /// pending rerun means the caller will `reset` a step rather than
    /// treat the trail as finished.
    pub fn is_drained<F>(&self, readiness: F) -> bool
    where
        F: Fn(&str) -> Readiness,
    {
        self.order
            .iter()
            .all(|id| matches!(readiness(id), Readiness::Done | Readiness::Unreachable))
    }
}
