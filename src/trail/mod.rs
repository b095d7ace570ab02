// src/trail/mod.rs

//! Trail assembly and the manager that runs it.
//!
//! - [`Trail`] / [`TrailBuilder`]: a validated DAG of steps plus the
//!   shared context and per-step queues.
//! - [`state_functions`]: the ordered state-transition tables.
//! - [`manager`]: the single-threaded event loop.
//! - [`server`]: socket binding and the public serve entry point.

pub mod manager;
pub mod server;
pub mod state_functions;

pub use manager::TrailManager;
pub use server::{StepSummary, TrailServer, TrailSummary};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::dag::graph::TrailGraph;
use crate::dag::step::{
    ControlFlag, ControlFlags, Step, StepId, StepRecord, StepResult, StepState,
};
use crate::errors::{Result, TrailError};
use crate::exec::environment::{MessageQueue, StepEnvironment};

/// One step plus all of its runtime state.
///
/// The manager is the exclusive owner of `record` and the only writer of
/// `flags`; workers see `flags` and the two queues through their
/// [`StepEnvironment`].
pub(crate) struct StepEntry<C> {
    pub step: Step<C>,
    pub record: StepRecord,
    pub flags: Arc<ControlFlags>,
    pub to_step: MessageQueue,
    pub from_step: MessageQueue,
}

impl<C> StepEntry<C> {
    fn new(step: Step<C>) -> Self {
        let id = step.id().to_string();
        Self {
            step,
            record: StepRecord::default(),
            flags: Arc::new(ControlFlags::default()),
            to_step: MessageQueue::new(id.clone()),
            from_step: MessageQueue::new(id),
        }
    }

    pub fn environment(&self) -> StepEnvironment {
        StepEnvironment::new(
            self.step.id(),
            self.to_step.clone(),
            self.from_step.clone(),
            Arc::clone(&self.flags),
        )
    }

    /// `{id, name}` — the minimal identification of a step in responses.
    pub fn essential(&self) -> Value {
        json!({ "id": self.step.id(), "name": self.step.name() })
    }

    /// Full summary used by the `list` call.
    pub fn summary(&self) -> Value {
        json!({
            "id": self.step.id(),
            "name": self.step.name(),
            "tags": self.step.tags(),
            "state": self.record.state,
            "result": self.record.result,
        })
    }
}

/// A validated DAG of steps with its context and message queues.
pub struct Trail<C> {
    entries: Vec<StepEntry<C>>,
    index: BTreeMap<StepId, usize>,
    graph: TrailGraph,
    context: Arc<C>,
}

impl<C> Trail<C> {
    /// Start building a trail around the given user context.
    pub fn builder(context: C) -> TrailBuilder<C> {
        TrailBuilder::new(context)
    }

    pub fn graph(&self) -> &TrailGraph {
        &self.graph
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Step ids in insertion order.
    pub fn step_ids(&self) -> Vec<StepId> {
        self.entries
            .iter()
            .map(|e| e.step.id().to_string())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn state_of(&self, id: &str) -> Option<StepState> {
        self.entry(id).map(|e| e.record.state)
    }

    pub fn result_of(&self, id: &str) -> Option<&StepResult> {
        self.entry(id).and_then(|e| e.record.result.as_ref())
    }

    pub fn flag(&self, id: &str, flag: ControlFlag) -> bool {
        self.entry(id).map(|e| e.flags.get(flag)).unwrap_or(false)
    }

    pub fn set_flag(&mut self, id: &str, flag: ControlFlag, value: bool) {
        if let Some(entry) = self.entry(id) {
            debug!(step = %id, ?flag, value, "setting control flag");
            entry.flags.set(flag, value);
        }
    }

    /// Counts of steps per state, for the `status` call and summaries.
    pub fn state_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts
                .entry(entry.record.state.to_string())
                .or_insert(0usize) += 1;
        }
        counts
    }

    /// Whether the given tag mapping is a subset of the step's tags.
    pub fn matches_tags(&self, id: &str, tags: &BTreeMap<String, String>) -> bool {
        match self.entry(id) {
            Some(entry) => tags
                .iter()
                .all(|(k, v)| entry.step.tags().get(k) == Some(v)),
            None => false,
        }
    }

    pub(crate) fn entry(&self, id: &str) -> Option<&StepEntry<C>> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub(crate) fn entry_mut(&mut self, id: &str) -> Option<&mut StepEntry<C>> {
        let i = *self.index.get(id)?;
        Some(&mut self.entries[i])
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &StepEntry<C>> {
        self.entries.iter()
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut StepEntry<C>> {
        self.entries.iter_mut()
    }

    /// Apply a message-queue capacity to every step queue.
    pub(crate) fn set_queue_cap(&self, cap: Option<usize>) {
        for entry in &self.entries {
            entry.to_step.set_cap(cap);
            entry.from_step.set_cap(cap);
        }
    }
}

impl<C> std::fmt::Debug for Trail<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trail")
            .field("steps", &self.graph.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Trail`]; collects steps and edges, then validates.
pub struct TrailBuilder<C> {
    steps: Vec<Step<C>>,
    edges: Vec<(StepId, StepId)>,
    context: C,
}

impl<C> TrailBuilder<C> {
    pub fn new(context: C) -> Self {
        Self {
            steps: Vec::new(),
            edges: Vec::new(),
            context,
        }
    }

    pub fn add_step(mut self, step: Step<C>) -> Self {
        self.steps.push(step);
        self
    }

    /// Declare that `pred` must complete before `succ` may run.
    pub fn add_edge(mut self, pred: impl Into<String>, succ: impl Into<String>) -> Self {
        self.edges.push((pred.into(), succ.into()));
        self
    }

    /// Validate and assemble the trail.
    ///
    /// Fails with `DuplicateId`, `UnknownStep` or `WouldCycle` on the
    /// offending step or edge; the full acyclicity check runs once more
    /// over the assembled graph so a trail is only runnable after it
    /// passes.
    pub fn build(self) -> Result<Trail<C>> {
        if self.steps.is_empty() {
            return Err(TrailError::Validation(
                "a trail must contain at least one step".to_string(),
            ));
        }

        let mut graph = TrailGraph::new();
        for step in &self.steps {
            graph.add_step(step.id())?;
        }
        for (pred, succ) in &self.edges {
            graph.add_edge(pred, succ)?;
        }
        graph.validate()?;

        let mut entries: Vec<StepEntry<C>> = self
            .steps
            .into_iter()
            .map(|mut step| {
                step.tags.insert("name".to_string(), step.name.clone());
                StepEntry::new(step)
            })
            .collect();

        // Sequence tag in topological order, so selectors can address
        // steps by position the way operators expect.
        let topo = graph.topological_order();
        let position: BTreeMap<&str, usize> = topo
            .iter()
            .enumerate()
            .map(|(n, id)| (id.as_str(), n))
            .collect();
        for entry in &mut entries {
            let n = position[entry.step.id()];
            entry.step.tags.insert("n".to_string(), n.to_string());
        }

        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.step.id().to_string(), i))
            .collect();

        Ok(Trail {
            entries,
            index,
            graph,
            context: Arc::new(self.context),
        })
    }
}
