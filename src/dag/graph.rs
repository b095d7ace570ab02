// src/dag/graph.rs

//! Directed acyclic graph of step ids.
//!
//! Keeps adjacency (predecessors and dependents) keyed by step id, with
//! insertion order preserved for deterministic traversal and tie-breaking.
//! Acyclicity is enforced twice: incrementally on `add_edge` (so a bad
//! edge is rejected with `WouldCycle` at the call site) and eagerly at
//! trail construction with a full toposort.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::step::StepId;
use crate::errors::{Result, TrailError};

#[derive(Debug, Clone, Default)]
struct Node {
    predecessors: Vec<StepId>,
    successors: Vec<StepId>,
}

/// Adjacency information for a trail.
#[derive(Debug, Clone, Default)]
pub struct TrailGraph {
    /// Step ids in insertion order.
    order: Vec<StepId>,
    nodes: HashMap<StepId, Node>,
}

impl TrailGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step id. Fails with `DuplicateId` if it already exists.
    pub fn add_step(&mut self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(TrailError::DuplicateId(id));
        }
        self.order.push(id.clone());
        self.nodes.insert(id, Node::default());
        Ok(())
    }

    /// Add a "must complete before" edge from `pred` to `succ`.
    ///
    /// Fails with `UnknownStep` if either endpoint is missing, and with
    /// `WouldCycle` if `pred` is already reachable from `succ`.
    pub fn add_edge(&mut self, pred: &str, succ: &str) -> Result<()> {
        if !self.nodes.contains_key(pred) {
            return Err(TrailError::UnknownStep(pred.to_string()));
        }
        if !self.nodes.contains_key(succ) {
            return Err(TrailError::UnknownStep(succ.to_string()));
        }
        if pred == succ || self.is_reachable(succ, pred) {
            return Err(TrailError::WouldCycle {
                from: pred.to_string(),
                to: succ.to_string(),
            });
        }

        // Duplicate edges are collapsed; adjacency stays a set in spirit.
        let already_present = self
            .nodes
            .get(pred)
            .map(|n| n.successors.iter().any(|s| s == succ))
            .unwrap_or(false);
        if !already_present {
            self.nodes
                .get_mut(pred)
                .expect("checked above")
                .successors
                .push(succ.to_string());
            self.nodes
                .get_mut(succ)
                .expect("checked above")
                .predecessors
                .push(pred.to_string());
        }
        Ok(())
    }

    /// Whether `to` is reachable from `from` along successor edges.
    fn is_reachable(&self, from: &str, to: &str) -> bool {
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut seen: HashSet<&str> = HashSet::new();
        queue.push_back(from);

        while let Some(id) = queue.pop_front() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            for succ in self.successors(id) {
                queue.push_back(succ);
            }
        }
        false
    }

    /// All step ids in insertion order.
    pub fn step_ids(&self) -> &[StepId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Immediate predecessors of a step (constant-time lookup).
    pub fn predecessors(&self, id: &str) -> &[StepId] {
        self.nodes
            .get(id)
            .map(|n| n.predecessors.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate successors of a step (constant-time lookup).
    pub fn successors(&self, id: &str) -> &[StepId] {
        self.nodes
            .get(id)
            .map(|n| n.successors.as_slice())
            .unwrap_or(&[])
    }

    /// The given steps plus everything downstream of them, breadth-first.
    pub fn with_descendants(&self, roots: &[StepId]) -> Vec<StepId> {
        let mut queue: VecDeque<StepId> = roots.iter().cloned().collect();
        let mut seen: HashSet<StepId> = HashSet::new();
        let mut out = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for succ in self.successors(&id) {
                queue.push_back(succ.clone());
            }
            out.push(id);
        }
        out
    }

    /// A topological linearisation with ties broken by insertion order.
    ///
    /// Assumes the graph has already been validated as acyclic.
    pub fn topological_order(&self) -> Vec<StepId> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.predecessors(id).len()))
            .collect();

        let mut out: Vec<StepId> = Vec::with_capacity(self.order.len());
        let mut ready: VecDeque<&str> = self
            .order
            .iter()
            .filter(|id| in_degree[id.as_str()] == 0)
            .map(|id| id.as_str())
            .collect();

        while let Some(id) = ready.pop_front() {
            out.push(id.to_string());
            for succ in self.successors(id) {
                let degree = in_degree.get_mut(succ.as_str()).expect("known node");
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(succ);
                }
            }
        }
        out
    }

    /// Full acyclicity check, run once at trail construction.
    pub fn validate(&self) -> Result<()> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in &self.order {
            graph.add_node(id.as_str());
        }
        for id in &self.order {
            for succ in self.successors(id) {
                graph.add_edge(id.as_str(), succ.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(TrailError::Validation(format!(
                "cycle detected involving step '{}'",
                cycle.node_id()
            ))),
        }
    }
}
