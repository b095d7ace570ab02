// src/dag/mod.rs

//! DAG primitives and the topological engine.
//!
//! - [`step`] defines step identity, lifecycle states and control flags.
//! - [`graph`] holds adjacency and validates acyclicity.
//! - [`engine`] is the re-evaluating topological traversal that offers
//!   runnable steps to the manager.

pub mod engine;
pub mod graph;
pub mod step;

pub use engine::{Readiness, TopologicalEngine};
pub use graph::TrailGraph;
pub use step::{
    ActionFn, ControlFlag, ControlFlags, Step, StepId, StepRecord, StepResult, StepState,
    StepStatus,
};
