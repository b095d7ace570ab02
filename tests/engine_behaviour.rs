mod common;

use crate::common::init_tracing;

use std::collections::HashMap;

use autotrail::dag::{Readiness, TopologicalEngine, TrailGraph};
use autotrail::TrailError;

/// A little harness: per-step readiness kept in a map the tests mutate
/// between calls, the way the manager mutates step state.
struct Board {
    graph: TrailGraph,
    readiness: HashMap<String, Readiness>,
}

impl Board {
    fn new(steps: &[&str], edges: &[(&str, &str)]) -> Self {
        let mut graph = TrailGraph::new();
        for step in steps {
            graph.add_step(*step).unwrap();
        }
        for (pred, succ) in edges {
            graph.add_edge(pred, succ).unwrap();
        }
        graph.validate().unwrap();

        let readiness = steps
            .iter()
            .map(|s| (s.to_string(), Readiness::NotReady))
            .collect();
        Self { graph, readiness }
    }

    fn set(&mut self, id: &str, readiness: Readiness) {
        self.readiness.insert(id.to_string(), readiness);
    }

    fn lookup(&self) -> impl Fn(&str) -> Readiness + '_ {
        move |id| self.readiness.get(id).copied().unwrap_or(Readiness::NotReady)
    }
}

#[test]
fn offers_only_steps_whose_predecessors_are_done() {
    init_tracing();
    let mut board = Board::new(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
    let mut engine = TopologicalEngine::new(&board.graph);

    board.set("a", Readiness::Ready);
    board.set("b", Readiness::Ready);
    assert_eq!(engine.next_ready(board.lookup(), None), vec!["a"]);

    // b stays withheld until a reports Done, even though b says Ready.
    assert!(engine.next_ready(board.lookup(), None).is_empty());

    board.set("a", Readiness::Done);
    assert_eq!(engine.next_ready(board.lookup(), None), vec!["b"]);
}

#[test]
fn equally_ready_steps_come_back_in_insertion_order() {
    init_tracing();
    let mut board = Board::new(&["mid", "first", "last"], &[]);
    let mut engine = TopologicalEngine::new(&board.graph);

    for id in ["mid", "first", "last"] {
        board.set(id, Readiness::Ready);
    }
    assert_eq!(
        engine.next_ready(board.lookup(), None),
        vec!["mid", "first", "last"]
    );
}

#[test]
fn limit_defers_the_rest_without_losing_them() {
    init_tracing();
    let mut board = Board::new(&["a", "b", "c"], &[]);
    let mut engine = TopologicalEngine::new(&board.graph);

    for id in ["a", "b", "c"] {
        board.set(id, Readiness::Ready);
    }
    assert_eq!(engine.next_ready(board.lookup(), Some(2)), vec!["a", "b"]);
    assert_eq!(engine.next_ready(board.lookup(), Some(2)), vec!["c"]);
}

#[test]
fn an_offered_step_is_not_offered_twice() {
    init_tracing();
    let mut board = Board::new(&["a"], &[]);
    let mut engine = TopologicalEngine::new(&board.graph);

    board.set("a", Readiness::Ready);
    assert_eq!(engine.next_ready(board.lookup(), None), vec!["a"]);
    assert!(engine.next_ready(board.lookup(), None).is_empty());
}

#[test]
fn reset_reoffers_a_done_step() {
    init_tracing();
    let mut board = Board::new(&["a"], &[]);
    let mut engine = TopologicalEngine::new(&board.graph);

    board.set("a", Readiness::Ready);
    engine.next_ready(board.lookup(), None);
    board.set("a", Readiness::Done);

    // Rerun: the caller resets the step and flips it back to Ready.
    engine.reset("a");
    board.set("a", Readiness::Ready);
    assert_eq!(engine.next_ready(board.lookup(), None), vec!["a"]);
}

#[test]
fn skipped_counts_as_done_for_successors() {
    init_tracing();
    let mut board = Board::new(&["a", "b"], &[("a", "b")]);
    let mut engine = TopologicalEngine::new(&board.graph);

    // a was skipped: the caller reports it Done without it ever running.
    board.set("a", Readiness::Done);
    board.set("b", Readiness::Ready);
    assert_eq!(engine.next_ready(board.lookup(), None), vec!["b"]);
}

#[test]
fn failure_propagates_unreachable_through_pending_descendants() {
    init_tracing();
    let mut board = Board::new(
        &["a", "b", "c", "d"],
        &[("a", "b"), ("b", "c"), ("b", "d")],
    );
    let mut engine = TopologicalEngine::new(&board.graph);

    board.set("a", Readiness::Done);
    board.set("b", Readiness::Unreachable); // b just failed

    let marked = engine.propagate_unreachable("b", board.lookup());
    assert_eq!(marked, vec!["c", "d"]);
    assert!(engine.is_unreachable("c"));
    assert!(engine.is_unreachable("d"));
}

#[test]
fn propagation_stops_at_done_descendants() {
    init_tracing();
    // a -> b -> c: b already completed (e.g. skipped), so its subtree
    // still stands on its own feet.
    let mut board = Board::new(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
    let mut engine = TopologicalEngine::new(&board.graph);

    board.set("a", Readiness::Unreachable); // a failed
    board.set("b", Readiness::Done);
    board.set("c", Readiness::Ready);

    let marked = engine.propagate_unreachable("a", board.lookup());
    assert!(marked.is_empty());
    assert_eq!(engine.next_ready(board.lookup(), None), vec!["c"]);
}

#[test]
fn drained_when_everything_is_done_or_unreachable() {
    init_tracing();
    let mut board = Board::new(&["a", "b"], &[("a", "b")]);
    let engine = TopologicalEngine::new(&board.graph);

    board.set("a", Readiness::Done);
    board.set("b", Readiness::NotReady);
    assert!(!engine.is_drained(board.lookup()));

    board.set("b", Readiness::Unreachable);
    assert!(engine.is_drained(board.lookup()));
}

// ---------------------------------------------------------------------
// Graph construction

#[test]
fn duplicate_step_ids_are_rejected() {
    init_tracing();
    let mut graph = TrailGraph::new();
    graph.add_step("a").unwrap();
    assert!(matches!(
        graph.add_step("a"),
        Err(TrailError::DuplicateId(id)) if id == "a"
    ));
}

#[test]
fn edges_require_known_endpoints() {
    init_tracing();
    let mut graph = TrailGraph::new();
    graph.add_step("a").unwrap();
    assert!(matches!(
        graph.add_edge("a", "ghost"),
        Err(TrailError::UnknownStep(id)) if id == "ghost"
    ));
    assert!(matches!(
        graph.add_edge("ghost", "a"),
        Err(TrailError::UnknownStep(id)) if id == "ghost"
    ));
}

#[test]
fn cycles_are_rejected_eagerly() {
    init_tracing();
    let mut graph = TrailGraph::new();
    for id in ["a", "b", "c"] {
        graph.add_step(id).unwrap();
    }
    graph.add_edge("a", "b").unwrap();
    graph.add_edge("b", "c").unwrap();

    assert!(matches!(
        graph.add_edge("c", "a"),
        Err(TrailError::WouldCycle { .. })
    ));
    assert!(matches!(
        graph.add_edge("a", "a"),
        Err(TrailError::WouldCycle { .. })
    ));
}

#[test]
fn topological_order_breaks_ties_by_insertion() {
    init_tracing();
    let mut graph = TrailGraph::new();
    for id in ["z", "a", "m"] {
        graph.add_step(id).unwrap();
    }
    graph.add_edge("z", "m").unwrap();

    // z and a are both roots; z was inserted first.
    assert_eq!(graph.topological_order(), vec!["z", "a", "m"]);
}

#[test]
fn adjacency_lookups() {
    init_tracing();
    let mut graph = TrailGraph::new();
    for id in ["a", "b", "c"] {
        graph.add_step(id).unwrap();
    }
    graph.add_edge("a", "b").unwrap();
    graph.add_edge("a", "c").unwrap();

    assert_eq!(graph.successors("a").to_vec(), vec!["b", "c"]);
    assert_eq!(graph.predecessors("b").to_vec(), vec!["a"]);
    assert_eq!(graph.with_descendants(&["a".to_string()]), vec!["a", "b", "c"]);
}
