mod common;

use crate::common::builders::{fail_step, log_entries, new_run_log, ok_step, start_server};
use crate::common::init_tracing;

use std::error::Error;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use autotrail::{Step, StepState, StepStatus, Trail};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn linear_trail_runs_in_order() -> TestResult {
    init_tracing();

    let log = new_run_log();
    let trail = Trail::builder(())
        .add_step(ok_step("a", &log))
        .add_step(ok_step("b", &log))
        .add_step(ok_step("c", &log))
        .add_edge("a", "b")
        .add_edge("b", "c")
        .build()?;

    let (_client, _path, handle) = start_server(trail, 5).await?;
    let summary = timeout(Duration::from_secs(10), handle).await???;

    assert_eq!(summary.state_of("a"), Some(StepState::Success));
    assert_eq!(summary.state_of("b"), Some(StepState::Success));
    assert_eq!(summary.state_of("c"), Some(StepState::Success));
    assert_eq!(log_entries(&log), vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn diamond_with_failure_leaves_join_unreachable() -> TestResult {
    init_tracing();

    // a -> {b, c} -> d; b fails, c succeeds, d must never run.
    let log = new_run_log();
    let trail = Trail::builder(())
        .add_step(ok_step("a", &log))
        .add_step(fail_step("b", &log))
        .add_step(ok_step("c", &log))
        .add_step(ok_step("d", &log))
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge("b", "d")
        .add_edge("c", "d")
        .build()?;

    let (_client, _path, handle) = start_server(trail, 5).await?;
    let summary = timeout(Duration::from_secs(10), handle).await???;

    assert_eq!(summary.state_of("a"), Some(StepState::Success));
    assert_eq!(summary.state_of("b"), Some(StepState::Failure));
    assert_eq!(summary.state_of("c"), Some(StepState::Success));
    assert_eq!(summary.state_of("d"), Some(StepState::Unreachable));
    assert!(!log_entries(&log).contains(&"d".to_string()));
    Ok(())
}

#[tokio::test]
async fn failure_records_the_error_chain() -> TestResult {
    init_tracing();

    let log = new_run_log();
    let trail = Trail::builder(())
        .add_step(fail_step("only", &log))
        .build()?;

    let (_client, _path, handle) = start_server(trail, 5).await?;
    let summary = timeout(Duration::from_secs(10), handle).await???;

    let result = summary.result_of("only").expect("failure recorded");
    assert_eq!(result.status, StepStatus::Failure);
    assert_eq!(result.value, json!("step 'only' failed on purpose"));
    Ok(())
}

#[tokio::test]
async fn panicking_action_is_reported_as_failure() -> TestResult {
    init_tracing();

    let trail = Trail::builder(())
        .add_step(Step::new("explosive", |_ctx: &(), _env| panic!("kaboom")))
        .build()?;

    let (_client, _path, handle) = start_server(trail, 5).await?;
    let summary = timeout(Duration::from_secs(10), handle).await???;

    assert_eq!(summary.state_of("explosive"), Some(StepState::Failure));
    let result = summary.result_of("explosive").expect("panic recorded");
    assert_eq!(result.status, StepStatus::Failure);
    assert_eq!(result.value, json!("action panicked: kaboom"));
    Ok(())
}

#[tokio::test]
async fn independent_branches_run_in_parallel() -> TestResult {
    init_tracing();

    // Two gated steps that only finish once both have started: if the
    // manager ran them one at a time, neither could ever complete.
    let started = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let make_step = |id: &str| {
        let started = std::sync::Arc::clone(&started);
        Step::new(id, move |_ctx: &(), _env| {
            started.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            while started.load(std::sync::atomic::Ordering::SeqCst) < 2 {
                std::thread::sleep(Duration::from_millis(2));
            }
            Ok(json!("done"))
        })
    };

    let trail = Trail::builder(())
        .add_step(make_step("left"))
        .add_step(make_step("right"))
        .build()?;

    let (_client, _path, handle) = start_server(trail, 5).await?;
    let summary = timeout(Duration::from_secs(10), handle).await???;

    assert!(summary.all_succeeded());
    Ok(())
}

#[tokio::test]
async fn max_parallel_workers_bounds_dispatch() -> TestResult {
    init_tracing();

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let make_step = |id: &str| {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        Step::new(id, move |_ctx: &(), _env| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(json!("done"))
        })
    };

    let trail = Trail::builder(())
        .add_step(make_step("one"))
        .add_step(make_step("two"))
        .add_step(make_step("three"))
        .add_step(make_step("four"))
        .build()?;

    let config = autotrail::TrailConfig {
        tick_interval_ms: 5,
        max_parallel_workers: Some(1),
        ..autotrail::TrailConfig::default()
    };
    let server = autotrail::TrailServer::bind(trail, config).await?;
    let summary = timeout(Duration::from_secs(10), server.serve()).await??;

    assert!(summary.all_succeeded());
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    Ok(())
}
