mod common;

use crate::common::builders::{gated_step, new_run_log, start_server, wait_for_state, Gate};
use crate::common::init_tracing;

use std::error::Error;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use autotrail::{StepState, Trail};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn shutdown_drains_running_workers_and_removes_the_socket() -> TestResult {
    init_tracing();

    // b is mid-run when the shutdown lands: the manager must let its
    // worker finish, fold the completion into the summary, and only
    // then exit and remove the socket file.
    let log = new_run_log();
    let gate = Gate::new();
    let trail = Trail::builder(())
        .add_step(gated_step("b", &log, &gate))
        .build()?;

    let (client, path, handle) = start_server(trail, 5).await?;
    wait_for_state(&client, "b", StepState::Run).await;

    let response = client.shutdown().await?;
    assert!(response.ok);
    assert_eq!(response.result, Some(json!("ShutdownAck")));

    // The worker is still holding the trail open; let it finish.
    gate.release();
    let summary = timeout(Duration::from_secs(10), handle).await???;

    assert_eq!(summary.state_of("b"), Some(StepState::Success));
    assert!(!path.exists(), "socket file must be removed on shutdown");
    Ok(())
}

#[tokio::test]
async fn shutdown_before_pending_steps_leaves_them_waiting() -> TestResult {
    init_tracing();

    // a is running, b is still waiting on it; a shutdown mid-run means b
    // never starts.
    let log = new_run_log();
    let gate = Gate::new();
    let trail = Trail::builder(())
        .add_step(gated_step("a", &log, &gate))
        .add_step(crate::common::builders::ok_step("b", &log))
        .add_edge("a", "b")
        .build()?;

    let (client, _path, handle) = start_server(trail, 5).await?;
    wait_for_state(&client, "a", StepState::Run).await;

    client.shutdown().await?;
    gate.release();

    let summary = timeout(Duration::from_secs(10), handle).await???;
    assert_eq!(summary.state_of("a"), Some(StepState::Success));
    assert_eq!(summary.state_of("b"), Some(StepState::Wait));
    Ok(())
}

#[tokio::test]
async fn natural_completion_also_removes_the_socket() -> TestResult {
    init_tracing();

    let log = new_run_log();
    let trail = Trail::builder(())
        .add_step(crate::common::builders::ok_step("only", &log))
        .build()?;

    let (_client, path, handle) = start_server(trail, 5).await?;
    let summary = timeout(Duration::from_secs(10), handle).await???;

    assert!(summary.all_succeeded());
    assert!(!path.exists(), "socket file must be removed after draining");
    Ok(())
}

#[tokio::test]
async fn dry_run_shutdown_keeps_the_server_alive() -> TestResult {
    init_tracing();

    let log = new_run_log();
    let gate = Gate::new();
    let trail = Trail::builder(())
        .add_step(gated_step("a", &log, &gate))
        .build()?;

    let (client, _path, handle) = start_server(trail, 5).await?;
    wait_for_state(&client, "a", StepState::Run).await;

    let request = autotrail::ApiRequest::new("shutdown", json!({ "dry_run": true }));
    let response = autotrail::send_request(client.socket_path(), &request).await?;
    assert!(response.ok);
    assert_eq!(response.result, Some(json!({ "would_shutdown": true })));

    // Still serving: a status call answers and the step is still running.
    let status = client.status().await?.into_result()?;
    assert_eq!(status["states"]["Run"], json!(1));

    gate.release();
    let summary = timeout(Duration::from_secs(10), handle).await???;
    assert!(summary.all_succeeded());
    Ok(())
}
