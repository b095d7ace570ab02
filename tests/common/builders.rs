//! Shared helpers for driving real trail servers in tests.

#![allow(dead_code)] // not every integration test uses every helper

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use autotrail::errors::Result;
use autotrail::{
    Selection, Step, StepState, Trail, TrailClient, TrailConfig, TrailServer, TrailSummary,
};

/// Order in which step actions actually ran, shared with the test body.
pub type RunLog = Arc<Mutex<Vec<String>>>;

pub fn new_run_log() -> RunLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn log_entries(log: &RunLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// A step that records its run and succeeds.
pub fn ok_step(id: &str, log: &RunLog) -> Step<()> {
    let log = Arc::clone(log);
    let step_id = id.to_string();
    Step::new(id, move |_ctx, _env| {
        log.lock().unwrap().push(step_id.clone());
        Ok(json!(step_id))
    })
}

/// A step that records its run and fails.
pub fn fail_step(id: &str, log: &RunLog) -> Step<()> {
    let log = Arc::clone(log);
    let step_id = id.to_string();
    Step::new(id, move |_ctx, _env| {
        log.lock().unwrap().push(step_id.clone());
        anyhow::bail!("step '{step_id}' failed on purpose")
    })
}

/// A release latch shared between a test body and a step action.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    released: Arc<AtomicBool>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Block (on the worker thread) until released.
    pub fn wait(&self) {
        while !self.is_released() {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

/// A step that records its run, then blocks until the gate opens.
pub fn gated_step(id: &str, log: &RunLog, gate: &Gate) -> Step<()> {
    let log = Arc::clone(log);
    let gate = gate.clone();
    let step_id = id.to_string();
    Step::new(id, move |_ctx, _env| {
        log.lock().unwrap().push(step_id.clone());
        gate.wait();
        Ok(json!(step_id))
    })
}

/// Bind a server with a fast tick and run it in the background.
pub async fn start_server(
    trail: Trail<()>,
    tick_ms: u64,
) -> Result<(TrailClient, PathBuf, JoinHandle<Result<TrailSummary>>)> {
    let config = TrailConfig {
        tick_interval_ms: tick_ms,
        ..TrailConfig::default()
    };
    let server = TrailServer::bind(trail, config).await?;
    let path = server.socket_path().to_path_buf();
    let client = TrailClient::new(&path);
    let handle = tokio::spawn(server.serve());
    Ok((client, path, handle))
}

/// Poll `list` until the step reaches the wanted state.
///
/// Panics (failing the test) if the state is not observed in time.
pub async fn wait_for_state(client: &TrailClient, id: &str, state: StepState) {
    for _ in 0..500 {
        if let Ok(response) = client.list(Selection::ids([id])).await {
            if let Ok(result) = response.into_result() {
                let observed = result["steps"][0]["state"].clone();
                if observed == json!(state) {
                    return;
                }
            }
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("step '{id}' never reached state {state:?}");
}
