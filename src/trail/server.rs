// src/trail/server.rs

//! Public entry point: bind the control socket and serve a trail.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::TrailConfig;
use crate::dag::step::{StepId, StepResult, StepState};
use crate::errors::{Result, TrailError};
use crate::socket::server::SocketServer;
use crate::trail::manager::TrailManager;
use crate::trail::Trail;

/// Final state of one step, as reported when the manager exits.
#[derive(Debug, Clone)]
pub struct StepSummary {
    pub id: StepId,
    pub name: String,
    pub state: StepState,
    pub result: Option<StepResult>,
}

/// Final per-step states of a finished trail run.
#[derive(Debug, Clone)]
pub struct TrailSummary {
    pub steps: Vec<StepSummary>,
}

impl TrailSummary {
    pub fn state_of(&self, id: &str) -> Option<StepState> {
        self.steps.iter().find(|s| s.id == id).map(|s| s.state)
    }

    pub fn result_of(&self, id: &str) -> Option<&StepResult> {
        self.steps
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.result.as_ref())
    }

    /// Whether every step ended in `Success` or `Skipped`.
    pub fn all_succeeded(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.state, StepState::Success | StepState::Skipped))
    }
}

/// A trail bound to its control socket, ready to serve.
///
/// The server process convention: a clean serve returns `Ok`; failures
/// map to exit codes through [`TrailError::exit_code`] (1 validation,
/// 2 socket bind, 3 internal).
pub struct TrailServer<C> {
    manager: TrailManager<C>,
    socket_path: PathBuf,
}

impl<C: Send + Sync + 'static> TrailServer<C> {
    /// Bind the control socket for the given trail.
    ///
    /// With no `socket_path` configured, the socket lives in a fresh
    /// temporary directory that is removed together with the socket file
    /// on shutdown. Must be called from within a Tokio runtime.
    pub async fn bind(trail: Trail<C>, config: TrailConfig) -> Result<Self> {
        let (path, tempdir) = match &config.socket_path {
            Some(path) => (path.clone(), None),
            None => {
                let dir = tempfile::Builder::new().prefix("autotrail-").tempdir()?;
                (dir.path().join("control.sock"), Some(dir))
            }
        };

        let socket = SocketServer::bind(path.clone(), tempdir).map_err(|source| {
            TrailError::SocketBind {
                path: path.clone(),
                source,
            }
        })?;

        trail.set_queue_cap(config.message_queue_cap);

        Ok(Self {
            manager: TrailManager::new(trail, socket, config),
            socket_path: path,
        })
    }

    /// Where clients should connect.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Run the manager loop to completion.
    ///
    /// Returns when the trail drains (every step terminal, no rerun
    /// pending) or a `shutdown` call is honoured. The socket file is
    /// removed on all exit paths.
    pub async fn serve(self) -> Result<TrailSummary> {
        info!(socket = %self.socket_path.display(), "trail server starting");
        let summary = self.manager.run().await?;
        info!("trail server stopped");
        Ok(summary)
    }
}
