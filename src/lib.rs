// src/lib.rs

//! AutoTrail: a partial-automation workflow engine.
//!
//! A trail is a directed acyclic graph of steps. The engine runs it with
//! live, out-of-band operator control: individual steps can be paused,
//! resumed, skipped, blocked, interrupted, rerun and messaged over a
//! Unix-domain control socket while the run is in flight.
//!
//! The crate wires together:
//! - a DAG layer with a re-evaluating topological engine ([`dag`]),
//! - a worker pool executing user action functions ([`exec`]),
//! - a declarative operator API ([`api`]),
//! - a framed Unix-socket transport ([`socket`]),
//! - and the single-threaded manager loop that owns all step state
//!   ([`trail`]).
//!
//! # Example
//!
//! ```no_run
//! use autotrail::{Selection, Step, Trail, TrailClient, TrailConfig, TrailServer};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let trail = Trail::builder(())
//!         .add_step(Step::new("fetch", |_ctx, _env| Ok(json!("fetched"))))
//!         .add_step(Step::new("deploy", |_ctx, _env| Ok(json!("deployed"))))
//!         .add_edge("fetch", "deploy")
//!         .build()?;
//!
//!     let server = TrailServer::bind(trail, TrailConfig::default()).await?;
//!     let client = TrailClient::new(server.socket_path());
//!
//!     let run = tokio::spawn(server.serve());
//!     client.pause(Selection::ids(["deploy"])).await?;
//!     client.resume(Selection::ids(["deploy"])).await?;
//!
//!     let summary = run.await??;
//!     assert!(summary.all_succeeded());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod socket;
pub mod trail;

pub use api::{ApiError, ApiRequest, ApiResponse, ErrorKind};
pub use config::TrailConfig;
pub use dag::{Step, StepId, StepResult, StepState, StepStatus};
pub use errors::{Result, TrailError};
pub use exec::{QueueFull, StepEnvironment};
pub use socket::{send_request, Selection, TrailClient};
pub use trail::{StepSummary, Trail, TrailBuilder, TrailServer, TrailSummary};
