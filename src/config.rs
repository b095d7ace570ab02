// src/config.rs

//! Runtime configuration for a trail server.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Options recognised by [`TrailServer`](crate::trail::TrailServer).
///
/// All fields have defaults, so `TrailConfig::default()` gives a working
/// configuration: a per-run temporary socket path, a 50 ms tick and no
/// worker or queue limits.
#[derive(Debug, Clone, Deserialize)]
pub struct TrailConfig {
    /// Filesystem path for the Unix-domain control socket.
    ///
    /// If `None`, a fresh path inside a per-run temporary directory is
    /// used; the directory (and socket file) are removed on shutdown.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Delay between manager loop iterations, in milliseconds.
    ///
    /// A longer tick makes the trail respond to API calls and step
    /// completions more slowly; a shorter one burns more CPU.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum number of steps running at the same time.
    ///
    /// `None` means unbounded: every ready step is dispatched immediately.
    #[serde(default)]
    pub max_parallel_workers: Option<usize>,

    /// Capacity of each per-step message queue.
    ///
    /// `None` means unbounded. When a cap is set,
    /// `send_message_to_steps` fails with `QueueFull` once a target
    /// queue is at capacity.
    #[serde(default)]
    pub message_queue_cap: Option<usize>,
}

fn default_tick_interval_ms() -> u64 {
    50
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            tick_interval_ms: default_tick_interval_ms(),
            max_parallel_workers: None,
            message_queue_cap: None,
        }
    }
}

impl TrailConfig {
    /// The tick interval as a [`Duration`].
    ///
    /// Clamped to at least 1 ms; `tokio::time::interval` rejects a zero
    /// period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
