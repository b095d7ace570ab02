// src/errors.rs

//! Crate-wide error type and helpers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrailError {
    #[error("duplicate step id '{0}'")]
    DuplicateId(String),

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("edge '{from}' -> '{to}' would create a cycle")]
    WouldCycle { from: String, to: String },

    #[error("trail validation failed: {0}")]
    Validation(String),

    #[error("failed to bind control socket at {path}: {source}")]
    SocketBind {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrailError {
    /// Process exit code for a server that failed with this error.
    ///
    /// - 1: the trail definition itself is invalid (cycle, unknown or
    ///   duplicate step).
    /// - 2: the control socket could not be bound.
    /// - 3: anything else (unhandled internal error).
    pub fn exit_code(&self) -> i32 {
        match self {
            TrailError::DuplicateId(_)
            | TrailError::UnknownStep(_)
            | TrailError::WouldCycle { .. }
            | TrailError::Validation(_) => 1,
            TrailError::SocketBind { .. } => 2,
            TrailError::Io(_) | TrailError::Other(_) => 3,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TrailError>;
