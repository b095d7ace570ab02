// src/api/mod.rs

//! Operator API: wire envelopes and declarative dispatch.

pub mod calls;
pub mod dispatch;
pub mod wire;

pub use dispatch::{handle_api_call, ApiCallDefinition, ApiRegistry, DispatchOutcome};
pub use wire::{ApiError, ApiRequest, ApiResponse, ErrorKind, SHUTDOWN_ACK};
