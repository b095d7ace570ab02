// src/api/dispatch.rs

//! Declarative request handling.
//!
//! Every API call is described by an [`ApiCallDefinition`]: a plain value
//! with five slots (name, validator, selector, effect, response builder)
//! kept in a lookup table. [`handle_api_call`] runs the slots in order;
//! there is no registration side effect and no per-call control flow
//! outside the definitions themselves.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{info, warn};

use crate::api::calls;
use crate::api::wire::{ApiError, ApiRequest, ApiResponse, ErrorKind, SHUTDOWN_ACK};
use crate::dag::step::StepId;
use crate::trail::Trail;

/// How one API call is validated, targeted, applied and answered.
pub struct ApiCallDefinition<C> {
    /// Wire identifier.
    pub name: &'static str,
    /// Rejects schema-invalid payloads with `BadRequest`.
    pub validate: fn(&ApiRequest) -> Result<(), ApiError>,
    /// Maps the request to the target step ids. An empty selection is
    /// not an error.
    pub select: fn(&Trail<C>, &ApiRequest) -> Result<Vec<StepId>, ApiError>,
    /// Applies the call to the targets (flag mutations, queue pushes)
    /// and returns the result payload.
    pub effect: fn(&mut Trail<C>, &[StepId], &ApiRequest) -> Result<Value, ApiError>,
    /// Composes the response envelope from the effect's payload.
    pub respond: fn(&ApiRequest, Value) -> ApiResponse,
}

/// Outcome of dispatching one request.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub response: ApiResponse,
    /// False once a `shutdown` call has been honoured.
    pub keep_running: bool,
}

/// Lookup table of API call definitions, keyed by wire name.
pub struct ApiRegistry<C> {
    calls: HashMap<&'static str, ApiCallDefinition<C>>,
}

impl<C: Send + Sync + 'static> Default for ApiRegistry<C> {
    fn default() -> Self {
        Self::with_default_calls()
    }
}

impl<C: Send + Sync + 'static> ApiRegistry<C> {
    /// A registry holding the built-in call set.
    pub fn with_default_calls() -> Self {
        let mut table = HashMap::new();
        for definition in calls::definitions::<C>() {
            table.insert(definition.name, definition);
        }
        Self { calls: table }
    }

    pub fn get(&self, name: &str) -> Option<&ApiCallDefinition<C>> {
        self.calls.get(name)
    }

    pub fn handle(&self, trail: &mut Trail<C>, request: &ApiRequest) -> DispatchOutcome {
        handle_api_call(trail, self, request)
    }
}

/// Validate, select, apply and answer a single API call.
///
/// Unknown names and validation failures answer `BadRequest`; effect
/// errors answer with the effect's error kind. Nothing in here ever
/// panics the manager: a malformed call costs exactly one error response.
pub fn handle_api_call<C: Send + Sync + 'static>(
    trail: &mut Trail<C>,
    registry: &ApiRegistry<C>,
    request: &ApiRequest,
) -> DispatchOutcome {
    let definition = match registry.get(&request.name) {
        Some(definition) => definition,
        None => {
            warn!(call = %request.name, "unknown API call");
            return DispatchOutcome {
                response: ApiResponse::failure(
                    &request.request_id,
                    ApiError::bad_request(format!("unknown API call '{}'", request.name)),
                ),
                keep_running: true,
            };
        }
    };

    if let Err(error) = (definition.validate)(request) {
        return DispatchOutcome {
            response: ApiResponse::failure(&request.request_id, error),
            keep_running: true,
        };
    }

    let targets = match (definition.select)(trail, request) {
        Ok(targets) => targets,
        Err(error) => {
            return DispatchOutcome {
                response: ApiResponse::failure(&request.request_id, error),
                keep_running: true,
            };
        }
    };

    let payload = match (definition.effect)(trail, &targets, request) {
        Ok(payload) => payload,
        Err(error) => {
            return DispatchOutcome {
                response: ApiResponse::failure(&request.request_id, error),
                keep_running: true,
            };
        }
    };

    // A honoured shutdown call is recognised by its sentinel payload.
    let keep_running = payload != Value::String(SHUTDOWN_ACK.to_string());

    let response = (definition.respond)(request, payload);
    info!(
        call = %request.name,
        request_id = %request.request_id,
        targets = targets.len(),
        ok = response.ok,
        "handled API call"
    );

    DispatchOutcome {
        response,
        keep_running,
    }
}

/// Convenience conversion for effects that hit a full queue.
impl From<crate::exec::QueueFull> for ApiError {
    fn from(err: crate::exec::QueueFull) -> Self {
        ApiError::new(ErrorKind::QueueFull, err.to_string())
    }
}
