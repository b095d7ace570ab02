// src/api/calls.rs

//! The built-in API call set.
//!
//! Each call is data: a validator, a selector, an effect and a response
//! builder plugged into an [`ApiCallDefinition`]. Shared behaviour
//! (payload parsing, tag matching, flag application) lives in the helpers
//! at the bottom.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::api::dispatch::ApiCallDefinition;
use crate::api::wire::{ApiError, ApiRequest, ApiResponse, ErrorKind, SHUTDOWN_ACK};
use crate::dag::step::{ControlFlag, StepId, StepState};
use crate::trail::Trail;

/// States in which a pause request is meaningful: either holds a pending
/// step back from dispatch, or signals a running one.
const PAUSABLE: &[StepState] = &[
    StepState::Wait,
    StepState::Ready,
    StepState::Run,
    StepState::Paused,
];

const SKIPPABLE: &[StepState] = &[
    StepState::Wait,
    StepState::Ready,
    StepState::Run,
    StepState::Paused,
    StepState::Blocked,
];

const BLOCKABLE: &[StepState] = &[StepState::Wait, StepState::Ready];

const UNBLOCKABLE: &[StepState] = &[StepState::Wait, StepState::Ready, StepState::Blocked];

/// Only a live worker can be interrupted.
const INTERRUPTIBLE: &[StepState] = &[StepState::Run, StepState::Paused];

const RERUNNABLE: &[StepState] = &[StepState::Success, StepState::Failure, StepState::Skipped];

/// The full built-in call table.
pub fn definitions<C: Send + Sync + 'static>() -> Vec<ApiCallDefinition<C>> {
    vec![
        ApiCallDefinition {
            name: "list",
            validate: validate_selector,
            select: select_targets,
            effect: effect_list,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "status",
            validate: validate_selector,
            select: select_targets,
            effect: effect_status,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "pause",
            validate: validate_selector,
            select: select_targets,
            effect: effect_pause,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "resume",
            validate: validate_selector,
            select: select_targets,
            effect: effect_resume,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "pause_branch",
            validate: validate_selector,
            select: select_branch,
            effect: effect_pause,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "resume_branch",
            validate: validate_selector,
            select: select_branch,
            effect: effect_resume,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "skip",
            validate: validate_selector,
            select: select_targets,
            effect: effect_skip,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "unskip",
            validate: validate_selector,
            select: select_targets,
            effect: effect_unskip,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "block",
            validate: validate_selector,
            select: select_targets,
            effect: effect_block,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "unblock",
            validate: validate_selector,
            select: select_targets,
            effect: effect_unblock,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "interrupt",
            validate: validate_selector,
            select: select_targets,
            effect: effect_interrupt,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "rerun",
            validate: validate_selector,
            select: select_targets,
            effect: effect_rerun,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "send_message_to_steps",
            validate: validate_send_message,
            select: select_targets,
            effect: effect_send_message,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "get_step_messages",
            validate: validate_selector,
            select: select_targets,
            effect: effect_get_messages,
            respond: respond_standard,
        },
        ApiCallDefinition {
            name: "shutdown",
            validate: validate_selector,
            select: select_none,
            effect: effect_shutdown,
            respond: respond_standard,
        },
    ]
}

// ---------------------------------------------------------------------
// Validators

/// Common payload schema: optional `ids` (array of strings), optional
/// `tags` (string-to-string object), optional `dry_run` (bool).
fn validate_selector(request: &ApiRequest) -> Result<(), ApiError> {
    let payload = match &request.payload {
        Value::Null => return Ok(()),
        Value::Object(map) => map,
        other => {
            return Err(ApiError::bad_request(format!(
                "payload must be an object, got {other}"
            )))
        }
    };

    if let Some(ids) = payload.get("ids") {
        let ids = ids
            .as_array()
            .ok_or_else(|| ApiError::bad_request("'ids' must be an array of step ids"))?;
        if !ids.iter().all(Value::is_string) {
            return Err(ApiError::bad_request("'ids' must contain only strings"));
        }
    }
    if let Some(tags) = payload.get("tags") {
        let tags = tags
            .as_object()
            .ok_or_else(|| ApiError::bad_request("'tags' must be an object"))?;
        if !tags.values().all(Value::is_string) {
            return Err(ApiError::bad_request("'tags' values must be strings"));
        }
    }
    if let Some(dry_run) = payload.get("dry_run") {
        if !dry_run.is_boolean() {
            return Err(ApiError::bad_request("'dry_run' must be a boolean"));
        }
    }
    Ok(())
}

fn validate_send_message(request: &ApiRequest) -> Result<(), ApiError> {
    validate_selector(request)?;
    if request.payload.get("message").is_none() {
        return Err(ApiError::bad_request(
            "'message' is required for send_message_to_steps",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Selectors

/// Resolve the request to target step ids.
///
/// `ids` wins over `tags`; unknown ids are an `UnknownStep` error, while
/// a tag filter that matches nothing is simply an empty selection. With
/// neither given, every step is targeted.
fn select_targets<C>(trail: &Trail<C>, request: &ApiRequest) -> Result<Vec<StepId>, ApiError> {
    if let Some(ids) = request.payload.get("ids").and_then(Value::as_array) {
        let mut targets = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.as_str().unwrap_or_default();
            if !trail.contains(id) {
                return Err(ApiError::new(
                    ErrorKind::UnknownStep,
                    format!("unknown step '{id}'"),
                ));
            }
            targets.push(id.to_string());
        }
        return Ok(targets);
    }

    let tags = request_tags(request);
    Ok(trail
        .step_ids()
        .into_iter()
        .filter(|id| trail.matches_tags(id, &tags))
        .collect())
}

/// As [`select_targets`], extended with every descendant of each match.
fn select_branch<C>(trail: &Trail<C>, request: &ApiRequest) -> Result<Vec<StepId>, ApiError> {
    let roots = select_targets(trail, request)?;
    Ok(trail.graph().with_descendants(&roots))
}

fn select_none<C>(_trail: &Trail<C>, _request: &ApiRequest) -> Result<Vec<StepId>, ApiError> {
    Ok(Vec::new())
}

// ---------------------------------------------------------------------
// Effects

fn effect_pause<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    apply_flag(trail, targets, request, ControlFlag::Pause, true, PAUSABLE)
}

fn effect_resume<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    apply_flag(trail, targets, request, ControlFlag::Pause, false, PAUSABLE)
}

fn effect_skip<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    apply_flag(trail, targets, request, ControlFlag::Skip, true, SKIPPABLE)
}

fn effect_unskip<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    apply_flag(trail, targets, request, ControlFlag::Skip, false, SKIPPABLE)
}

fn effect_block<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    apply_flag(trail, targets, request, ControlFlag::Block, true, BLOCKABLE)
}

fn effect_unblock<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    apply_flag(
        trail,
        targets,
        request,
        ControlFlag::Block,
        false,
        UNBLOCKABLE,
    )
}

fn effect_interrupt<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    apply_flag(
        trail,
        targets,
        request,
        ControlFlag::Interrupt,
        true,
        INTERRUPTIBLE,
    )
}

fn effect_rerun<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    apply_flag(trail, targets, request, ControlFlag::Rerun, true, RERUNNABLE)
}

fn effect_list<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    _request: &ApiRequest,
) -> Result<Value, ApiError> {
    let steps: Vec<Value> = targets
        .iter()
        .filter_map(|id| trail.entry(id).map(|e| e.summary()))
        .collect();
    Ok(json!({ "steps": steps }))
}

fn effect_status<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    _request: &ApiRequest,
) -> Result<Value, ApiError> {
    let mut states: BTreeMap<String, usize> = BTreeMap::new();
    for id in targets {
        if let Some(state) = trail.state_of(id) {
            *states.entry(state.to_string()).or_insert(0) += 1;
        }
    }

    let drained = trail.entries().all(|e| e.record.state.is_terminal())
        && !trail
            .step_ids()
            .iter()
            .any(|id| trail.flag(id, ControlFlag::Rerun));

    Ok(json!({
        "steps": targets.len(),
        "states": states,
        "drained": drained,
    }))
}

fn effect_send_message<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    let message = request
        .payload
        .get("message")
        .cloned()
        .unwrap_or(Value::Null);

    // Check every target queue before touching any of them, so a full
    // queue rejects the whole call instead of delivering to a subset.
    for id in targets {
        if let Some(entry) = trail.entry(id) {
            if !entry.to_step.has_capacity() {
                return Err(ApiError::new(
                    ErrorKind::QueueFull,
                    format!("message queue for step '{id}' is full"),
                ));
            }
        }
    }

    let mut affected = Vec::new();
    if !request_dry_run(request) {
        for id in targets {
            if let Some(entry) = trail.entry(id) {
                entry.to_step.push(message.clone())?;
                affected.push(entry.essential());
            }
        }
    } else {
        for id in targets {
            if let Some(entry) = trail.entry(id) {
                affected.push(entry.essential());
            }
        }
    }

    Ok(json!({ "affected": affected }))
}

fn effect_get_messages<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    _request: &ApiRequest,
) -> Result<Value, ApiError> {
    let mut messages = Map::new();
    for id in targets {
        if let Some(entry) = trail.entry_mut(id) {
            // Anything the manager already collected, plus whatever sits
            // in the queue right now.
            let mut drained: Vec<Value> = entry.record.collected_messages.drain(..).collect();
            drained.extend(entry.from_step.drain());
            if !drained.is_empty() {
                messages.insert(id.clone(), Value::Array(drained));
            }
        }
    }
    Ok(json!({ "messages": messages }))
}

fn effect_shutdown<C>(
    _trail: &mut Trail<C>,
    _targets: &[StepId],
    request: &ApiRequest,
) -> Result<Value, ApiError> {
    if request_dry_run(request) {
        return Ok(json!({ "would_shutdown": true }));
    }
    Ok(Value::String(SHUTDOWN_ACK.to_string()))
}

// ---------------------------------------------------------------------
// Response builders

fn respond_standard(request: &ApiRequest, payload: Value) -> ApiResponse {
    ApiResponse::success(&request.request_id, payload)
}

// ---------------------------------------------------------------------
// Shared helpers

fn request_tags(request: &ApiRequest) -> BTreeMap<String, String> {
    request
        .payload
        .get("tags")
        .and_then(Value::as_object)
        .map(|tags| {
            tags.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn request_dry_run(request: &ApiRequest) -> bool {
    request
        .payload
        .get("dry_run")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn request_has_explicit_ids(request: &ApiRequest) -> bool {
    request.payload.get("ids").is_some()
}

/// Set (or clear) a control flag on every target in an applicable state.
///
/// Targets whose state does not admit the flag are reported under
/// `skipped`. A call that targeted explicit ids and applied to none of
/// them answers `InvalidTransition`; the same situation under a tag
/// selector is an ordinary empty result, since tag matches are best
/// effort by design.
fn apply_flag<C>(
    trail: &mut Trail<C>,
    targets: &[StepId],
    request: &ApiRequest,
    flag: ControlFlag,
    value: bool,
    applicable: &[StepState],
) -> Result<Value, ApiError> {
    let dry_run = request_dry_run(request);
    let mut affected = Vec::new();
    let mut skipped = Vec::new();

    for id in targets {
        let state = match trail.state_of(id) {
            Some(state) => state,
            None => continue,
        };
        if applicable.contains(&state) {
            if !dry_run {
                trail.set_flag(id, flag, value);
            }
            if let Some(entry) = trail.entry(id) {
                affected.push(entry.essential());
            }
        } else {
            skipped.push(json!({ "id": id, "state": state }));
        }
    }

    if request_has_explicit_ids(request) && !targets.is_empty() && affected.is_empty() {
        return Err(ApiError::new(
            ErrorKind::InvalidTransition,
            format!(
                "none of the targeted steps can accept {flag:?} in their current state"
            ),
        ));
    }

    Ok(json!({ "affected": affected, "skipped": skipped }))
}
