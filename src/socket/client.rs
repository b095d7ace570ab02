// src/socket/client.rs

//! Client side of the control socket.
//!
//! [`send_request`] is the transport primitive: one connection, one
//! framed request, one framed response. [`TrailClient`] wraps it with a
//! method per API call for embedding programs and tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tokio::net::UnixStream;

use crate::api::wire::{ApiRequest, ApiResponse};
use crate::errors::Result;
use crate::socket::framing::{read_frame, write_frame};

/// Send one request to the server at `path` and wait for its response.
pub async fn send_request(path: &Path, request: &ApiRequest) -> Result<ApiResponse> {
    let mut stream = UnixStream::connect(path).await?;
    write_frame(&mut stream, request).await?;
    let response = read_frame(&mut stream).await?;
    Ok(response)
}

/// Step targeting for the flag and message calls.
///
/// Explicit `ids` win over `tags`; with neither set, every step is
/// targeted. `dry_run` reports would-be effects without applying them.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    ids: Vec<String>,
    tags: BTreeMap<String, String>,
    dry_run: bool,
}

impl Selection {
    /// Target every step.
    pub fn all() -> Self {
        Self::default()
    }

    /// Target the given step ids.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a tag predicate (subset match over step tags).
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Ask the server to report affected steps without mutating anything.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    fn into_payload(self) -> Map<String, Value> {
        let mut payload = Map::new();
        if !self.ids.is_empty() {
            payload.insert("ids".to_string(), json!(self.ids));
        }
        if !self.tags.is_empty() {
            payload.insert("tags".to_string(), json!(self.tags));
        }
        if self.dry_run {
            payload.insert("dry_run".to_string(), json!(true));
        }
        payload
    }
}

/// Convenience client: one method per API call.
#[derive(Debug, Clone)]
pub struct TrailClient {
    socket_path: PathBuf,
}

impl TrailClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn call(&self, name: &str, payload: Value) -> Result<ApiResponse> {
        let request = ApiRequest::new(name, payload);
        send_request(&self.socket_path, &request).await
    }

    async fn call_selected(&self, name: &str, selection: Selection) -> Result<ApiResponse> {
        self.call(name, Value::Object(selection.into_payload()))
            .await
    }

    pub async fn list(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("list", selection).await
    }

    pub async fn status(&self) -> Result<ApiResponse> {
        self.call("status", json!({})).await
    }

    pub async fn pause(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("pause", selection).await
    }

    pub async fn resume(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("resume", selection).await
    }

    pub async fn pause_branch(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("pause_branch", selection).await
    }

    pub async fn resume_branch(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("resume_branch", selection).await
    }

    pub async fn skip(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("skip", selection).await
    }

    pub async fn unskip(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("unskip", selection).await
    }

    pub async fn block(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("block", selection).await
    }

    pub async fn unblock(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("unblock", selection).await
    }

    pub async fn interrupt(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("interrupt", selection).await
    }

    pub async fn rerun(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("rerun", selection).await
    }

    pub async fn send_message_to_steps(
        &self,
        selection: Selection,
        message: Value,
    ) -> Result<ApiResponse> {
        let mut payload = selection.into_payload();
        payload.insert("message".to_string(), message);
        self.call("send_message_to_steps", Value::Object(payload))
            .await
    }

    pub async fn get_step_messages(&self, selection: Selection) -> Result<ApiResponse> {
        self.call_selected("get_step_messages", selection).await
    }

    pub async fn shutdown(&self) -> Result<ApiResponse> {
        self.call("shutdown", json!({})).await
    }
}
