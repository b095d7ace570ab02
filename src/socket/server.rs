// src/socket/server.rs

//! Scoped Unix-domain control socket.
//!
//! An acceptor task owns the listener: it reads one framed request per
//! connection and queues it, together with a reply channel, for the
//! manager. The manager drains up to N requests per tick with zero
//! timeout; once it answers, the connection task writes the response
//! frame and closes. Errors on a single connection are logged and never
//! reach the manager, and the socket file is removed on every exit path.

use std::io;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::wire::{ApiRequest, ApiResponse};
use crate::socket::framing::{read_frame, write_frame};

/// A request waiting for the manager, with the channel its response
/// travels back on.
#[derive(Debug)]
pub struct ApiEnvelope {
    pub request: ApiRequest,
    pub reply: oneshot::Sender<ApiResponse>,
}

/// The bound control socket.
pub struct SocketServer {
    path: PathBuf,
    pending_rx: mpsc::UnboundedReceiver<ApiEnvelope>,
    accept_task: JoinHandle<()>,
    /// Keeps a per-run temporary socket directory alive for the lifetime
    /// of the server.
    _tempdir: Option<tempfile::TempDir>,
}

impl SocketServer {
    /// Bind the listener and start accepting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(path: PathBuf, tempdir: Option<tempfile::TempDir>) -> io::Result<Self> {
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "control socket bound");

        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(listener, pending_tx));

        Ok(Self {
            path,
            pending_rx,
            accept_task,
            _tempdir: tempdir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drain up to `max` pending requests without waiting.
    pub fn drain_pending(&mut self, max: usize) -> Vec<ApiEnvelope> {
        let mut envelopes = Vec::new();
        while envelopes.len() < max {
            match self.pending_rx.try_recv() {
                Ok(envelope) => envelopes.push(envelope),
                Err(_) => break,
            }
        }
        envelopes
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove socket file");
            }
        } else {
            debug!(path = %self.path.display(), "socket file removed");
        }
    }
}

async fn accept_loop(listener: UnixListener, pending_tx: mpsc::UnboundedSender<ApiEnvelope>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let tx = pending_tx.clone();
                tokio::spawn(handle_connection(stream, tx));
            }
            Err(e) => {
                // Transient accept failures happen under fd pressure;
                // keep serving.
                warn!(error = %e, "error accepting control connection");
            }
        }
    }
}

/// One connection: read a frame, hand it to the manager, write the reply.
async fn handle_connection(mut stream: UnixStream, pending_tx: mpsc::UnboundedSender<ApiEnvelope>) {
    let request: ApiRequest = match read_frame(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "dropping connection with unreadable request");
            return;
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if pending_tx
        .send(ApiEnvelope {
            request,
            reply: reply_tx,
        })
        .is_err()
    {
        // Manager is gone; the client sees a closed connection.
        return;
    }

    match reply_rx.await {
        Ok(response) => {
            if let Err(e) = write_frame(&mut stream, &response).await {
                debug!(error = %e, "failed to write response frame");
            }
        }
        Err(_) => {
            debug!("manager dropped the reply channel before answering");
        }
    }
}
