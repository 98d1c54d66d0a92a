// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transfers and their data path.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::debug;

use super::actor::Event;
use super::{SessionId, TransferId};
use crate::error::{Error, Result};
use crate::obex::{ObexEngine, ObjectRequest};

/// Description of a GET or PUT.
#[derive(Debug, Clone, Default)]
pub struct TransferSpec {
    /// MIME type sent in the Type header.
    pub mime_type: Option<String>,
    /// Local file: written after a GET, read for a PUT without buffer.
    pub filename: Option<PathBuf>,
    /// Remote object name.
    pub target_name: Option<String>,
    pub app_params: Option<Vec<u8>>,
    /// In-memory body for a PUT.
    pub buffer: Option<Vec<u8>>,
}

impl TransferSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<PathBuf>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    pub fn app_params(mut self, params: Vec<u8>) -> Self {
        self.app_params = Some(params);
        self
    }

    pub fn buffer(mut self, buffer: Vec<u8>) -> Self {
        self.buffer = Some(buffer);
        self
    }
}

/// Result of a finished transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Final object name, after any agent override.
    pub name: Option<String>,
    /// Bytes transferred.
    pub size: u64,
    /// Received body for GETs; empty for PUTs.
    pub buffer: Vec<u8>,
}

/// Returned when a transfer is registered.
#[derive(Debug)]
pub struct TransferTicket {
    pub id: TransferId,
    /// Exposed path, present when the session is registered.
    pub path: Option<String>,
    done: oneshot::Receiver<Result<TransferOutcome>>,
}

impl TransferTicket {
    pub(crate) fn new(
        id: TransferId,
        path: Option<String>,
        done: oneshot::Receiver<Result<TransferOutcome>>,
    ) -> Self {
        Self { id, path, done }
    }

    /// Wait for the transfer to terminate.
    pub async fn finished(self) -> Result<TransferOutcome> {
        match self.done.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Closed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Get,
    Put,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferState {
    Queued,
    Authorizing,
    Active,
}

/// A registered transfer owned by its session.
pub(crate) struct Transfer {
    pub id: TransferId,
    pub path: Option<String>,
    pub direction: Direction,
    pub request: ObjectRequest,
    pub filename: Option<PathBuf>,
    pub buffer: Option<Vec<u8>>,
    /// Declared size; 0 when unknown.
    pub size: u64,
    pub transferred: u64,
    pub state: TransferState,
    pub task: Option<AbortHandle>,
    done: Option<oneshot::Sender<Result<TransferOutcome>>>,
}

impl Transfer {
    pub fn new(
        id: TransferId,
        path: Option<String>,
        direction: Direction,
        spec: TransferSpec,
        size: u64,
    ) -> (Self, TransferTicket) {
        let (tx, rx) = oneshot::channel();
        let ticket = TransferTicket::new(id, path.clone(), rx);
        let transfer = Self {
            id,
            path,
            direction,
            request: ObjectRequest {
                name: spec.target_name,
                mime_type: spec.mime_type,
                app_params: spec.app_params,
            },
            filename: spec.filename,
            buffer: spec.buffer,
            size,
            transferred: 0,
            state: TransferState::Queued,
            task: None,
            done: Some(tx),
        };
        (transfer, ticket)
    }

    /// Apply an agent-supplied name; empty names are ignored.
    pub fn rename(&mut self, name: Option<String>) {
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            debug!("{} renamed to {}", self.id, name);
            self.request.name = Some(name);
        }
    }

    /// Whether this progress update reaches the declared size.
    pub fn is_complete_at(&self, transferred: u64) -> bool {
        self.size > 0 && transferred == self.size
    }

    /// Deliver the terminal result to the ticket holder.
    pub fn finish(mut self, result: Result<Vec<u8>>) {
        let size = self.transferred.max(self.size);
        let outcome = result.map(|buffer| TransferOutcome {
            name: self.request.name.take(),
            size: size.max(buffer.len() as u64),
            buffer,
        });
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome);
        }
    }

    /// Stop the data task, if any, and fail the ticket with `Cancelled`.
    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.finish(Err(Error::Cancelled));
    }

    /// Start moving data on `engine`; progress and the final result come back
    /// as actor events.
    pub fn start(
        &mut self,
        session: SessionId,
        engine: Arc<dyn ObexEngine>,
        events: mpsc::UnboundedSender<Event>,
    ) {
        let transfer = self.id;
        let direction = self.direction;
        let request = self.request.clone();
        let filename = self.filename.clone();
        let buffer = self.buffer.take();
        let progress_events = events.clone();

        let handle = tokio::spawn(async move {
            let progress = move |transferred: u64| {
                let _ = progress_events.send(Event::Progress {
                    session,
                    transfer,
                    transferred,
                });
            };

            let result = match direction {
                Direction::Get => match engine.get(&request, &progress).await {
                    Ok(body) => match &filename {
                        Some(path) => tokio::fs::write(path, &body)
                            .await
                            .map(|_| body)
                            .map_err(Error::from),
                        None => Ok(body),
                    },
                    Err(e) => Err(e),
                },
                Direction::Put => {
                    let body = match (buffer, &filename) {
                        (Some(body), _) => Ok(body),
                        (None, Some(path)) => tokio::fs::read(path).await.map_err(Error::from),
                        (None, None) => Ok(Vec::new()),
                    };
                    match body {
                        Ok(body) => engine
                            .put(&request, &body, &progress)
                            .await
                            .map(|_| Vec::new()),
                        Err(e) => Err(e),
                    }
                }
            };

            let _ = events.send(Event::TransferDone {
                session,
                transfer,
                result,
            });
        });

        self.task = Some(handle.abort_handle());
        self.state = TransferState::Active;
    }
}
