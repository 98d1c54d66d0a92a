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

//! Caller-facing handles to the session actor.

use std::fmt;
use std::future::Future;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::{ClientActor, Command, Event, TransferMode};
use super::transfer::{TransferSpec, TransferTicket};
use super::{
    Backend, SessionId, SessionProperties, SessionRequest, SessionSnapshot, TransferId,
};
use crate::error::{Error, Result};

async fn answer<T>(sent: bool, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    if !sent {
        return Err(Error::Closed);
    }
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(Error::Closed),
    }
}

/// Entry point: owns the session actor and creates sessions.
#[derive(Clone)]
pub struct Client {
    events: mpsc::UnboundedSender<Event>,
}

impl Client {
    /// Start the session actor on the current tokio runtime.
    pub fn spawn(backend: Backend) -> Self {
        let (events, inbox) = mpsc::unbounded_channel();
        let actor = ClientActor::new(backend, events.clone(), inbox);
        tokio::spawn(actor.run());
        Self { events }
    }

    fn send(&self, command: Command) -> bool {
        self.events.send(Event::Command(command)).is_ok()
    }

    /// Request a session, reusing a matching one if possible.
    ///
    /// Returns as soon as the session exists; use
    /// [`PendingSession::connected`] to wait for bring-up.
    pub async fn create_session(&self, request: SessionRequest) -> Result<PendingSession> {
        let (ready_tx, ready) = oneshot::channel();
        let (reply, rx) = oneshot::channel();
        let sent = self.send(Command::Create {
            request,
            ready: ready_tx,
            reply,
        });

        let id = answer(sent, rx).await?;
        Ok(PendingSession {
            session: SessionHandle::adopt(id, self.events.clone()),
            ready,
        })
    }

    /// Request a session and wait until it is connected.
    pub async fn connect(&self, request: SessionRequest) -> Result<SessionHandle> {
        self.create_session(request).await?.connected().await
    }

    /// The caller identified by `owner` went away; shut down its sessions.
    pub fn owner_disconnected(&self, owner: &str) {
        self.send(Command::OwnerDisconnected(owner.to_string()));
    }

    /// Sessions currently held, including ones shutting down.
    pub async fn session_count(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Count(reply)) {
            return Err(Error::Closed);
        }
        rx.await.map_err(|_| Error::Closed)
    }

    /// Tear down every session and stop the actor.
    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Stop(reply)) {
            return Err(Error::Closed);
        }
        rx.await.map_err(|_| Error::Closed)
    }
}

/// A session whose bring-up may still be running.
pub struct PendingSession {
    session: SessionHandle,
    ready: oneshot::Receiver<Result<()>>,
}

impl PendingSession {
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Wait for bring-up. On failure the reference is released.
    pub async fn connected(self) -> Result<SessionHandle> {
        match self.ready.await {
            Ok(Ok(())) => Ok(self.session),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Closed),
        }
    }
}

/// Counted reference to a session.
///
/// Cloning takes a reference and dropping gives it back; the session is
/// destroyed when the last one goes. Commands are queued when a method is
/// called, and the returned future only waits for the answer.
pub struct SessionHandle {
    id: SessionId,
    events: mpsc::UnboundedSender<Event>,
}

impl SessionHandle {
    /// Wrap a reference already counted by the actor.
    fn adopt(id: SessionId, events: mpsc::UnboundedSender<Event>) -> Self {
        Self { id, events }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    fn request<T, F>(&self, build: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(oneshot::Sender<Result<T>>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        let sent = self.events.send(Event::Command(build(reply))).is_ok();
        answer(sent, rx)
    }

    pub fn snapshot(&self) -> impl Future<Output = Result<SessionSnapshot>> + Send + 'static {
        let id = self.id;
        self.request(move |reply| Command::Snapshot(id, reply))
    }

    /// Source, destination and channel.
    pub fn properties(&self) -> impl Future<Output = Result<SessionProperties>> + Send + 'static {
        let id = self.id;
        self.request(move |reply| Command::Properties(id, reply))
    }

    /// Expose the session and return its path. Idempotent.
    pub fn register(&self) -> impl Future<Output = Result<String>> + Send + 'static {
        let id = self.id;
        self.request(move |reply| Command::Register(id, reply))
    }

    pub fn assign_agent(
        &self,
        owner: &str,
        path: &str,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let (session, owner, path) = (self.id, owner.to_string(), path.to_string());
        self.request(move |reply| Command::AssignAgent {
            session,
            owner,
            path,
            reply,
        })
    }

    pub fn release_agent(
        &self,
        owner: &str,
        path: &str,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let (session, owner, path) = (self.id, owner.to_string(), path.to_string());
        self.request(move |reply| Command::ReleaseAgent {
            session,
            owner,
            path,
            reply,
        })
    }

    fn transfer(
        &self,
        mode: TransferMode,
        spec: TransferSpec,
        size: u64,
    ) -> impl Future<Output = Result<TransferTicket>> + Send + 'static {
        let session = self.id;
        self.request(move |reply| Command::Transfer {
            session,
            mode,
            spec,
            size,
            reply,
        })
    }

    /// Fetch an object. The body ends up in the outcome and, if given, in
    /// `spec.filename`.
    pub fn get(
        &self,
        spec: TransferSpec,
    ) -> impl Future<Output = Result<TransferTicket>> + Send + 'static {
        self.transfer(TransferMode::Get, spec, 0)
    }

    /// Fetch an object into memory only.
    pub fn pull(
        &self,
        mime_type: &str,
        target_name: Option<&str>,
    ) -> impl Future<Output = Result<TransferTicket>> + Send + 'static {
        let mut spec = TransferSpec::new().mime_type(mime_type);
        spec.target_name = target_name.map(str::to_string);
        self.get(spec)
    }

    /// Send an object from `spec.buffer` or `spec.filename`. Fails with
    /// [`Error::AlreadyConnected`] while another put-type transfer is pending.
    pub async fn put(&self, spec: TransferSpec) -> Result<TransferTicket> {
        let size = match (&spec.buffer, &spec.filename) {
            (Some(buffer), _) => buffer.len() as u64,
            (None, Some(filename)) => tokio::fs::metadata(filename).await?.len(),
            (None, None) => 0,
        };
        self.transfer(TransferMode::Put, spec, size).await
    }

    /// Send a local file, queued behind pending put-type transfers. The
    /// remote name defaults to the file name.
    pub async fn send(
        &self,
        filename: impl AsRef<Path>,
        target_name: Option<&str>,
    ) -> Result<TransferTicket> {
        let filename = filename.as_ref();
        let metadata = tokio::fs::metadata(filename).await?;
        if !metadata.is_file() {
            return Err(Error::InvalidArguments(format!(
                "{} is not a file",
                filename.display()
            )));
        }

        let target = match target_name {
            Some(name) => Some(name.to_string()),
            None => filename
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        };
        let mut spec = TransferSpec::new().filename(filename);
        spec.target_name = target;

        self.transfer(TransferMode::Send, spec, metadata.len()).await
    }

    pub fn cancel_transfer(
        &self,
        transfer: TransferId,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let session = self.id;
        self.request(move |reply| Command::CancelTransfer {
            session,
            transfer,
            reply,
        })
    }

    /// Change the remote folder: `/` for root, `..` for parent, otherwise a
    /// relative or absolute path.
    pub fn set_path(&self, folder: &str) -> impl Future<Output = Result<()>> + Send + 'static {
        let (session, folder) = (self.id, folder.to_string());
        self.request(move |reply| Command::SetPath {
            session,
            folder,
            reply,
        })
    }

    /// Release the session's resources now. The record goes away once every
    /// handle is dropped.
    pub fn shutdown(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let id = self.id;
        self.request(move |reply| Command::Shutdown(id, reply))
    }
}

impl Clone for SessionHandle {
    fn clone(&self) -> Self {
        let _ = self.events.send(Event::Command(Command::Acquire(self.id)));
        Self {
            id: self.id,
            events: self.events.clone(),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Command(Command::Release(self.id)));
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}
