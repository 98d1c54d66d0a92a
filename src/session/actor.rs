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

//! Session actor.
//!
//! Owns every session and processes one event at a time: caller commands,
//! replies from outstanding calls, transfer progress and results. Each
//! asynchronous step runs as its own task and reports back through the same
//! channel, so a handler never observes another one half-done.

use bluer::Address;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::agent::AgentSlot;
use super::registry::{CallId, CallKind, PendingCall, Session, SessionRegistry};
use super::transfer::{Direction, Transfer, TransferSpec, TransferState, TransferTicket};
use super::{
    Backend, SessionId, SessionProperties, SessionRequest, SessionSnapshot, SessionState,
    TransferId,
};
use crate::bluetooth::{AdapterId, BoxedTransport, ServiceDiscovery};
use crate::error::{Error, Result};
use crate::obex::ObexEngine;

/// Prefix of exposed session paths.
const SESSION_PATH_PREFIX: &str = "/org/openobex/session";

/// Upper bound on the DISCONNECT exchange during teardown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How a transfer enters its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferMode {
    /// Independent of the put queue.
    Get,
    /// Refused while any put-type transfer is pending.
    Put,
    /// Queued behind pending put-type transfers.
    Send,
}

/// Requests from [`Client`](super::Client) and [`SessionHandle`](super::SessionHandle).
pub(crate) enum Command {
    Create {
        request: SessionRequest,
        ready: oneshot::Sender<Result<()>>,
        reply: oneshot::Sender<Result<SessionId>>,
    },
    Acquire(SessionId),
    Release(SessionId),
    Shutdown(SessionId, oneshot::Sender<Result<()>>),
    OwnerDisconnected(String),
    Snapshot(SessionId, oneshot::Sender<Result<SessionSnapshot>>),
    Properties(SessionId, oneshot::Sender<Result<SessionProperties>>),
    Register(SessionId, oneshot::Sender<Result<String>>),
    AssignAgent {
        session: SessionId,
        owner: String,
        path: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ReleaseAgent {
        session: SessionId,
        owner: String,
        path: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Transfer {
        session: SessionId,
        mode: TransferMode,
        spec: TransferSpec,
        size: u64,
        reply: oneshot::Sender<Result<TransferTicket>>,
    },
    CancelTransfer {
        session: SessionId,
        transfer: TransferId,
        reply: oneshot::Sender<Result<()>>,
    },
    SetPath {
        session: SessionId,
        folder: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Count(oneshot::Sender<usize>),
    Stop(oneshot::Sender<()>),
}

/// Result of an outstanding call.
pub(crate) enum Reply {
    AdapterResolved(Result<AdapterId>),
    AdmissionGranted(Result<()>),
    ServiceFound(Result<u8>),
    TransportConnected(Result<BoxedTransport>),
    ObexConnected(Result<Arc<dyn ObexEngine>>),
    Authorization(Result<String>),
    PathSet(Result<()>),
}

/// Everything the actor reacts to.
pub(crate) enum Event {
    Command(Command),
    Reply {
        session: SessionId,
        call: CallId,
        reply: Reply,
    },
    /// Deferred authorization for transfers that need no agent round-trip.
    Authorized {
        session: SessionId,
        transfer: TransferId,
    },
    Progress {
        session: SessionId,
        transfer: TransferId,
        transferred: u64,
    },
    TransferDone {
        session: SessionId,
        transfer: TransferId,
        result: Result<Vec<u8>>,
    },
}

pub(crate) struct ClientActor {
    backend: Backend,
    registry: SessionRegistry,
    events: mpsc::UnboundedSender<Event>,
    inbox: mpsc::UnboundedReceiver<Event>,
    next_call: u64,
    next_path: u64,
    next_transfer: u64,
}

impl ClientActor {
    pub fn new(
        backend: Backend,
        events: mpsc::UnboundedSender<Event>,
        inbox: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        Self {
            backend,
            registry: SessionRegistry::new(),
            events,
            inbox,
            next_call: 0,
            next_path: 0,
            next_transfer: 0,
        }
    }

    pub async fn run(mut self) {
        info!("Session actor started");

        while let Some(event) = self.inbox.recv().await {
            match event {
                Event::Command(Command::Stop(reply)) => {
                    self.stop_all();
                    let _ = reply.send(());
                    break;
                }
                Event::Command(command) => self.handle_command(command),
                Event::Reply {
                    session,
                    call,
                    reply,
                } => self.handle_reply(session, call, reply),
                Event::Authorized { session, transfer } => {
                    self.start_transfer(session, transfer, None)
                }
                Event::Progress {
                    session,
                    transfer,
                    transferred,
                } => self.on_progress(session, transfer, transferred),
                Event::TransferDone {
                    session,
                    transfer,
                    result,
                } => self.terminate_transfer(session, transfer, result),
            }
        }

        info!("Session actor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Create {
                request,
                ready,
                reply,
            } => self.create_session(request, ready, reply),
            Command::Acquire(id) => self.acquire(id),
            Command::Release(id) => self.release(id),
            Command::Shutdown(id, reply) => {
                let result = if self.registry.get(id).is_some() {
                    self.shutdown(id);
                    Ok(())
                } else {
                    Err(Error::Closed)
                };
                let _ = reply.send(result);
            }
            Command::OwnerDisconnected(owner) => self.owner_disconnected(&owner),
            Command::Snapshot(id, reply) => {
                let _ = reply.send(self.session(id).map(Session::snapshot));
            }
            Command::Properties(id, reply) => {
                let _ = reply.send(self.session(id).map(Session::properties));
            }
            Command::Register(id, reply) => {
                let _ = reply.send(self.register(id));
            }
            Command::AssignAgent {
                session,
                owner,
                path,
                reply,
            } => {
                let _ = reply.send(self.assign_agent(session, owner, path));
            }
            Command::ReleaseAgent {
                session,
                owner,
                path,
                reply,
            } => {
                let _ = reply.send(self.release_agent(session, &owner, &path));
            }
            Command::Transfer {
                session,
                mode,
                spec,
                size,
                reply,
            } => self.add_transfer(session, mode, spec, size, reply),
            Command::CancelTransfer {
                session,
                transfer,
                reply,
            } => {
                let _ = reply.send(self.cancel_transfer(session, transfer));
            }
            Command::SetPath {
                session,
                folder,
                reply,
            } => self.set_path(session, folder, reply),
            Command::Count(reply) => {
                let _ = reply.send(self.registry.len());
            }
            Command::Stop(reply) => {
                self.stop_all();
                let _ = reply.send(());
            }
        }
    }

    fn session(&self, id: SessionId) -> Result<&Session> {
        self.registry.get(id).ok_or(Error::Closed)
    }

    /// A live session that may carry OBEX operations.
    fn connected_session(registry: &mut SessionRegistry, id: SessionId) -> Result<&mut Session> {
        let session = registry.get_mut(id).ok_or(Error::Closed)?;
        if !session.is_live() {
            return Err(Error::Closed);
        }
        if session.obex.is_none() {
            return Err(Error::NotConnected);
        }
        Ok(session)
    }

    /// Run `call` as a tracked, cancellable step of session `id`.
    fn spawn_call<F>(&mut self, id: SessionId, kind: CallKind, call: F)
    where
        F: Future<Output = Reply> + Send + 'static,
    {
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };

        self.next_call += 1;
        let call_id = CallId(self.next_call);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let reply = call.await;
            let _ = events.send(Event::Reply {
                session: id,
                call: call_id,
                reply,
            });
        });

        debug!("{}: {} call {} issued", id, kind.name(), call_id.0);
        session.calls.insert(
            call_id,
            PendingCall {
                kind,
                abort: task.abort_handle(),
            },
        );
    }

    fn handle_reply(&mut self, id: SessionId, call_id: CallId, reply: Reply) {
        let Some(session) = self.registry.get_mut(id) else {
            debug!("Discarding reply for gone {}", id);
            return;
        };
        let Some(call) = session.calls.remove(&call_id) else {
            debug!("{}: discarding stale reply to call {}", id, call_id.0);
            return;
        };

        match reply {
            Reply::AdapterResolved(result) => self.on_adapter(id, result),
            Reply::AdmissionGranted(result) => self.on_admission(id, result),
            Reply::ServiceFound(result) => self.on_service(id, result),
            Reply::TransportConnected(result) => self.on_transport(id, result),
            Reply::ObexConnected(result) => self.on_obex(id, result),
            Reply::Authorization(result) => {
                if let CallKind::Authorize(transfer) = call.kind {
                    self.on_authorization(id, transfer, result);
                }
            }
            Reply::PathSet(result) => {
                if let CallKind::SetPath(reply) = call.kind {
                    let _ = reply.send(result);
                }
            }
        }
    }

    // Lifecycle

    fn create_session(
        &mut self,
        request: SessionRequest,
        ready: oneshot::Sender<Result<()>>,
        reply: oneshot::Sender<Result<SessionId>>,
    ) {
        let Some(driver) = self.backend.drivers.find(&request.service) else {
            warn!("No driver for service {}", request.service);
            let _ = reply.send(Err(Error::UnknownService(request.service)));
            return;
        };

        if let Some(id) = self.registry.find(&request) {
            if let Some(session) = self.registry.get_mut(id) {
                session.refs += 1;
                debug!("{}: reused ({} refs)", id, session.refs);
                if session.state == SessionState::Ready {
                    let _ = ready.send(Ok(()));
                } else {
                    session.waiters.push(ready);
                }
                if reply.send(Ok(id)).is_err() {
                    self.release(id);
                }
                return;
            }
        }

        let id = self.registry.next_id();
        info!(
            "{}: new {} session to {}",
            id, driver.service(), request.destination
        );
        let mut session = Session::new(id, request, driver);
        session.waiters.push(ready);
        self.registry.insert(session);

        if reply.send(Ok(id)).is_err() {
            self.release(id);
            return;
        }

        self.resolve_adapter(id);
    }

    fn acquire(&mut self, id: SessionId) {
        match self.registry.get_mut(id) {
            Some(session) => {
                session.refs += 1;
                debug!("{}: acquired ({} refs)", id, session.refs);
            }
            None => warn!("Acquire on unknown {}", id),
        }
    }

    fn release(&mut self, id: SessionId) {
        let Some(session) = self.registry.get_mut(id) else {
            debug!("Release on unknown {}", id);
            return;
        };

        session.refs = session.refs.saturating_sub(1);
        debug!("{}: released ({} refs)", id, session.refs);
        if session.refs > 0 {
            return;
        }

        self.shutdown(id);
        if let Some(mut session) = self.registry.remove(id) {
            session.transition(SessionState::Destroyed);
            info!("{}: destroyed", id);
        }
    }

    /// Release everything the session holds. Runs at most once per session;
    /// the record itself stays until the last reference is gone.
    fn shutdown(&mut self, id: SessionId) {
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        if !session.is_live() {
            return;
        }
        session.transition(SessionState::ShuttingDown);

        if let (true, Some(adapter)) = (session.admitted, session.adapter.clone()) {
            let adapters = self.backend.adapters.clone();
            tokio::spawn(async move {
                if let Err(e) = adapters.release_admission(&adapter).await {
                    warn!("Failed to release admission on {}: {}", adapter.name, e);
                }
            });
        }

        for (call_id, call) in session.calls.drain() {
            debug!("{}: cancelling {} call {}", id, call.kind.name(), call_id.0);
            call.cancel();
        }
        for transfer in session.queue.drain(..) {
            transfer.cancel();
        }
        for (_, transfer) in session.gets.drain() {
            transfer.cancel();
        }
        for waiter in session.waiters.drain(..) {
            let _ = waiter.send(Err(Error::Cancelled));
        }
        if let Some(agent) = session.agent.take() {
            agent.release();
        }
        if let Some(engine) = session.obex.take() {
            tokio::spawn(async move {
                match tokio::time::timeout(DISCONNECT_TIMEOUT, engine.disconnect()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("OBEX disconnect failed: {}", e),
                    Err(_) => debug!("OBEX disconnect timed out"),
                }
            });
        }

        if let Some(path) = session.path.take() {
            let info = session.info(&path);
            session.driver.remove(&info);
            debug!("{}: unregistered {}", id, path);
        }
    }

    fn fail(&mut self, id: SessionId, err: Error) {
        error!("{}: {}", id, err);
        if let Some(session) = self.registry.get_mut(id) {
            for waiter in session.waiters.drain(..) {
                let _ = waiter.send(Err(err.clone()));
            }
        }
        self.shutdown(id);
    }

    fn owner_disconnected(&mut self, owner: &str) {
        let ids = self.registry.owned_by(owner);
        if !ids.is_empty() {
            info!("{} disconnected, shutting down {} sessions", owner, ids.len());
        }
        for id in ids {
            self.shutdown(id);
        }
    }

    fn stop_all(&mut self) {
        for id in self.registry.ids() {
            self.shutdown(id);
            if let Some(mut session) = self.registry.remove(id) {
                session.transition(SessionState::Destroyed);
            }
        }
    }

    // Bring-up

    fn resolve_adapter(&mut self, id: SessionId) {
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        session.transition(SessionState::ResolvingAdapter);
        let source = session.request.source;

        let adapters = self.backend.adapters.clone();
        self.spawn_call(id, CallKind::ResolveAdapter, async move {
            Reply::AdapterResolved(adapters.resolve_adapter(source).await)
        });
    }

    fn on_adapter(&mut self, id: SessionId, result: Result<AdapterId>) {
        let adapter = match result {
            Ok(adapter) => adapter,
            Err(e) => return self.fail(id, e),
        };
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        debug!("{}: using adapter {}", id, adapter.name);
        session.adapter = Some(adapter.clone());
        session.transition(SessionState::RequestingAdmission);

        let adapters = self.backend.adapters.clone();
        self.spawn_call(id, CallKind::RequestAdmission, async move {
            Reply::AdmissionGranted(adapters.request_admission(&adapter).await)
        });
    }

    fn on_admission(&mut self, id: SessionId, result: Result<()>) {
        if let Err(e) = result {
            return self.fail(id, e);
        }
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        session.admitted = true;

        match session.channel {
            Some(channel) => self.connect_transport(id, channel),
            None => self.discover(id),
        }
    }

    fn endpoints(&self, id: SessionId) -> Result<(Address, Address)> {
        let session = self.session(id)?;
        let local = session
            .adapter
            .as_ref()
            .map(|a| a.address)
            .ok_or_else(|| Error::Admission("No adapter resolved".to_string()))?;
        Ok((local, session.request.destination))
    }

    fn discover(&mut self, id: SessionId) {
        let (local, remote) = match self.endpoints(id) {
            Ok(endpoints) => endpoints,
            Err(e) => return self.fail(id, e),
        };
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        let uuid = match Uuid::parse_str(session.driver.uuid()) {
            Ok(uuid) => uuid,
            Err(e) => {
                return self.fail(id, Error::Discovery(format!("Invalid service UUID: {}", e)))
            }
        };
        session.transition(SessionState::DiscoveringService);

        let discovery = self.backend.discovery.clone();
        self.spawn_call(id, CallKind::Discover, async move {
            Reply::ServiceFound(find_channel(discovery, local, remote, uuid).await)
        });
    }

    fn on_service(&mut self, id: SessionId, result: Result<u8>) {
        let channel = match result {
            Ok(channel) => channel,
            Err(e) => return self.fail(id, e),
        };
        if let Some(session) = self.registry.get_mut(id) {
            debug!("{}: service found on channel {}", id, channel);
            session.channel = Some(channel);
        }
        self.connect_transport(id, channel);
    }

    fn connect_transport(&mut self, id: SessionId, channel: u8) {
        let (local, remote) = match self.endpoints(id) {
            Ok(endpoints) => endpoints,
            Err(e) => return self.fail(id, e),
        };
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        session.transition(SessionState::ConnectingTransport);

        let connector = self.backend.connector.clone();
        let security = self.backend.security;
        self.spawn_call(id, CallKind::ConnectTransport, async move {
            Reply::TransportConnected(connector.connect(local, remote, channel, security).await)
        });
    }

    fn on_transport(&mut self, id: SessionId, result: Result<BoxedTransport>) {
        let transport = match result {
            Ok(transport) => transport,
            Err(e) => return self.fail(id, e),
        };
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        session.transition(SessionState::HandshakingObex);
        let target = session.driver.target().map(|t| t.to_vec());

        let engine = self.backend.engines.wrap(transport);
        self.spawn_call(id, CallKind::ObexConnect, async move {
            let connected = engine.connect(target.as_deref()).await;
            Reply::ObexConnected(connected.map(|_| engine))
        });
    }

    fn on_obex(&mut self, id: SessionId, result: Result<Arc<dyn ObexEngine>>) {
        let engine = match result {
            Ok(engine) => engine,
            Err(e) => return self.fail(id, e),
        };
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        session.obex = Some(engine);
        session.transition(SessionState::Ready);
        info!("{}: connected to {}", id, session.request.destination);

        for waiter in session.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    // Exposure and agents

    fn register(&mut self, id: SessionId) -> Result<String> {
        let session = self.registry.get_mut(id).ok_or(Error::Closed)?;
        if !session.is_live() {
            return Err(Error::Closed);
        }
        if let Some(path) = &session.path {
            return Ok(path.clone());
        }

        self.next_path += 1;
        let path = format!("{}{}", SESSION_PATH_PREFIX, self.next_path);
        if let Err(e) = session.driver.probe(&session.info(&path)) {
            warn!("{}: {} probe failed: {}", id, session.driver.service(), e);
            return Err(e);
        }

        info!("{}: registered at {}", id, path);
        session.path = Some(path.clone());
        Ok(path)
    }

    fn assign_agent(&mut self, id: SessionId, owner: String, path: String) -> Result<()> {
        let session = self.registry.get_mut(id).ok_or(Error::Closed)?;
        if !session.is_live() {
            return Err(Error::Closed);
        }
        if session.agent.is_some() {
            return Err(Error::AlreadyExists);
        }

        let agent = self.backend.agents.create(&owner, &path);
        session.agent = Some(AgentSlot::new(&owner, &path, agent));
        info!("{}: agent {} assigned by {}", id, path, owner);
        if session.owner.is_none() {
            session.owner = Some(owner);
        }
        Ok(())
    }

    fn release_agent(&mut self, id: SessionId, owner: &str, path: &str) -> Result<()> {
        let session = self.registry.get_mut(id).ok_or(Error::Closed)?;
        match &session.agent {
            None => Ok(()),
            Some(slot) if slot.owner != owner || slot.path != path => Err(Error::NotAuthorized),
            Some(_) => {
                session.agent = None;
                debug!("{}: agent {} released by {}", id, path, owner);
                Ok(())
            }
        }
    }

    // Transfers

    fn add_transfer(
        &mut self,
        id: SessionId,
        mode: TransferMode,
        spec: TransferSpec,
        size: u64,
        reply: oneshot::Sender<Result<TransferTicket>>,
    ) {
        let session = match Self::connected_session(&mut self.registry, id) {
            Ok(session) => session,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        if mode == TransferMode::Put && !session.queue.is_empty() {
            let _ = reply.send(Err(Error::AlreadyConnected));
            return;
        }

        self.next_transfer += 1;
        let transfer_id = TransferId(self.next_transfer);
        let path = session
            .path
            .as_ref()
            .map(|p| format!("{}/transfer{}", p, transfer_id.0));
        let direction = match mode {
            TransferMode::Get => Direction::Get,
            TransferMode::Put | TransferMode::Send => Direction::Put,
        };

        let (transfer, ticket) = Transfer::new(transfer_id, path, direction, spec, size);
        debug!("{}: {} registered ({:?}, {} bytes)", id, transfer_id, mode, size);

        let start = match direction {
            Direction::Get => {
                session.gets.insert(transfer_id, transfer);
                true
            }
            Direction::Put => {
                session.queue.push_back(transfer);
                session.queue.len() == 1
            }
        };

        let _ = reply.send(Ok(ticket));
        if start {
            self.authorize(id, transfer_id);
        }
    }

    /// Ask the agent, if there is one and the transfer is exposed; otherwise
    /// authorize on the next turn of the loop.
    fn authorize(&mut self, id: SessionId, transfer_id: TransferId) {
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        let agent = session.agent.as_ref().map(|slot| slot.agent.clone());
        let Some(transfer) = session.transfer_mut(transfer_id) else {
            return;
        };
        transfer.state = TransferState::Authorizing;

        match (agent, transfer.path.clone()) {
            (Some(agent), Some(path)) => {
                debug!("{}: asking agent about {}", id, path);
                self.spawn_call(id, CallKind::Authorize(transfer_id), async move {
                    Reply::Authorization(agent.request(&path).await)
                });
            }
            _ => {
                let _ = self.events.send(Event::Authorized {
                    session: id,
                    transfer: transfer_id,
                });
            }
        }
    }

    fn on_authorization(&mut self, id: SessionId, transfer_id: TransferId, result: Result<String>) {
        match result {
            Ok(name) => self.start_transfer(id, transfer_id, Some(name)),
            Err(e) => {
                let message = match e {
                    Error::Authorization(message) => message,
                    other => other.to_string(),
                };
                self.terminate_transfer(id, transfer_id, Err(Error::Authorization(message)));
            }
        }
    }

    fn start_transfer(&mut self, id: SessionId, transfer_id: TransferId, name: Option<String>) {
        let events = self.events.clone();
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        let Some(engine) = session.obex.clone() else {
            return self.terminate_transfer(id, transfer_id, Err(Error::NotConnected));
        };
        let Some(transfer) = session.transfer_mut(transfer_id) else {
            debug!("{}: {} gone before start", id, transfer_id);
            return;
        };
        if transfer.state != TransferState::Authorizing {
            return;
        }

        transfer.rename(name);
        transfer.start(id, engine, events);
        info!("{}: {} started", id, transfer_id);
    }

    fn on_progress(&mut self, id: SessionId, transfer_id: TransferId, transferred: u64) {
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        let Some(transfer) = session.transfer_mut(transfer_id) else {
            return;
        };
        transfer.transferred = transferred;
        let complete = transfer.is_complete_at(transferred);
        let path = transfer.path.clone();

        if let (Some(slot), Some(path)) = (&session.agent, &path) {
            slot.notify_progress(path, transferred);
        }
        debug!("{}: {} progress {} bytes", id, transfer_id, transferred);

        if complete {
            self.terminate_transfer(id, transfer_id, Ok(Vec::new()));
        }
    }

    /// Unregister a transfer with its final result and advance the put queue.
    /// Results for transfers already gone are ignored.
    fn terminate_transfer(
        &mut self,
        id: SessionId,
        transfer_id: TransferId,
        result: Result<Vec<u8>>,
    ) {
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        let Some((mut transfer, was_head)) = session.take_transfer(transfer_id) else {
            debug!("{}: ignoring late result for {}", id, transfer_id);
            return;
        };

        for call_id in session.authorize_calls(transfer_id) {
            if let Some(call) = session.calls.remove(&call_id) {
                call.cancel();
            }
        }
        if let Some(task) = transfer.task.take() {
            interrupt(session, task);
        }

        if let (Some(slot), Some(path)) = (&session.agent, &transfer.path) {
            match &result {
                Ok(_) => slot.notify_complete(path),
                Err(e) => slot.notify_error(path, &e.to_string()),
            }
        }
        match &result {
            Ok(_) => info!("{}: {} complete", id, transfer_id),
            Err(e) => error!("{}: {} error: {}", id, transfer_id, e),
        }
        transfer.finish(result);

        let next = if was_head {
            session
                .queue
                .front()
                .filter(|t| t.state == TransferState::Queued)
                .map(|t| t.id)
        } else {
            None
        };
        if let Some(next) = next {
            debug!("{}: promoting {}", id, next);
            self.authorize(id, next);
        }
    }

    fn cancel_transfer(&mut self, id: SessionId, transfer_id: TransferId) -> Result<()> {
        let session = self.registry.get_mut(id).ok_or(Error::Closed)?;
        if session.transfer_mut(transfer_id).is_none() {
            return Err(Error::InvalidArguments(format!("Unknown {}", transfer_id)));
        }

        self.terminate_transfer(id, transfer_id, Err(Error::Cancelled));
        Ok(())
    }

    fn set_path(&mut self, id: SessionId, folder: String, reply: oneshot::Sender<Result<()>>) {
        let engine = match Self::connected_session(&mut self.registry, id) {
            Ok(session) => session.obex.clone(),
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let Some(engine) = engine else {
            let _ = reply.send(Err(Error::NotConnected));
            return;
        };

        debug!("{}: set path {}", id, folder);
        self.spawn_call(id, CallKind::SetPath(reply), async move {
            Reply::PathSet(engine.set_path(&folder).await)
        });
    }
}

/// Stop a transfer's data task. A task that was still running may have cut an
/// exchange short, so the engine settles the stream right away instead of
/// leaving it to the next operation.
fn interrupt(session: &Session, task: AbortHandle) {
    let running = !task.is_finished();
    task.abort();

    let Some(engine) = session.obex.clone().filter(|_| running) else {
        return;
    };
    let id = session.id;
    tokio::spawn(async move {
        if let Err(e) = engine.abort().await {
            warn!("{}: failed to settle OBEX stream: {}", id, e);
        }
    });
}

/// Search the remote for `uuid` and return the first RFCOMM channel found.
async fn find_channel(
    discovery: Arc<dyn ServiceDiscovery>,
    local: Address,
    remote: Address,
    uuid: Uuid,
) -> Result<u8> {
    let session = discovery.open(local, remote).await?;
    let mut records = session.search(uuid);

    while let Some(record) = records.next().await {
        if let Some(channel) = record?.rfcomm_channel() {
            return Ok(channel);
        }
    }

    Err(Error::Discovery("Unable to find service record".to_string()))
}
