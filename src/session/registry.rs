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

//! Session records and the registry that owns them.

use bluer::Address;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use super::agent::AgentSlot;
use super::transfer::Transfer;
use super::{
    SessionId, SessionProperties, SessionRequest, SessionSnapshot, SessionState, TransferId,
};
use crate::bluetooth::AdapterId;
use crate::error::{Error, Result};
use crate::obex::ObexEngine;
use crate::services::{ServiceDriver, SessionInfo};

/// Identifier of an outstanding asynchronous call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CallId(pub u64);

/// What an outstanding call is for, plus its continuation if it has one.
pub(crate) enum CallKind {
    ResolveAdapter,
    RequestAdmission,
    Discover,
    ConnectTransport,
    ObexConnect,
    Authorize(TransferId),
    SetPath(oneshot::Sender<Result<()>>),
}

impl CallKind {
    pub fn name(&self) -> &'static str {
        match self {
            CallKind::ResolveAdapter => "resolve-adapter",
            CallKind::RequestAdmission => "request-admission",
            CallKind::Discover => "discover",
            CallKind::ConnectTransport => "connect-transport",
            CallKind::ObexConnect => "obex-connect",
            CallKind::Authorize(_) => "authorize",
            CallKind::SetPath(_) => "set-path",
        }
    }
}

pub(crate) struct PendingCall {
    pub kind: CallKind,
    pub abort: AbortHandle,
}

impl PendingCall {
    /// Abort the call; a waiting caller sees `Cancelled`.
    pub fn cancel(self) {
        self.abort.abort();
        if let CallKind::SetPath(reply) = self.kind {
            let _ = reply.send(Err(Error::Cancelled));
        }
    }
}

/// One session and everything it owns.
pub(crate) struct Session {
    pub id: SessionId,
    pub request: SessionRequest,
    pub driver: Arc<dyn ServiceDriver>,
    pub state: SessionState,
    pub refs: usize,
    pub owner: Option<String>,
    /// Requested channel, or the one found by discovery.
    pub channel: Option<u8>,
    pub adapter: Option<AdapterId>,
    /// Admission was granted and must be given back on shutdown.
    pub admitted: bool,
    pub obex: Option<Arc<dyn ObexEngine>>,
    pub agent: Option<AgentSlot>,
    pub path: Option<String>,
    pub calls: HashMap<CallId, PendingCall>,
    /// Callers waiting for bring-up to finish.
    pub waiters: Vec<oneshot::Sender<Result<()>>>,
    /// Put-type transfers; the head is the one allowed to run.
    pub queue: VecDeque<Transfer>,
    /// Get-type transfers, not subject to the queue.
    pub gets: HashMap<TransferId, Transfer>,
}

impl Session {
    pub fn new(id: SessionId, request: SessionRequest, driver: Arc<dyn ServiceDriver>) -> Self {
        Self {
            id,
            owner: request.owner.clone(),
            channel: request.channel,
            request,
            driver,
            state: SessionState::Created,
            refs: 1,
            adapter: None,
            admitted: false,
            obex: None,
            agent: None,
            path: None,
            calls: HashMap::new(),
            waiters: Vec::new(),
            queue: VecDeque::new(),
            gets: HashMap::new(),
        }
    }

    /// Move to `state`, logging the transition.
    pub fn transition(&mut self, state: SessionState) {
        debug!("{}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }

    /// Local address: the resolved adapter, else the requested source.
    pub fn source(&self) -> Option<Address> {
        self.adapter
            .as_ref()
            .map(|a| a.address)
            .or(self.request.source)
    }

    pub fn is_live(&self) -> bool {
        !matches!(
            self.state,
            SessionState::ShuttingDown | SessionState::Destroyed
        )
    }

    /// Whether a new request may share this session.
    pub fn matches(&self, request: &SessionRequest) -> bool {
        if !self.is_live() {
            return false;
        }
        if let Some(source) = request.source {
            if self.source() != Some(source) {
                return false;
            }
        }
        if let Some(channel) = request.channel {
            if self.channel != Some(channel) {
                return false;
            }
        }
        self.request.destination == request.destination
            && self.request.service.eq_ignore_ascii_case(&request.service)
            && self.owner == request.owner
    }

    pub fn info(&self, path: &str) -> SessionInfo {
        SessionInfo {
            id: self.id,
            path: path.to_string(),
            destination: self.request.destination,
            service: self.driver.service().to_string(),
            channel: self.channel,
        }
    }

    pub fn properties(&self) -> SessionProperties {
        SessionProperties {
            source: self.source().unwrap_or_else(Address::any),
            destination: self.request.destination,
            channel: self.channel.unwrap_or(0),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            state: self.state,
            refs: self.refs,
            channel: self.channel,
            pending_transfers: self.queue.len() + self.gets.len(),
            pending_calls: self.calls.len(),
            path: self.path.clone(),
            owner: self.owner.clone(),
            has_agent: self.agent.is_some(),
        }
    }

    pub fn transfer_mut(&mut self, id: TransferId) -> Option<&mut Transfer> {
        if let Some(transfer) = self.gets.get_mut(&id) {
            return Some(transfer);
        }
        self.queue.iter_mut().find(|t| t.id == id)
    }

    /// Unlink a transfer. The flag tells whether it was the queue head.
    pub fn take_transfer(&mut self, id: TransferId) -> Option<(Transfer, bool)> {
        if let Some(transfer) = self.gets.remove(&id) {
            return Some((transfer, false));
        }
        let index = self.queue.iter().position(|t| t.id == id)?;
        self.queue.remove(index).map(|t| (t, index == 0))
    }

    /// Calls waiting on the agent for this transfer.
    pub fn authorize_calls(&self, id: TransferId) -> Vec<CallId> {
        self.calls
            .iter()
            .filter(|(_, call)| matches!(call.kind, CallKind::Authorize(t) if t == id))
            .map(|(call_id, _)| *call_id)
            .collect()
    }
}

/// All sessions of a client, live or shutting down.
///
/// Iteration is in creation order, so reuse lookups return the oldest match.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> SessionId {
        self.next_id += 1;
        SessionId(self.next_id)
    }

    pub fn insert(&mut self, session: Session) {
        debug!("Registry: added {}", session.id);
        self.sessions.insert(session.id, session);
    }

    /// Remove a session; removing twice is a no-op.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id);
        if session.is_some() {
            debug!("Registry: removed {}", id);
        }
        session
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn find(&self, request: &SessionRequest) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.matches(request))
            .map(|s| s.id)
    }

    /// Live sessions created by `owner`.
    pub fn owned_by(&self, owner: &str) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.is_live() && s.owner.as_deref() == Some(owner))
            .map(|s| s.id)
            .collect()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
