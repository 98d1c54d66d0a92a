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

//! Client sessions.
//!
//! Every session lives inside a single actor task. Callers talk to it through
//! [`Client`] and counted [`SessionHandle`]s; collaborators are injected via
//! [`Backend`].

mod actor;
mod agent;
mod client;
mod registry;
mod transfer;

use bluer::Address;
use std::fmt;
use std::sync::Arc;

use crate::bluetooth::{AdapterManager, Security, ServiceDiscovery, TransportConnector};
use crate::obex::EngineFactory;
use crate::services::DriverRegistry;

pub use agent::{AgentFactory, LoggingAgent, LoggingAgentFactory, TransferAgent};
pub use client::{Client, PendingSession, SessionHandle};
pub use transfer::{TransferOutcome, TransferSpec, TransferTicket};

/// Session identifier, unique for the lifetime of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session{}", self.0)
    }
}

/// Transfer identifier, unique for the lifetime of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer{}", self.0)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    ResolvingAdapter,
    RequestingAdmission,
    DiscoveringService,
    ConnectingTransport,
    HandshakingObex,
    Ready,
    ShuttingDown,
    Destroyed,
}

/// Parameters of a session request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Local adapter address; `None` means any adapter.
    pub source: Option<Address>,
    pub destination: Address,
    /// Service name, matched case-insensitively against registered drivers.
    pub service: String,
    /// Fixed RFCOMM channel; `None` runs service discovery.
    pub channel: Option<u8>,
    /// Identity of the caller that owns the session.
    pub owner: Option<String>,
}

impl SessionRequest {
    pub fn new(destination: Address, service: impl Into<String>) -> Self {
        Self {
            source: None,
            destination,
            service: service.into(),
            channel: None,
            owner: None,
        }
    }

    pub fn source(mut self, source: Address) -> Self {
        self.source = Some(source);
        self
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Externally visible session properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProperties {
    pub source: Address,
    pub destination: Address,
    /// RFCOMM channel, 0 while unknown.
    pub channel: u8,
}

/// Point-in-time view of a session's internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    pub refs: usize,
    pub channel: Option<u8>,
    pub pending_transfers: usize,
    pub pending_calls: usize,
    pub path: Option<String>,
    pub owner: Option<String>,
    pub has_agent: bool,
}

/// Collaborators used by sessions.
#[derive(Clone)]
pub struct Backend {
    pub adapters: Arc<dyn AdapterManager>,
    pub discovery: Arc<dyn ServiceDiscovery>,
    pub connector: Arc<dyn TransportConnector>,
    pub engines: Arc<dyn EngineFactory>,
    pub agents: Arc<dyn AgentFactory>,
    pub drivers: Arc<DriverRegistry>,
    /// Link security requested for RFCOMM channels.
    pub security: Security,
}
