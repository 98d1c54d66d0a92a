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

//! Bluetooth OBEX client.
//!
//! Sessions to remote OBEX services (OPP, FTP, PBAP, SYNC, MAP): adapter
//! admission, SDP lookup, RFCOMM transport, OBEX CONNECT, then arbitrated
//! transfers with optional agent authorization.

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod obex;
pub mod services;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    AgentFactory, Backend, Client, PendingSession, SessionHandle, SessionId, SessionProperties,
    SessionRequest, SessionSnapshot, SessionState, TransferAgent, TransferId, TransferOutcome,
    TransferSpec, TransferTicket,
};
