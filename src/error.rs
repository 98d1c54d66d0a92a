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

//! Error types for the OBEX client.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using the client [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by sessions, transfers and their collaborators.
///
/// Errors are `Clone` so a single bring-up failure can be delivered to every
/// caller waiting on the same session.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The adapter manager rejected or could not serve a request.
    #[error("Adapter error: {0}")]
    Admission(String),

    /// No usable service record was found on the remote device.
    #[error("{0}")]
    Discovery(String),

    /// Transport could not be established or was lost.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-success OBEX response code.
    #[error("OBEX {operation} failed with 0x{code:02x}")]
    Protocol { operation: &'static str, code: u8 },

    /// Malformed data on the wire.
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// A put-type transfer is already pending on this session.
    #[error("Already connected")]
    AlreadyConnected,

    /// An authorization agent is already assigned.
    #[error("Already exists")]
    AlreadyExists,

    /// Caller does not own the resource it tried to release.
    #[error("Not Authorized")]
    NotAuthorized,

    /// The session has no established OBEX connection.
    #[error("Not connected")]
    NotConnected,

    /// The authorization agent refused the transfer.
    #[error("{0}")]
    Authorization(String),

    /// Operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid arguments in a request.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Resulting folder path does not exist.
    #[error("No such entry")]
    NoSuchEntry,

    /// Request flags were not understood.
    #[error("Bad request")]
    BadRequest,

    /// No driver is registered for the requested service.
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// Session is gone (destroyed, or the client stopped).
    #[error("Session closed")]
    Closed,

    /// I/O error.
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<bluer::Error> for Error {
    fn from(err: bluer::Error) -> Self {
        Error::Admission(err.to_string())
    }
}
