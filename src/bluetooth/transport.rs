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

//! RFCOMM transport connector.

use async_trait::async_trait;
use bluer::rfcomm::{Socket, SocketAddr};
use bluer::Address;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Byte stream carrying an OBEX connection.
pub trait ObexTransport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ObexTransport for T {}

/// Owned transport stream.
pub type BoxedTransport = Box<dyn ObexTransport>;

/// Link security requested for the RFCOMM channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    #[default]
    Low,
    Medium,
    High,
}

impl Security {
    fn level(self) -> bluer::rfcomm::SecurityLevel {
        match self {
            Security::Low => bluer::rfcomm::SecurityLevel::Low,
            Security::Medium => bluer::rfcomm::SecurityLevel::Medium,
            Security::High => bluer::rfcomm::SecurityLevel::High,
        }
    }
}

/// Establishes a reliable stream to a remote RFCOMM channel.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        local: Address,
        remote: Address,
        channel: u8,
        security: Security,
    ) -> Result<BoxedTransport>;
}

/// Connector backed by kernel RFCOMM sockets.
#[derive(Debug, Default, Clone)]
pub struct RfcommConnector;

impl RfcommConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for RfcommConnector {
    async fn connect(
        &self,
        local: Address,
        remote: Address,
        channel: u8,
        security: Security,
    ) -> Result<BoxedTransport> {
        debug!("RFCOMM connect {} -> {} channel {}", local, remote, channel);

        let socket = Socket::new().map_err(|e| Error::Transport(e.to_string()))?;
        socket
            .bind(SocketAddr::new(local, 0))
            .map_err(|e| Error::Transport(e.to_string()))?;
        socket
            .set_security(bluer::rfcomm::Security {
                level: security.level(),
                key_size: 0,
            })
            .map_err(|e| Error::Transport(e.to_string()))?;

        let stream = socket
            .connect(SocketAddr::new(remote, channel))
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        info!("RFCOMM connected to {} on channel {}", remote, channel);
        Ok(Box::new(stream))
    }
}
