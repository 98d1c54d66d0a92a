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

//! Service discovery client.

use async_trait::async_trait;
use bluer::l2cap::{SeqPacket, Socket, SocketAddr};
use bluer::{Address, AddressType};
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info};
use uuid::Uuid;

use super::sdp::{self, ResponseAssembler, SearchProgress, ServiceRecord, SDP_PSM};
use crate::error::{Error, Result};

/// Opens discovery sessions to remote devices.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn open(&self, local: Address, remote: Address) -> Result<Box<dyn DiscoverySession>>;
}

/// An open discovery session.
pub trait DiscoverySession: Send {
    /// Search for records of a service class; the stream ends after the last
    /// record. Dropping the stream closes the session.
    fn search(self: Box<Self>, uuid: Uuid) -> BoxStream<'static, Result<ServiceRecord>>;
}

/// SDP client over an L2CAP sequential packet socket.
#[derive(Debug, Default, Clone)]
pub struct SdpClient;

impl SdpClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceDiscovery for SdpClient {
    async fn open(&self, local: Address, remote: Address) -> Result<Box<dyn DiscoverySession>> {
        debug!("Opening SDP session {} -> {}", local, remote);

        let socket = Socket::new_seq_packet().map_err(discovery_error)?;
        socket
            .bind(SocketAddr::new(local, AddressType::BrEdr, 0))
            .map_err(discovery_error)?;
        let conn = socket
            .connect(SocketAddr::new(remote, AddressType::BrEdr, SDP_PSM))
            .await
            .map_err(discovery_error)?;

        info!("SDP session open to {}", remote);
        Ok(Box::new(SdpSession { conn }))
    }
}

fn discovery_error(err: std::io::Error) -> Error {
    Error::Discovery(format!("SDP: {}", err))
}

struct SdpSession {
    conn: SeqPacket,
}

impl SdpSession {
    async fn query(self, uuid: Uuid) -> Result<Vec<ServiceRecord>> {
        let mtu = self.conn.recv_mtu().map_err(discovery_error)?;
        let mut buf = vec![0u8; mtu.max(48)];
        let mut assembler = ResponseAssembler::new();
        let mut continuation = Vec::new();
        let mut transaction: u16 = 0;

        loop {
            transaction = transaction.wrapping_add(1);
            let request = sdp::search_attr_request(transaction, uuid, &continuation);
            self.conn.send(&request).await.map_err(discovery_error)?;

            let len = self.conn.recv(&mut buf).await.map_err(discovery_error)?;
            match assembler.process_pdu(transaction, &buf[..len])? {
                SearchProgress::Continue(state) => {
                    debug!("SDP response continues ({} byte state)", state.len());
                    continuation = state;
                }
                SearchProgress::Complete(records) => {
                    debug!("SDP search for {} returned {} records", uuid, records.len());
                    return Ok(records);
                }
            }
        }
    }
}

impl DiscoverySession for SdpSession {
    fn search(self: Box<Self>, uuid: Uuid) -> BoxStream<'static, Result<ServiceRecord>> {
        stream::once(self.query(uuid))
            .flat_map(|result| match result {
                Ok(records) => stream::iter(records.into_iter().map(Ok)).boxed(),
                Err(e) => stream::iter(vec![Err(e)]).boxed(),
            })
            .boxed()
    }
}
