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

//! OBEX client engine.
//!
//! Drives CONNECT, SETPATH, GET, PUT and DISCONNECT exchanges over a byte
//! stream. One exchange is in flight at a time; concurrent callers queue on
//! the stream lock.
//!
//! A caller may be dropped in the middle of an exchange. The next holder of
//! the lock first reads whatever response is still due and sends ABORT if
//! the remote is left with an open GET or PUT, so a cancelled transfer never
//! leaks its replies into later operations.

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::MutexGuard;
use tracing::{debug, info, warn};

use super::packet::{opcode, response, Header, Packet, PACKET_HEADER_LEN};
use super::{DEFAULT_MTU, MIN_MTU};
use crate::bluetooth::BoxedTransport;
use crate::error::{Error, Result};

/// SETPATH flag: go to the parent folder first.
const SETPATH_BACKUP: u8 = 0x01;
/// SETPATH flag: do not create missing folders.
const SETPATH_NO_CREATE: u8 = 0x02;

/// Packet and Body header overhead around each body chunk.
const BODY_OVERHEAD: usize = PACKET_HEADER_LEN + 3;

/// Progress callback, called with the cumulative byte count.
pub type Progress<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Object description for GET and PUT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectRequest {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub app_params: Option<Vec<u8>>,
}

impl ObjectRequest {
    fn headers(&self) -> Vec<Header> {
        let mut headers = Vec::new();
        if let Some(mime) = &self.mime_type {
            headers.push(Header::Type(mime.clone()));
        }
        if let Some(name) = &self.name {
            headers.push(Header::Name(name.clone()));
        }
        if let Some(params) = &self.app_params {
            headers.push(Header::AppParameters(params.clone()));
        }
        headers
    }
}

/// Operations a session performs on an OBEX connection.
#[async_trait]
pub trait ObexEngine: Send + Sync {
    /// CONNECT, with a Target header when `target` is given.
    async fn connect(&self, target: Option<&[u8]>) -> Result<()>;

    /// Change the remote current folder.
    async fn set_path(&self, folder: &str) -> Result<()>;

    /// Fetch an object and return its body.
    async fn get(&self, request: &ObjectRequest, progress: Progress<'_>) -> Result<Vec<u8>>;

    /// Send an object.
    async fn put(&self, request: &ObjectRequest, body: &[u8], progress: Progress<'_>)
        -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Settle an operation whose caller was dropped mid-exchange.
    async fn abort(&self) -> Result<()> {
        Ok(())
    }
}

/// Wraps an established transport in an engine.
pub trait EngineFactory: Send + Sync {
    fn wrap(&self, transport: BoxedTransport) -> Arc<dyn ObexEngine>;
}

#[derive(Debug, Clone, Copy)]
struct LinkState {
    connection_id: Option<u32>,
    peer_mtu: u16,
}

/// Transport plus what is known about the exchange running on it.
struct Channel {
    transport: BoxedTransport,
    inbox: BytesMut,
    /// A request write started and did not finish.
    writing: bool,
    /// A request went out and its response is still unread.
    awaiting: bool,
    /// The last response was CONTINUE, so the remote holds an open operation.
    open: bool,
    /// Framing is lost and the connection is unusable.
    broken: bool,
}

impl Channel {
    fn new(transport: BoxedTransport) -> Self {
        Self {
            transport,
            inbox: BytesMut::with_capacity(PACKET_HEADER_LEN),
            writing: false,
            awaiting: false,
            open: false,
            broken: false,
        }
    }

    async fn exchange(&mut self, request: &Packet, prefix_len: usize) -> Result<Packet> {
        self.send(request).await?;
        let frame = self.read_frame().await?;
        Packet::decode(&frame, prefix_len)
    }

    async fn send(&mut self, request: &Packet) -> Result<()> {
        self.writing = true;
        self.transport.write_all(&request.encode()).await?;
        self.transport.flush().await?;
        self.writing = false;
        self.awaiting = true;
        Ok(())
    }

    /// Read one response frame. Bytes already received survive a dropped
    /// call, so a later read picks up where this one stopped.
    async fn read_frame(&mut self) -> Result<BytesMut> {
        loop {
            if self.inbox.len() >= PACKET_HEADER_LEN {
                let len = u16::from_be_bytes([self.inbox[1], self.inbox[2]]) as usize;
                if len < PACKET_HEADER_LEN {
                    self.broken = true;
                    return Err(Error::InvalidPacket(format!("Response length {}", len)));
                }
                if self.inbox.len() >= len {
                    let frame = self.inbox.split_to(len);
                    self.awaiting = false;
                    self.open = frame[0] == response::CONTINUE;
                    return Ok(frame);
                }
            }

            if self.transport.read_buf(&mut self.inbox).await? == 0 {
                self.broken = true;
                return Err(Error::Transport("Connection closed by remote".to_string()));
            }
        }
    }

    /// Resynchronise after an interrupted exchange: drop the response still
    /// due, then ABORT any operation the remote keeps open.
    async fn recover(&mut self, abort: Packet) -> Result<()> {
        if self.writing {
            warn!("OBEX request was cut off mid-write");
            self.broken = true;
        }
        if self.broken {
            return Err(Error::Transport("OBEX stream out of sync".to_string()));
        }

        if self.awaiting {
            let stale = self.read_frame().await?;
            debug!("Discarded stale response 0x{:02x}", stale[0]);
        }
        if self.open {
            let reply = self.exchange(&abort, 0).await?;
            debug!("ABORT answered with 0x{:02x}", reply.code);
        }
        Ok(())
    }
}

/// Engine speaking OBEX over any async byte stream.
pub struct StreamEngine {
    channel: tokio::sync::Mutex<Channel>,
    link: Mutex<LinkState>,
    mtu: u16,
}

impl StreamEngine {
    pub fn new(transport: BoxedTransport, mtu: u16) -> Self {
        Self {
            channel: tokio::sync::Mutex::new(Channel::new(transport)),
            link: Mutex::new(LinkState {
                connection_id: None,
                peer_mtu: MIN_MTU,
            }),
            mtu: mtu.max(MIN_MTU),
        }
    }

    /// Packet length the remote accepts, known after CONNECT.
    pub fn peer_mtu(&self) -> u16 {
        self.link.lock().peer_mtu
    }

    pub fn connection_id(&self) -> Option<u32> {
        self.link.lock().connection_id
    }

    fn with_connection_id(&self, packet: Packet) -> Packet {
        match self.connection_id() {
            Some(id) => packet.header(Header::ConnectionId(id)),
            None => packet,
        }
    }

    /// Take the stream, settling whatever a dropped caller left behind.
    async fn channel(&self) -> Result<MutexGuard<'_, Channel>> {
        let mut channel = self.channel.lock().await;
        let abort = self.with_connection_id(Packet::new(opcode::ABORT));
        channel.recover(abort).await?;
        Ok(channel)
    }
}

#[async_trait]
impl ObexEngine for StreamEngine {
    async fn connect(&self, target: Option<&[u8]>) -> Result<()> {
        let mut channel = self.channel().await?;
        let reply = channel.exchange(&Packet::connect(self.mtu, target), 4).await?;

        if !reply.is_success() {
            return Err(Error::Protocol {
                operation: "Connect",
                code: reply.code,
            });
        }

        let peer_mtu = match reply.prefix.as_slice() {
            [_, _, hi, lo] => u16::from_be_bytes([*hi, *lo]).max(MIN_MTU),
            _ => MIN_MTU,
        };

        let mut link = self.link.lock();
        link.peer_mtu = peer_mtu;
        link.connection_id = reply.connection_id();
        info!(
            "OBEX connected (peer mtu {}, connection id {:?})",
            peer_mtu, link.connection_id
        );
        Ok(())
    }

    async fn set_path(&self, folder: &str) -> Result<()> {
        let mut steps: Vec<(u8, Option<&str>)> = Vec::new();
        match folder {
            "/" => steps.push((SETPATH_NO_CREATE, Some(""))),
            ".." => steps.push((SETPATH_BACKUP | SETPATH_NO_CREATE, None)),
            _ => {
                if folder.starts_with('/') {
                    steps.push((SETPATH_NO_CREATE, Some("")));
                }
                for component in folder.split('/').filter(|c| !c.is_empty()) {
                    if component == ".." {
                        steps.push((SETPATH_BACKUP | SETPATH_NO_CREATE, None));
                    } else {
                        steps.push((SETPATH_NO_CREATE, Some(component)));
                    }
                }
            }
        }

        let mut channel = self.channel().await?;
        for (flags, name) in steps {
            debug!("SETPATH flags 0x{:02x} name {:?}", flags, name);
            let mut packet = self.with_connection_id(
                Packet::new(opcode::SETPATH).with_prefix(&[flags, 0x00]),
            );
            if let Some(name) = name {
                packet = packet.header(Header::Name(name.to_string()));
            }

            let reply = channel.exchange(&packet, 0).await?;
            if !reply.is_success() {
                return Err(Error::Protocol {
                    operation: "SetPath",
                    code: reply.code,
                });
            }
        }
        Ok(())
    }

    async fn get(&self, request: &ObjectRequest, progress: Progress<'_>) -> Result<Vec<u8>> {
        let mut channel = self.channel().await?;
        let mut packet = self.with_connection_id(Packet::new(opcode::GET_FINAL));
        packet.headers.extend(request.headers());

        let mut body = Vec::new();
        loop {
            let reply = channel.exchange(&packet, 0).await?;
            if let Some(data) = reply.body() {
                body.extend_from_slice(data);
                progress(body.len() as u64);
            }

            match reply.code {
                response::CONTINUE => {
                    packet = self.with_connection_id(Packet::new(opcode::GET_FINAL));
                }
                response::SUCCESS => {
                    debug!("GET complete, {} bytes", body.len());
                    return Ok(body);
                }
                code => {
                    return Err(Error::Protocol {
                        operation: "Get",
                        code,
                    })
                }
            }
        }
    }

    async fn put(
        &self,
        request: &ObjectRequest,
        body: &[u8],
        progress: Progress<'_>,
    ) -> Result<()> {
        let mut channel = self.channel().await?;
        let chunk = (self.peer_mtu() as usize).saturating_sub(BODY_OVERHEAD).max(1);

        let mut packet = self.with_connection_id(Packet::new(opcode::PUT));
        packet.headers.extend(request.headers());
        packet.headers.push(Header::Length(body.len() as u32));

        let reply = channel.exchange(&packet, 0).await?;
        if reply.code != response::CONTINUE {
            return Err(Error::Protocol {
                operation: "Put",
                code: reply.code,
            });
        }

        let mut offset = 0;
        loop {
            let end = (offset + chunk).min(body.len());
            let last = end == body.len();
            let data = body[offset..end].to_vec();
            let packet = if last {
                Packet::new(opcode::PUT_FINAL).header(Header::EndOfBody(data))
            } else {
                Packet::new(opcode::PUT).header(Header::Body(data))
            };

            let reply = channel.exchange(&packet, 0).await?;
            let expected = if last {
                response::SUCCESS
            } else {
                response::CONTINUE
            };
            if reply.code != expected {
                return Err(Error::Protocol {
                    operation: "Put",
                    code: reply.code,
                });
            }

            offset = end;
            progress(offset as u64);
            if last {
                debug!("PUT complete, {} bytes", body.len());
                return Ok(());
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let packet = self.with_connection_id(Packet::new(opcode::DISCONNECT));
        let reply: Result<Packet> = async {
            let mut channel = self.channel().await?;
            channel.exchange(&packet, 0).await
        }
        .await;
        self.link.lock().connection_id = None;

        let reply = reply?;
        if !reply.is_success() {
            return Err(Error::Protocol {
                operation: "Disconnect",
                code: reply.code,
            });
        }
        debug!("OBEX disconnected");
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        self.channel().await.map(|_| ())
    }
}

/// Factory for [`StreamEngine`]s advertising a fixed MTU.
#[derive(Debug, Clone, Copy)]
pub struct StreamEngineFactory {
    mtu: u16,
}

impl StreamEngineFactory {
    pub fn new(mtu: u16) -> Self {
        Self { mtu }
    }
}

impl Default for StreamEngineFactory {
    fn default() -> Self {
        Self::new(DEFAULT_MTU)
    }
}

impl EngineFactory for StreamEngineFactory {
    fn wrap(&self, transport: BoxedTransport) -> Arc<dyn ObexEngine> {
        Arc::new(StreamEngine::new(transport, self.mtu))
    }
}
