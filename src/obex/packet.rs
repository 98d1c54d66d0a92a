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

//! OBEX packet and header encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Protocol version sent in CONNECT (1.0).
pub const OBEX_VERSION: u8 = 0x10;

/// Request opcodes. The high bit marks the final packet of a request.
pub mod opcode {
    pub const CONNECT: u8 = 0x80;
    pub const DISCONNECT: u8 = 0x81;
    pub const PUT: u8 = 0x02;
    pub const PUT_FINAL: u8 = 0x82;
    pub const GET: u8 = 0x03;
    pub const GET_FINAL: u8 = 0x83;
    pub const SETPATH: u8 = 0x85;
    pub const ABORT: u8 = 0xFF;
}

/// Response codes (with the final bit set).
pub mod response {
    pub const CONTINUE: u8 = 0x90;
    pub const SUCCESS: u8 = 0xA0;
    pub const BAD_REQUEST: u8 = 0xC0;
    pub const FORBIDDEN: u8 = 0xC3;
    pub const NOT_FOUND: u8 = 0xC4;
}

/// Header identifiers.
pub mod header_id {
    pub const NAME: u8 = 0x01;
    pub const TYPE: u8 = 0x42;
    pub const LENGTH: u8 = 0xC3;
    pub const TARGET: u8 = 0x46;
    pub const WHO: u8 = 0x4A;
    pub const CONNECTION_ID: u8 = 0xCB;
    pub const APP_PARAMETERS: u8 = 0x4C;
    pub const BODY: u8 = 0x48;
    pub const END_OF_BODY: u8 = 0x49;
}

/// Size of the opcode and length fields.
pub const PACKET_HEADER_LEN: usize = 3;

/// An OBEX header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Name(String),
    Type(String),
    Length(u32),
    Target(Vec<u8>),
    Who(Vec<u8>),
    ConnectionId(u32),
    AppParameters(Vec<u8>),
    Body(Vec<u8>),
    EndOfBody(Vec<u8>),
    /// Any header this client does not interpret.
    Other { id: u8, data: Vec<u8> },
}

impl Header {
    pub fn id(&self) -> u8 {
        match self {
            Header::Name(_) => header_id::NAME,
            Header::Type(_) => header_id::TYPE,
            Header::Length(_) => header_id::LENGTH,
            Header::Target(_) => header_id::TARGET,
            Header::Who(_) => header_id::WHO,
            Header::ConnectionId(_) => header_id::CONNECTION_ID,
            Header::AppParameters(_) => header_id::APP_PARAMETERS,
            Header::Body(_) => header_id::BODY,
            Header::EndOfBody(_) => header_id::END_OF_BODY,
            Header::Other { id, .. } => *id,
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        let id = self.id();
        match self {
            Header::Name(name) => {
                // Empty names are sent without the terminator.
                let mut text = BytesMut::new();
                if !name.is_empty() {
                    for unit in name.encode_utf16() {
                        text.put_u16(unit);
                    }
                    text.put_u16(0);
                }
                put_prefixed(out, id, &text);
            }
            Header::Type(mime) => {
                let mut text = BytesMut::from(mime.as_bytes());
                text.put_u8(0);
                put_prefixed(out, id, &text);
            }
            Header::Length(v) | Header::ConnectionId(v) => {
                out.put_u8(id);
                out.put_u32(*v);
            }
            Header::Target(data)
            | Header::Who(data)
            | Header::AppParameters(data)
            | Header::Body(data)
            | Header::EndOfBody(data) => put_prefixed(out, id, data),
            Header::Other { data, .. } => match id & 0xC0 {
                0x80 => {
                    out.put_u8(id);
                    out.put_u8(data.first().copied().unwrap_or(0));
                }
                0xC0 => {
                    out.put_u8(id);
                    let mut word = [0u8; 4];
                    let n = data.len().min(4);
                    word[..n].copy_from_slice(&data[..n]);
                    out.put_slice(&word);
                }
                _ => put_prefixed(out, id, data),
            },
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        need(buf, 1)?;
        let id = buf.get_u8();

        match id & 0xC0 {
            0x80 => {
                need(buf, 1)?;
                Ok(Header::Other {
                    id,
                    data: vec![buf.get_u8()],
                })
            }
            0xC0 => {
                need(buf, 4)?;
                let value = buf.get_u32();
                Ok(match id {
                    header_id::LENGTH => Header::Length(value),
                    header_id::CONNECTION_ID => Header::ConnectionId(value),
                    _ => Header::Other {
                        id,
                        data: value.to_be_bytes().to_vec(),
                    },
                })
            }
            _ => {
                need(buf, 2)?;
                let len = buf.get_u16() as usize;
                if len < PACKET_HEADER_LEN {
                    return Err(Error::InvalidPacket(format!(
                        "Header 0x{:02x} with length {}",
                        id, len
                    )));
                }
                let len = len - PACKET_HEADER_LEN;
                need(buf, len)?;
                let data = buf[..len].to_vec();
                buf.advance(len);

                Ok(match id {
                    header_id::NAME => Header::Name(decode_unicode(&data)?),
                    header_id::TYPE => {
                        let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
                        Header::Type(String::from_utf8_lossy(&data[..end]).into_owned())
                    }
                    header_id::TARGET => Header::Target(data),
                    header_id::WHO => Header::Who(data),
                    header_id::APP_PARAMETERS => Header::AppParameters(data),
                    header_id::BODY => Header::Body(data),
                    header_id::END_OF_BODY => Header::EndOfBody(data),
                    _ => Header::Other { id, data },
                })
            }
        }
    }
}

fn put_prefixed(out: &mut BytesMut, id: u8, data: &[u8]) {
    out.put_u8(id);
    out.put_u16((data.len() + PACKET_HEADER_LEN) as u16);
    out.put_slice(data);
}

fn decode_unicode(data: &[u8]) -> Result<String> {
    if data.len() % 2 != 0 {
        return Err(Error::InvalidPacket("Odd length unicode header".to_string()));
    }
    let units: Vec<u16> = data
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16(&units).map_err(|e| Error::InvalidPacket(e.to_string()))
}

fn need(buf: &[u8], len: usize) -> Result<()> {
    if buf.len() < len {
        return Err(Error::InvalidPacket(format!(
            "Truncated OBEX data: need {} bytes, have {}",
            len,
            buf.len()
        )));
    }
    Ok(())
}

/// A request or response packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Opcode for requests, response code for responses.
    pub code: u8,
    /// Fixed fields between the length and the headers (CONNECT, SETPATH).
    pub prefix: Vec<u8>,
    pub headers: Vec<Header>,
}

impl Packet {
    pub fn new(code: u8) -> Self {
        Self {
            code,
            prefix: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    /// Build a CONNECT request advertising `mtu`.
    pub fn connect(mtu: u16, target: Option<&[u8]>) -> Self {
        let [hi, lo] = mtu.to_be_bytes();
        let packet = Self::new(opcode::CONNECT).with_prefix(&[OBEX_VERSION, 0x00, hi, lo]);
        match target {
            Some(target) => packet.header(Header::Target(target.to_vec())),
            None => packet,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == response::SUCCESS
    }

    pub fn find(&self, id: u8) -> Option<&Header> {
        self.headers.iter().find(|h| h.id() == id)
    }

    pub fn connection_id(&self) -> Option<u32> {
        match self.find(header_id::CONNECTION_ID) {
            Some(Header::ConnectionId(id)) => Some(*id),
            _ => None,
        }
    }

    /// Body bytes carried by this packet, from Body or End-of-Body.
    pub fn body(&self) -> Option<&[u8]> {
        self.headers.iter().find_map(|h| match h {
            Header::Body(data) | Header::EndOfBody(data) => Some(data.as_slice()),
            _ => None,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut headers = BytesMut::new();
        for header in &self.headers {
            header.encode(&mut headers);
        }

        let total = PACKET_HEADER_LEN + self.prefix.len() + headers.len();
        let mut out = BytesMut::with_capacity(total);
        out.put_u8(self.code);
        out.put_u16(total as u16);
        out.put_slice(&self.prefix);
        out.put_slice(&headers);
        out.freeze()
    }

    /// Decode a complete packet whose fixed prefix is `prefix_len` bytes.
    pub fn decode(data: &[u8], prefix_len: usize) -> Result<Self> {
        let mut buf = data;
        need(buf, PACKET_HEADER_LEN)?;
        let code = buf.get_u8();
        let len = buf.get_u16() as usize;
        if len != data.len() {
            return Err(Error::InvalidPacket(format!(
                "Packet length {} does not match {} received bytes",
                len,
                data.len()
            )));
        }

        need(buf, prefix_len)?;
        let prefix = buf[..prefix_len].to_vec();
        buf.advance(prefix_len);

        let mut headers = Vec::new();
        while !buf.is_empty() {
            headers.push(Header::decode(&mut buf)?);
        }

        Ok(Self {
            code,
            prefix,
            headers,
        })
    }
}
