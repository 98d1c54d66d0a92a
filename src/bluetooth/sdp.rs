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

//! SDP data elements and PDUs.
//!
//! Only what a client needs to run a ServiceSearchAttributeRequest and pull
//! the RFCOMM channel out of the returned records.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// L2CAP PSM of the SDP server.
pub const SDP_PSM: u16 = 1;

pub const PDU_ERROR_RESPONSE: u8 = 0x01;
pub const PDU_SEARCH_ATTR_REQUEST: u8 = 0x06;
pub const PDU_SEARCH_ATTR_RESPONSE: u8 = 0x07;

/// ProtocolDescriptorList attribute.
pub const ATTR_PROTOCOL_DESCRIPTOR_LIST: u16 = 0x0004;

pub const L2CAP_UUID: u16 = 0x0100;
pub const RFCOMM_UUID: u16 = 0x0003;

/// Continuation state is at most 16 bytes.
const MAX_CONTINUATION: usize = 16;

/// Bluetooth base UUID, 0000xxxx-0000-1000-8000-00805F9B34FB.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// A single SDP data element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataElement {
    Nil,
    /// Unsigned integer with its width in bytes.
    Unsigned { width: u8, value: u128 },
    /// Signed integer with its width in bytes.
    Signed { width: u8, value: i128 },
    Uuid16(u16),
    Uuid32(u32),
    Uuid128(Uuid),
    Text(Vec<u8>),
    Bool(bool),
    Sequence(Vec<DataElement>),
    Alternative(Vec<DataElement>),
    Url(Vec<u8>),
}

impl DataElement {
    pub fn uint8(value: u8) -> Self {
        Self::Unsigned {
            width: 1,
            value: value as u128,
        }
    }

    pub fn uint16(value: u16) -> Self {
        Self::Unsigned {
            width: 2,
            value: value as u128,
        }
    }

    pub fn uint32(value: u32) -> Self {
        Self::Unsigned {
            width: 4,
            value: value as u128,
        }
    }

    /// Short form of a UUID, if it is based on the Bluetooth base UUID.
    pub fn as_uuid16(&self) -> Option<u16> {
        match self {
            Self::Uuid16(v) => Some(*v),
            Self::Uuid32(v) => u16::try_from(*v).ok(),
            Self::Uuid128(uuid) => {
                let raw = uuid.as_u128();
                let short = (raw >> 96) as u32;
                if raw & ((1u128 << 96) - 1) == BASE_UUID && short <= u16::MAX as u32 {
                    Some(short as u16)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u128> {
        match self {
            Self::Unsigned { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[DataElement]> {
        match self {
            Self::Sequence(items) | Self::Alternative(items) => Some(items),
            _ => None,
        }
    }

    /// Parse one element from the front of `buf`.
    pub fn parse(buf: &mut &[u8]) -> Result<Self> {
        need(buf, 1)?;
        let descriptor = buf.get_u8();
        let kind = descriptor >> 3;
        let size_index = descriptor & 0x07;

        let len = match size_index {
            0..=4 if kind == 0 => 0,
            0..=4 => 1usize << size_index,
            5 => {
                need(buf, 1)?;
                buf.get_u8() as usize
            }
            6 => {
                need(buf, 2)?;
                buf.get_u16() as usize
            }
            _ => {
                need(buf, 4)?;
                buf.get_u32() as usize
            }
        };
        need(buf, len)?;
        let data: &[u8] = buf;
        let (mut body, rest) = data.split_at(len);
        *buf = rest;

        let element = match kind {
            0 => Self::Nil,
            1 => Self::Unsigned {
                width: len as u8,
                value: read_uint(body, len)?,
            },
            2 => {
                if len == 0 {
                    return Err(Error::InvalidPacket("Empty signed integer".to_string()));
                }
                let raw = read_uint(body, len)?;
                let shift = 128 - 8 * len as u32;
                Self::Signed {
                    width: len as u8,
                    value: ((raw << shift) as i128) >> shift,
                }
            }
            3 => match len {
                2 => Self::Uuid16(body.get_u16()),
                4 => Self::Uuid32(body.get_u32()),
                16 => Self::Uuid128(Uuid::from_u128(body.get_u128())),
                _ => return Err(Error::InvalidPacket(format!("UUID of {} bytes", len))),
            },
            4 => Self::Text(body.to_vec()),
            5 => Self::Bool(body.first().copied().unwrap_or(0) != 0),
            6 | 7 => {
                let mut items = Vec::new();
                while !body.is_empty() {
                    items.push(Self::parse(&mut body)?);
                }
                if kind == 6 {
                    Self::Sequence(items)
                } else {
                    Self::Alternative(items)
                }
            }
            8 => Self::Url(body.to_vec()),
            _ => {
                return Err(Error::InvalidPacket(format!(
                    "Unknown data element type {}",
                    kind
                )))
            }
        };

        Ok(element)
    }

    /// Append the encoded element to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::Nil => out.put_u8(0),
            Self::Unsigned { width, value } => {
                out.put_u8((1 << 3) | fixed_size_index(*width));
                put_uint(out, *value, *width);
            }
            Self::Signed { width, value } => {
                out.put_u8((2 << 3) | fixed_size_index(*width));
                put_uint(out, *value as u128, *width);
            }
            Self::Uuid16(v) => {
                out.put_u8((3 << 3) | 1);
                out.put_u16(*v);
            }
            Self::Uuid32(v) => {
                out.put_u8((3 << 3) | 2);
                out.put_u32(*v);
            }
            Self::Uuid128(uuid) => {
                out.put_u8((3 << 3) | 4);
                out.put_u128(uuid.as_u128());
            }
            Self::Bool(v) => {
                out.put_u8(5 << 3);
                out.put_u8(*v as u8);
            }
            Self::Text(bytes) => put_variable(out, 4, bytes),
            Self::Url(bytes) => put_variable(out, 8, bytes),
            Self::Sequence(items) | Self::Alternative(items) => {
                let kind = if matches!(self, Self::Sequence(_)) { 6 } else { 7 };
                let mut inner = BytesMut::new();
                for item in items {
                    item.encode(&mut inner);
                }
                put_variable(out, kind, &inner);
            }
        }
    }
}

fn need(buf: &[u8], len: usize) -> Result<()> {
    if buf.remaining() < len {
        return Err(Error::InvalidPacket(format!(
            "Truncated SDP data: need {} bytes, have {}",
            len,
            buf.remaining()
        )));
    }
    Ok(())
}

fn read_uint(mut body: &[u8], len: usize) -> Result<u128> {
    if len > 16 {
        return Err(Error::InvalidPacket(format!("Integer of {} bytes", len)));
    }
    let mut value = 0u128;
    for _ in 0..len {
        value = (value << 8) | body.get_u8() as u128;
    }
    Ok(value)
}

fn fixed_size_index(width: u8) -> u8 {
    match width {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => 4,
    }
}

fn put_uint(out: &mut BytesMut, value: u128, width: u8) {
    let width = 1usize << fixed_size_index(width);
    let bytes = value.to_be_bytes();
    out.put_slice(&bytes[16 - width..]);
}

fn put_variable(out: &mut BytesMut, kind: u8, body: &[u8]) {
    if body.len() <= u8::MAX as usize {
        out.put_u8((kind << 3) | 5);
        out.put_u8(body.len() as u8);
    } else if body.len() <= u16::MAX as usize {
        out.put_u8((kind << 3) | 6);
        out.put_u16(body.len() as u16);
    } else {
        out.put_u8((kind << 3) | 7);
        out.put_u32(body.len() as u32);
    }
    out.put_slice(body);
}

/// One service record: attribute id to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    pub attributes: BTreeMap<u16, DataElement>,
}

impl ServiceRecord {
    /// Build a record from an attribute list sequence (id, value, id, value...).
    pub fn from_element(element: &DataElement) -> Result<Self> {
        let items = match element {
            DataElement::Sequence(items) => items,
            other => {
                return Err(Error::InvalidPacket(format!(
                    "Attribute list is not a sequence: {:?}",
                    other
                )))
            }
        };

        let mut attributes = BTreeMap::new();
        for pair in items.chunks(2) {
            match pair {
                [DataElement::Unsigned { width: 2, value }, value_element] => {
                    attributes.insert(*value as u16, value_element.clone());
                }
                _ => return Err(Error::InvalidPacket("Malformed attribute pair".to_string())),
            }
        }

        Ok(Self { attributes })
    }

    /// The RFCOMM channel advertised in the ProtocolDescriptorList, if any.
    pub fn rfcomm_channel(&self) -> Option<u8> {
        let list = self.attributes.get(&ATTR_PROTOCOL_DESCRIPTOR_LIST)?;
        find_rfcomm(list)
    }
}

fn find_rfcomm(list: &DataElement) -> Option<u8> {
    for descriptor in list.as_sequence()? {
        let items = match descriptor.as_sequence() {
            Some(items) => items,
            None => continue,
        };

        // Alternatives nest one more level of descriptor lists.
        if matches!(descriptor, DataElement::Alternative(_))
            || items.first().and_then(DataElement::as_sequence).is_some()
        {
            if let Some(channel) = find_rfcomm(descriptor) {
                return Some(channel);
            }
            continue;
        }

        if items.first().and_then(DataElement::as_uuid16) == Some(RFCOMM_UUID) {
            if let Some(DataElement::Unsigned { width: 1, value }) = items.get(1) {
                return Some(*value as u8);
            }
        }
    }
    None
}

/// Build a ServiceSearchAttributeRequest for one 128-bit service UUID and the
/// full attribute range.
pub fn search_attr_request(transaction: u16, uuid: Uuid, continuation: &[u8]) -> Bytes {
    let mut params = BytesMut::new();
    DataElement::Sequence(vec![DataElement::Uuid128(uuid)]).encode(&mut params);
    params.put_u16(0xFFFF);
    DataElement::Sequence(vec![DataElement::uint32(0x0000_FFFF)]).encode(&mut params);
    params.put_u8(continuation.len() as u8);
    params.put_slice(continuation);

    let mut pdu = BytesMut::with_capacity(5 + params.len());
    pdu.put_u8(PDU_SEARCH_ATTR_REQUEST);
    pdu.put_u16(transaction);
    pdu.put_u16(params.len() as u16);
    pdu.put_slice(&params);
    pdu.freeze()
}

/// Outcome of feeding one response PDU to a [`ResponseAssembler`].
#[derive(Debug, PartialEq, Eq)]
pub enum SearchProgress {
    /// More data is pending; resend the request with this continuation state.
    Continue(Vec<u8>),
    /// All attribute lists were received.
    Complete(Vec<ServiceRecord>),
}

/// Accumulates attribute list fragments across continuation responses.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    buffer: BytesMut,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one response PDU for the request with `transaction`.
    pub fn process_pdu(&mut self, transaction: u16, mut pdu: &[u8]) -> Result<SearchProgress> {
        need(pdu, 5)?;
        let id = pdu.get_u8();
        let tid = pdu.get_u16();
        let param_len = pdu.get_u16() as usize;
        need(pdu, param_len)?;

        if tid != transaction {
            return Err(Error::InvalidPacket(format!(
                "Transaction id mismatch: expected {}, got {}",
                transaction, tid
            )));
        }

        match id {
            PDU_SEARCH_ATTR_RESPONSE => {}
            PDU_ERROR_RESPONSE => {
                let code = if pdu.remaining() >= 2 { pdu.get_u16() } else { 0 };
                return Err(Error::Discovery(format!(
                    "SDP error response 0x{:04x}",
                    code
                )));
            }
            other => {
                return Err(Error::InvalidPacket(format!(
                    "Unexpected SDP PDU 0x{:02x}",
                    other
                )))
            }
        }

        need(pdu, 2)?;
        let count = pdu.get_u16() as usize;
        need(pdu, count + 1)?;
        self.buffer.put_slice(&pdu[..count]);
        pdu.advance(count);

        let cont_len = pdu.get_u8() as usize;
        if cont_len > MAX_CONTINUATION {
            return Err(Error::InvalidPacket(format!(
                "Continuation state of {} bytes",
                cont_len
            )));
        }
        need(pdu, cont_len)?;
        if cont_len > 0 {
            return Ok(SearchProgress::Continue(pdu[..cont_len].to_vec()));
        }

        let mut lists: &[u8] = &self.buffer;
        let element = DataElement::parse(&mut lists)?;
        let records = element
            .as_sequence()
            .ok_or_else(|| Error::InvalidPacket("Attribute lists are not a sequence".to_string()))?
            .iter()
            .map(ServiceRecord::from_element)
            .collect::<Result<Vec<_>>>()?;

        self.buffer.clear();
        Ok(SearchProgress::Complete(records))
    }
}
