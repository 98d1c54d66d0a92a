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

//! Bluetooth collaborators used by sessions.
//!
//! Adapter admission via bluetoothd, SDP service discovery over L2CAP and
//! RFCOMM stream setup.

pub mod adapter;
pub mod discovery;
pub mod sdp;
pub mod transport;

pub use adapter::{AdapterId, AdapterManager, BluezAdapterManager};
pub use discovery::{DiscoverySession, SdpClient, ServiceDiscovery};
pub use sdp::{DataElement, ServiceRecord};
pub use transport::{BoxedTransport, ObexTransport, RfcommConnector, Security, TransportConnector};
