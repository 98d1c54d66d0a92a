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

//! OBEX framing and the engine sessions drive.

pub mod engine;
pub mod packet;

pub use engine::{
    EngineFactory, ObexEngine, ObjectRequest, Progress, StreamEngine, StreamEngineFactory,
};
pub use packet::{Header, Packet};

/// Default maximum packet length advertised in CONNECT.
pub const DEFAULT_MTU: u16 = 4096;

/// Smallest packet length OBEX allows.
pub const MIN_MTU: u16 = 255;
