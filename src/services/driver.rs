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

//! Service drivers.
//!
//! A driver names an OBEX service, gives its SDP UUID and CONNECT target,
//! and gets a hook when a session is exposed and when it is torn down.

use bluer::Address;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::session::SessionId;

/// What a driver sees of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    /// Exposed path.
    pub path: String,
    pub destination: Address,
    pub service: String,
    pub channel: Option<u8>,
}

/// Definition of one supported service.
pub trait ServiceDriver: Send + Sync {
    /// Short name used in session requests, e.g. `"opp"`.
    fn service(&self) -> &str;

    /// 128-bit SDP service class UUID in string form.
    fn uuid(&self) -> &str;

    /// Target header sent with CONNECT, if the service uses one.
    fn target(&self) -> Option<&[u8]> {
        None
    }

    /// Called once when a session is exposed. An error aborts exposure.
    fn probe(&self, _session: &SessionInfo) -> Result<()> {
        Ok(())
    }

    /// Called once when an exposed session is torn down.
    fn remove(&self, _session: &SessionInfo) {}
}

/// A driver with no hooks.
#[derive(Debug, Clone, Copy)]
pub struct StaticDriver {
    pub service: &'static str,
    pub uuid: &'static str,
    pub target: Option<&'static [u8]>,
}

const FTP_TARGET: [u8; 16] = [
    0xF9, 0xEC, 0x7B, 0xC4, 0x95, 0x3C, 0x11, 0xD2, 0x98, 0x4E, 0x52, 0x54, 0x00, 0xDC, 0x9E, 0x09,
];
const PBAP_TARGET: [u8; 16] = [
    0x79, 0x61, 0x35, 0xF0, 0xF0, 0xC5, 0x11, 0xD8, 0x09, 0x66, 0x08, 0x00, 0x20, 0x0C, 0x9A, 0x66,
];
const MAP_TARGET: [u8; 16] = [
    0xBB, 0x58, 0x2B, 0x40, 0x42, 0x0C, 0x11, 0xDB, 0xB0, 0xDE, 0x08, 0x00, 0x20, 0x0C, 0x9A, 0x66,
];

impl StaticDriver {
    pub const OPP: StaticDriver = StaticDriver {
        service: "opp",
        uuid: "00001105-0000-1000-8000-00805f9b34fb",
        target: None,
    };

    pub const FTP: StaticDriver = StaticDriver {
        service: "ftp",
        uuid: "00001106-0000-1000-8000-00805f9b34fb",
        target: Some(&FTP_TARGET),
    };

    pub const PBAP: StaticDriver = StaticDriver {
        service: "pbap",
        uuid: "0000112f-0000-1000-8000-00805f9b34fb",
        target: Some(&PBAP_TARGET),
    };

    pub const SYNC: StaticDriver = StaticDriver {
        service: "sync",
        uuid: "00001104-0000-1000-8000-00805f9b34fb",
        target: Some(b"IRMC-SYNC"),
    };

    pub const MAP: StaticDriver = StaticDriver {
        service: "map",
        uuid: "00001132-0000-1000-8000-00805f9b34fb",
        target: Some(&MAP_TARGET),
    };
}

impl ServiceDriver for StaticDriver {
    fn service(&self) -> &str {
        self.service
    }

    fn uuid(&self) -> &str {
        self.uuid
    }

    fn target(&self) -> Option<&[u8]> {
        self.target
    }

    fn probe(&self, session: &SessionInfo) -> Result<()> {
        debug!("{}: {} exposed at {}", session.id, self.service, session.path);
        Ok(())
    }
}

/// Registered service drivers.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<Vec<Arc<dyn ServiceDriver>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding OPP, FTP, PBAP, SYNC and MAP.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for driver in [
            StaticDriver::OPP,
            StaticDriver::FTP,
            StaticDriver::PBAP,
            StaticDriver::SYNC,
            StaticDriver::MAP,
        ] {
            registry.drivers.write().push(Arc::new(driver));
        }
        registry
    }

    /// Add a driver. Service names must be unique, ignoring case.
    pub fn register(&self, driver: Arc<dyn ServiceDriver>) -> Result<()> {
        let mut drivers = self.drivers.write();
        if drivers
            .iter()
            .any(|d| d.service().eq_ignore_ascii_case(driver.service()))
        {
            return Err(Error::AlreadyExists);
        }
        info!("Registered driver {}", driver.service());
        drivers.push(driver);
        Ok(())
    }

    /// Remove the driver for `service`; returns whether one was found.
    pub fn unregister(&self, service: &str) -> bool {
        let mut drivers = self.drivers.write();
        let before = drivers.len();
        drivers.retain(|d| !d.service().eq_ignore_ascii_case(service));
        before != drivers.len()
    }

    pub fn find(&self, service: &str) -> Option<Arc<dyn ServiceDriver>> {
        self.drivers
            .read()
            .iter()
            .find(|d| d.service().eq_ignore_ascii_case(service))
            .cloned()
    }

    pub fn services(&self) -> Vec<String> {
        self.drivers
            .read()
            .iter()
            .map(|d| d.service().to_string())
            .collect()
    }
}
