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

//! Adapter resolution and admission.

use async_trait::async_trait;
use bluer::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Identity of a resolved local adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterId {
    /// Adapter name, e.g. `hci0`.
    pub name: String,
    /// Adapter address.
    pub address: Address,
}

/// System-level manager that hands out use of local adapters.
#[async_trait]
pub trait AdapterManager: Send + Sync {
    /// Resolve the adapter with the given address, or the default adapter.
    async fn resolve_adapter(&self, source: Option<Address>) -> Result<AdapterId>;

    /// Ask for permission to use the adapter for a new connection.
    async fn request_admission(&self, adapter: &AdapterId) -> Result<()>;

    /// Give back a grant obtained with [`request_admission`](Self::request_admission).
    async fn release_admission(&self, adapter: &AdapterId) -> Result<()>;
}

/// Adapter manager backed by bluetoothd.
///
/// Admission powers the adapter on when needed and counts outstanding
/// grants per adapter.
pub struct BluezAdapterManager {
    session: bluer::Session,
    grants: Mutex<HashMap<String, usize>>,
}

impl BluezAdapterManager {
    /// Create a new manager with its own BlueZ session.
    pub async fn new() -> Result<Self> {
        let session = bluer::Session::new().await?;
        info!("BlueZ session created");
        Ok(Self {
            session,
            grants: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl AdapterManager for BluezAdapterManager {
    async fn resolve_adapter(&self, source: Option<Address>) -> Result<AdapterId> {
        let adapter = match source {
            None => self.session.default_adapter().await?,
            Some(wanted) => {
                let mut found = None;
                for name in self.session.adapter_names().await? {
                    let adapter = self.session.adapter(&name)?;
                    if adapter.address().await? == wanted {
                        found = Some(adapter);
                        break;
                    }
                }
                found.ok_or_else(|| {
                    Error::Admission(format!("No adapter with address {}", wanted))
                })?
            }
        };

        let id = AdapterId {
            name: adapter.name().to_string(),
            address: adapter.address().await?,
        };
        debug!("Resolved adapter {} ({})", id.name, id.address);
        Ok(id)
    }

    async fn request_admission(&self, adapter: &AdapterId) -> Result<()> {
        let handle = self.session.adapter(&adapter.name)?;

        if !handle.is_powered().await? {
            info!("Powering on Bluetooth adapter {}...", adapter.name);
            handle.set_powered(true).await?;
        }

        let mut grants = self.grants.lock();
        *grants.entry(adapter.name.clone()).or_insert(0) += 1;
        debug!("Admission granted on {}", adapter.name);
        Ok(())
    }

    async fn release_admission(&self, adapter: &AdapterId) -> Result<()> {
        let mut grants = self.grants.lock();
        match grants.get_mut(&adapter.name) {
            Some(count) if *count > 0 => {
                *count -= 1;
                debug!("Admission released on {} ({} left)", adapter.name, count);
                Ok(())
            }
            _ => {
                warn!("Release of unknown admission on {}", adapter.name);
                Err(Error::Admission(format!(
                    "No admission held on {}",
                    adapter.name
                )))
            }
        }
    }
}
