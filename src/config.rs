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

//! Configuration module.
//!
//! Handles loading and saving client settings.

use anyhow::{anyhow, Result};
use bluer::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::bluetooth::Security;
use crate::obex::DEFAULT_MTU;

const APP_DIR: &str = "obex-client";

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bluetooth settings.
    #[serde(default)]
    pub bluetooth: BluetoothConfig,

    /// OBEX settings.
    #[serde(default)]
    pub obex: ObexConfig,

    /// Transfer settings.
    #[serde(default)]
    pub transfers: TransferConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Local adapter address; the default adapter is used when unset.
    pub source: Option<String>,

    /// RFCOMM security level: "low", "medium" or "high".
    pub security: Security,
}

impl BluetoothConfig {
    /// Parse the configured source address, if any.
    pub fn source_address(&self) -> Result<Option<Address>> {
        match self.source.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => s
                .parse::<Address>()
                .map(Some)
                .map_err(|e| anyhow!("Invalid source address '{}': {}", s, e)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObexConfig {
    /// Maximum OBEX packet length advertised in CONNECT.
    pub mtu: u16,
}

impl Default for ObexConfig {
    fn default() -> Self {
        Self { mtu: DEFAULT_MTU }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Where pulled objects are written when no output path is given.
    pub download_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_dir: dirs::download_dir()
                .or_else(dirs::data_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_path = config_path();
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&config_path, content)?;
            config
        };

        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path(), content)?;
        Ok(())
    }
}
