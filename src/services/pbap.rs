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

//! Phone Book Access.

use tracing::debug;

use crate::error::{Error, Result};
use crate::session::SessionHandle;

/// SETPATH flag: enter `new` below the current folder (or go to root).
pub const ENTER: u8 = 0x02;
/// SETPATH flag: go to the parent, then optionally into `new`.
pub const UP: u8 = 0x03;

pub const PHONEBOOK_TYPE: &str = "x-bt/phonebook";
pub const VCARD_LISTING_TYPE: &str = "x-bt/vcard-listing";
pub const VCARD_TYPE: &str = "x-bt/vcard";

const FOLDERS: [&str; 7] = [
    "/",
    "/telecom",
    "/telecom/pb",
    "/telecom/ich",
    "/telecom/och",
    "/telecom/mch",
    "/telecom/cch",
];

fn join(base: &str, child: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        child.trim_start_matches('/')
    )
}

fn parent(folder: &str) -> &str {
    match folder.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((base, _)) => base,
    }
}

/// Resolve a folder change against `current`.
///
/// Fails with [`Error::BadRequest`] for unknown flags and
/// [`Error::NoSuchEntry`] when the result is not a phone book folder.
pub fn set_folder(current: &str, new: &str, flags: u8) -> Result<String> {
    let at_root = current == "/";

    let folder = match flags {
        ENTER if new.is_empty() => "/".to_string(),
        ENTER => join(current, new),
        UP if at_root => "/".to_string(),
        UP if new.is_empty() => parent(current).to_string(),
        UP => join(parent(current), new),
        _ => return Err(Error::BadRequest),
    };

    if FOLDERS.contains(&folder.as_str()) {
        Ok(folder)
    } else {
        Err(Error::NoSuchEntry)
    }
}

/// PBAP operations over a connected session.
#[derive(Debug)]
pub struct PhonebookAccess {
    session: SessionHandle,
    folder: String,
}

impl PhonebookAccess {
    /// Wrap a session; the remote starts at the root folder.
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            folder: "/".to_string(),
        }
    }

    pub fn current_folder(&self) -> &str {
        &self.folder
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Change folder with SETPATH semantics; the local folder only moves
    /// once the remote accepted it.
    pub async fn set_folder(&mut self, new: &str, flags: u8) -> Result<()> {
        let folder = set_folder(&self.folder, new, flags)?;
        self.session.set_path(&folder).await?;
        debug!("Phone book folder {} -> {}", self.folder, folder);
        self.folder = folder;
        Ok(())
    }

    /// Go to an absolute folder such as `/telecom/pb`.
    pub async fn select(&mut self, folder: &str) -> Result<()> {
        self.set_folder("", ENTER).await?;
        if folder.trim_matches('/').is_empty() {
            return Ok(());
        }
        self.set_folder(folder, ENTER).await
    }

    async fn pull(&self, mime_type: &str, name: &str) -> Result<Vec<u8>> {
        let ticket = self.session.pull(mime_type, Some(name)).await?;
        Ok(ticket.finished().await?.buffer)
    }

    /// Download a whole phone book, e.g. `telecom/pb.vcf`.
    pub async fn pull_all(&self, name: &str) -> Result<Vec<u8>> {
        self.pull(PHONEBOOK_TYPE, name).await
    }

    /// List the vCards in a folder of the current one.
    pub async fn list(&self, name: &str) -> Result<Vec<u8>> {
        self.pull(VCARD_LISTING_TYPE, name).await
    }

    /// Fetch a single vCard, e.g. `1.vcf`.
    pub async fn pull_vcard(&self, name: &str) -> Result<Vec<u8>> {
        self.pull(VCARD_TYPE, name).await
    }
}
