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

//! Message Access.

use std::path::Path;

use crate::error::Result;
use crate::session::{SessionHandle, TransferSpec, TransferTicket};

pub const FOLDER_LISTING_TYPE: &str = "x-obex/folder-listing";
pub const MESSAGE_LISTING_TYPE: &str = "x-bt/MAP-msg-listing";
pub const MESSAGE_TYPE: &str = "x-bt/message";
pub const MESSAGE_UPDATE_TYPE: &str = "x-bt/MAP-messageUpdate";

/// Application parameter tag for the message charset.
const CHARSET_TAG: u8 = 0x14;
const CHARSET_UTF8: u8 = 0x01;

/// Application parameters announcing a UTF-8 message body.
pub fn charset_params() -> Vec<u8> {
    vec![CHARSET_TAG, 1, CHARSET_UTF8]
}

/// MAP operations over a connected session.
#[derive(Debug)]
pub struct MessageAccess {
    session: SessionHandle,
}

impl MessageAccess {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// SETPATH to `folder`: `/` for root, `..` for parent.
    pub async fn set_folder(&self, folder: &str) -> Result<()> {
        self.session.set_path(folder).await
    }

    async fn listing(&self, mime_type: &str, name: Option<&str>) -> Result<String> {
        let ticket = self.session.pull(mime_type, name).await?;
        let outcome = ticket.finished().await?;
        Ok(String::from_utf8_lossy(&outcome.buffer).into_owned())
    }

    /// Folders below the current one, as XML.
    pub async fn folder_listing(&self) -> Result<String> {
        self.listing(FOLDER_LISTING_TYPE, None).await
    }

    /// Messages in `folder`, as XML.
    pub async fn message_listing(&self, folder: &str) -> Result<String> {
        self.listing(MESSAGE_LISTING_TYPE, Some(folder)).await
    }

    /// Download message `handle` into the local file `path`.
    pub async fn get_message(
        &self,
        handle: &str,
        path: impl AsRef<Path>,
    ) -> Result<TransferTicket> {
        let spec = TransferSpec::new()
            .mime_type(MESSAGE_TYPE)
            .target_name(handle)
            .filename(path.as_ref());
        self.session.get(spec).await
    }

    /// Ask the server to check for new messages.
    pub async fn update_inbox(&self) -> Result<()> {
        let spec = TransferSpec::new()
            .mime_type(MESSAGE_UPDATE_TYPE)
            .buffer(b"0".to_vec());
        self.session.put(spec).await?.finished().await?;
        Ok(())
    }

    /// Upload the message in `file` to `folder`.
    pub async fn push_message(&self, folder: &str, file: impl AsRef<Path>) -> Result<()> {
        let spec = TransferSpec::new()
            .mime_type(MESSAGE_TYPE)
            .target_name(folder)
            .filename(file.as_ref())
            .app_params(charset_params());
        self.session.put(spec).await?.finished().await?;
        Ok(())
    }
}
