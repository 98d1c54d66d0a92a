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

//! Transfer authorization agents.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;

/// External agent consulted before transfers start.
#[async_trait]
pub trait TransferAgent: Send + Sync {
    /// Ask whether the transfer at `transfer_path` may start. A non-empty
    /// reply replaces the transfer name.
    async fn request(&self, transfer_path: &str) -> Result<String>;

    async fn notify_progress(&self, transfer_path: &str, transferred: u64) -> Result<()>;

    async fn notify_complete(&self, transfer_path: &str) -> Result<()>;

    async fn notify_error(&self, transfer_path: &str, message: &str) -> Result<()>;

    /// The session dropped the agent.
    async fn release(&self) -> Result<()>;
}

/// Creates agents for `assign_agent` callers.
pub trait AgentFactory: Send + Sync {
    fn create(&self, owner: &str, path: &str) -> Arc<dyn TransferAgent>;
}

enum Notice {
    Progress(String, u64),
    Complete(String),
    Error(String, String),
    Release,
}

/// An agent assigned to a session.
///
/// Notifications are fire-and-forget but delivered in order.
pub(crate) struct AgentSlot {
    pub owner: String,
    pub path: String,
    pub agent: Arc<dyn TransferAgent>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl AgentSlot {
    pub fn new(owner: &str, path: &str, agent: Arc<dyn TransferAgent>) -> Self {
        let (notices, mut rx) = mpsc::unbounded_channel();
        let target = agent.clone();
        let agent_path = path.to_string();

        tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                let (what, result) = match notice {
                    Notice::Progress(path, n) => {
                        ("progress", target.notify_progress(&path, n).await)
                    }
                    Notice::Complete(path) => ("complete", target.notify_complete(&path).await),
                    Notice::Error(path, msg) => ("error", target.notify_error(&path, &msg).await),
                    Notice::Release => ("release", target.release().await),
                };
                if let Err(e) = result {
                    warn!("Agent {} {} notification failed: {}", agent_path, what, e);
                }
            }
        });

        Self {
            owner: owner.to_string(),
            path: path.to_string(),
            agent,
            notices,
        }
    }

    pub fn notify_progress(&self, transfer_path: &str, transferred: u64) {
        let _ = self
            .notices
            .send(Notice::Progress(transfer_path.to_string(), transferred));
    }

    pub fn notify_complete(&self, transfer_path: &str) {
        let _ = self.notices.send(Notice::Complete(transfer_path.to_string()));
    }

    pub fn notify_error(&self, transfer_path: &str, message: &str) {
        let _ = self
            .notices
            .send(Notice::Error(transfer_path.to_string(), message.to_string()));
    }

    /// Tell the agent it is no longer in use; consumes the slot.
    pub fn release(self) {
        debug!("Releasing agent {}", self.path);
        let _ = self.notices.send(Notice::Release);
    }
}

/// Agent that approves every transfer and logs its lifecycle.
pub struct LoggingAgent {
    path: String,
}

#[async_trait]
impl TransferAgent for LoggingAgent {
    async fn request(&self, transfer_path: &str) -> Result<String> {
        info!("[{}] Authorizing {}", self.path, transfer_path);
        Ok(String::new())
    }

    async fn notify_progress(&self, transfer_path: &str, transferred: u64) -> Result<()> {
        debug!("[{}] {}: {} bytes", self.path, transfer_path, transferred);
        Ok(())
    }

    async fn notify_complete(&self, transfer_path: &str) -> Result<()> {
        info!("[{}] {} complete", self.path, transfer_path);
        Ok(())
    }

    async fn notify_error(&self, transfer_path: &str, message: &str) -> Result<()> {
        warn!("[{}] {} failed: {}", self.path, transfer_path, message);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        debug!("[{}] Released", self.path);
        Ok(())
    }
}

/// Factory for [`LoggingAgent`]s.
#[derive(Debug, Default, Clone)]
pub struct LoggingAgentFactory;

impl AgentFactory for LoggingAgentFactory {
    fn create(&self, _owner: &str, path: &str) -> Arc<dyn TransferAgent> {
        Arc::new(LoggingAgent {
            path: path.to_string(),
        })
    }
}
