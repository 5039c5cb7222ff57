//! Command channel into the guest container.

mod ssh;

pub use ssh::{SshCommunicator, SshConnector};

use std::sync::Arc;

use async_trait::async_trait;
use proxlxc_shared::errors::ProxlxcResult;

use crate::config::CommConfig;

/// Result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

#[async_trait]
pub trait Communicator: Send + Sync {
    /// Run a shell command and wait for it to exit.
    async fn run(&self, command: &str) -> ProxlxcResult<CommandOutput>;

    /// Close the channel. Later calls to `run` fail.
    async fn close(&self) -> ProxlxcResult<()>;
}

/// Opens communicators. One attempt per call; retries belong to the caller.
#[async_trait]
pub trait GuestConnector: Send + Sync {
    async fn connect(&self, host: &str, comm: &CommConfig) -> ProxlxcResult<Arc<dyn Communicator>>;
}
