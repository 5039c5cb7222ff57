//! Guest communicator options.

use std::path::PathBuf;
use std::time::Duration;

use proxlxc_shared::constants::defaults;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicatorKind {
    Ssh,
    /// No guest channel. Connect and CleanupTempKeys are skipped; the hook gets no communicator.
    None,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    pub communicator: String,
    /// Forced to `root`.
    pub ssh_username: String,
    /// Mirrors `provision_port`.
    pub ssh_port: u16,
    /// Mirrors `provision_private_key_file`.
    pub ssh_private_key_file: PathBuf,
    pub ssh_password: Option<String>,
    /// Seconds to keep retrying the guest connection.
    pub ssh_timeout: u64,
    pub ssh_clear_authorized_keys: bool,
}

impl CommConfig {
    pub(super) fn prepare(&mut self) -> Vec<String> {
        let mut errs = Vec::new();

        if self.communicator.is_empty() {
            self.communicator = "ssh".to_string();
        }
        if self.ssh_timeout == 0 {
            self.ssh_timeout = defaults::SSH_TIMEOUT_SECS;
        }

        match self.communicator.as_str() {
            "ssh" | "none" => {}
            "winrm" => errs.push(
                "communicator \"winrm\" is not supported for LXC containers".to_string(),
            ),
            other => errs.push(format!("unknown communicator type: {:?}", other)),
        }

        errs
    }

    pub fn kind(&self) -> CommunicatorKind {
        match self.communicator.as_str() {
            "none" => CommunicatorKind::None,
            _ => CommunicatorKind::Ssh,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout)
    }
}
