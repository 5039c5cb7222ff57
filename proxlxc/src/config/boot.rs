//! Boot command options.
//!
//! Carried for orchestrators that share one config across builders. LXC
//! containers boot without a console, so nothing here is acted on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub boot_command: Vec<String>,
    /// Seconds.
    pub boot_wait: u64,
    /// Milliseconds between keystrokes.
    pub boot_key_interval: u64,
}

impl BootConfig {
    pub(super) fn prepare(&mut self) -> Vec<String> {
        self.boot_command
            .iter()
            .enumerate()
            .filter(|(_, line)| line.trim().is_empty())
            .map(|(i, _)| format!("boot_command entry {} is empty", i))
            .collect()
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.boot_wait)
    }
}
