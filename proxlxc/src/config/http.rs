//! Scratch HTTP server options.

use std::path::PathBuf;

use proxlxc_shared::constants::defaults;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Served read-only to the guest. Empty disables the server.
    pub http_directory: PathBuf,
    pub http_port_min: u16,
    pub http_port_max: u16,
    pub http_bind_address: String,
}

impl HttpConfig {
    pub(super) fn prepare(&mut self) -> Vec<String> {
        let mut errs = Vec::new();

        if self.http_port_min == 0 {
            self.http_port_min = defaults::HTTP_PORT_MIN;
        }
        if self.http_port_max == 0 {
            self.http_port_max = defaults::HTTP_PORT_MAX;
        }
        if self.http_bind_address.is_empty() {
            self.http_bind_address = defaults::HTTP_BIND_ADDRESS.to_string();
        }

        if self.http_port_min > self.http_port_max {
            errs.push("http_port_min must not be greater than http_port_max".to_string());
        }
        if self.http_bind_address.parse::<std::net::IpAddr>().is_err() {
            errs.push(format!(
                "http_bind_address is not an IP address: {:?}",
                self.http_bind_address
            ));
        }

        errs
    }

    pub fn enabled(&self) -> bool {
        !self.http_directory.as_os_str().is_empty()
    }
}
