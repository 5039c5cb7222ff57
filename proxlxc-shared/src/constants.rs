//! Constants shared between the builder core and the CLI.

/// Identifier reported by every artifact this builder produces.
pub const BUILDER_ID: &str = "proxmox.builder";

/// Name used as the UI prefix and by the host orchestrator.
pub const BUILDER_NAME: &str = "proxmox-lxc";

/// Environment fallbacks for endpoint credentials.
pub mod env {
    pub const PROXMOX_URL: &str = "PROXMOX_URL";
    pub const PROXMOX_USERNAME: &str = "PROXMOX_USERNAME";
    pub const PROXMOX_PASSWORD: &str = "PROXMOX_PASSWORD";
}

/// Defaults applied by `prepare`.
pub mod defaults {
    pub const MIN_MEMORY_MIB: u32 = 16;
    pub const MEMORY_MIB: u32 = 512;
    pub const CORES: u32 = 1;
    pub const PROVISION_MAC: &str = "1e:eb:08:d1:e7:e2";
    pub const PROVISION_PORT: u16 = 22;
    pub const PROVISION_PASSWORD: &str = "provision";
    pub const PROVISION_PREFIX_LEN: u8 = 24;
    pub const TEMPLATE_STORAGE_POOL: &str = "local";
    pub const NETWORK_BRIDGE: &str = "vmbr0";
    pub const SSH_USERNAME: &str = "root";
    pub const SSH_TIMEOUT_SECS: u64 = 300;
    pub const NODE_SSH_PORT: u16 = 22;
    pub const HTTP_PORT_MIN: u16 = 8000;
    pub const HTTP_PORT_MAX: u16 = 9000;
    pub const HTTP_BIND_ADDRESS: &str = "0.0.0.0";
}

/// Proxmox REST client tuning.
pub mod rest {
    use std::time::Duration;

    /// Operation timeout for a single request and for a task to finish.
    pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(1200);
    pub const TASK_POLL_INTERVAL: Duration = Duration::from_secs(2);
    pub const RETRY_ATTEMPTS: u32 = 3;
    pub const RETRY_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
}

/// Redaction marker written in place of registered secrets.
pub const SECRET_PLACEHOLDER: &str = "<sensitive>";
