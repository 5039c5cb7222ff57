//! The three downward seams a build talks to.

use std::sync::Arc;

use proxlxc_shared::errors::ProxlxcResult;

use crate::communicator::{GuestConnector, SshConnector};
use crate::config::Config;
use crate::proxmox::{ProxmoxApi, ProxmoxClient};
use crate::transfer::{NodeFiles, SftpNodeFiles};

pub struct Backends {
    pub api: Arc<dyn ProxmoxApi>,
    pub node_files: Arc<dyn NodeFiles>,
    pub guest: Arc<dyn GuestConnector>,
}

impl Backends {
    /// Production backends: REST over reqwest, SFTP and SSH over ssh2.
    pub async fn connect(config: &Config) -> ProxlxcResult<Self> {
        let api = ProxmoxClient::connect(config).await?;
        tracing::info!(node = %config.node, "Connected to Proxmox API");

        Ok(Self {
            api: Arc::new(api),
            node_files: Arc::new(SftpNodeFiles),
            guest: Arc::new(SshConnector),
        })
    }
}
