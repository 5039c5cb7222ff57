//! Retrieval of files that only exist on a Proxmox node's filesystem.
//!
//! `vzdump` writes its archive into the storage's dump directory on the
//! node. The REST API cannot stream it back, so the archive is fetched
//! over a second protocol.

mod sftp;

pub use sftp::SftpNodeFiles;

use std::path::PathBuf;

use async_trait::async_trait;
use proxlxc_shared::errors::ProxlxcResult;

use crate::config::Config;

/// Directory entry on the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    /// `None` when the server did not report it.
    pub size: Option<u64>,
}

/// How the node's SSH host key is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// `SHA256:<base64>` as printed by `ssh-keygen -l`.
    Fingerprint(String),
    /// An OpenSSH `known_hosts` file.
    KnownHosts(PathBuf),
    /// Accept whatever key the node presents.
    Insecure,
}

#[derive(Debug, Clone)]
pub struct NodeTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub host_key: HostKeyPolicy,
}

impl NodeTarget {
    pub fn from_config(config: &Config) -> ProxlxcResult<Self> {
        let host_key = if config.node_ssh_insecure_skip_host_key {
            HostKeyPolicy::Insecure
        } else if let Some(ref fingerprint) = config.node_ssh_host_key {
            HostKeyPolicy::Fingerprint(fingerprint.clone())
        } else {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
            HostKeyPolicy::KnownHosts(home.join(".ssh").join("known_hosts"))
        };

        Ok(Self {
            host: config.endpoint_host()?,
            port: config.node_ssh_port,
            username: config.node_ssh_username.clone(),
            password: config.node_ssh_password.clone(),
            host_key,
        })
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Opens file sessions to a node.
#[async_trait]
pub trait NodeFiles: Send + Sync {
    async fn connect(&self, target: &NodeTarget) -> ProxlxcResult<Box<dyn NodeSession>>;
}

/// An authenticated file session, owned by one stage.
#[async_trait]
pub trait NodeSession: Send {
    /// Entries of `dir` in the order the server lists them.
    async fn read_dir(&mut self, dir: &str) -> ProxlxcResult<Vec<RemoteFile>>;

    /// Stream `remote` into `dest`. Returns the number of bytes written.
    async fn download(&mut self, remote: &str, dest: std::fs::File) -> ProxlxcResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::prepare_with_env;
    use serde_json::json;

    fn config(extra: serde_json::Value) -> Config {
        let base = json!({
            "proxmox_url": "https://pve1.lab:8006/api2/json",
            "username": "builder@pve",
            "password": "transfer-test-pw",
            "node": "pve1",
            "template_file": "local:vztmpl/debian.tar.zst",
            "filesystem_storage": "local-lvm",
            "filesystem_size": 8,
            "provision_ip": "10.0.0.50",
            "provision_public_key_file": "/keys/id.pub",
            "provision_private_key_file": "/keys/id",
            "output_path": "/tmp/out.tar.gz"
        });
        prepare_with_env(&[base, extra], &|_| None).unwrap().0
    }

    #[test]
    fn target_defaults_to_known_hosts() {
        let target = NodeTarget::from_config(&config(json!({}))).unwrap();
        assert_eq!(target.address(), "pve1.lab:22");
        assert_eq!(target.username, "builder");
        assert_eq!(target.password, "transfer-test-pw");
        assert!(matches!(target.host_key, HostKeyPolicy::KnownHosts(ref p) if p.ends_with(".ssh/known_hosts")));
    }

    #[test]
    fn insecure_flag_wins_over_fingerprint() {
        let fingerprint = "SHA256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU";
        let target = NodeTarget::from_config(&config(json!({
            "node_ssh_host_key": fingerprint,
            "node_ssh_insecure_skip_host_key": true,
            "node_ssh_port": 2222
        })))
        .unwrap();
        assert_eq!(target.host_key, HostKeyPolicy::Insecure);
        assert_eq!(target.port, 2222);

        let target = NodeTarget::from_config(&config(json!({ "node_ssh_host_key": fingerprint }))).unwrap();
        assert_eq!(target.host_key, HostKeyPolicy::Fingerprint(fingerprint.to_string()));
    }
}
