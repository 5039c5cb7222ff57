//! Proxmox API value types.

use std::fmt;

use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ProvisionAddress};

/// Guest flavour. Only LXC containers are built here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmKind {
    Lxc,
}

impl VmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmKind::Lxc => "lxc",
        }
    }
}

/// Identifies one guest instance on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRef {
    pub vmid: u32,
    pub node: String,
    pub kind: VmKind,
}

impl VmRef {
    pub fn lxc(vmid: u32, node: impl Into<String>) -> Self {
        Self {
            vmid,
            node: node.into(),
            kind: VmKind::Lxc,
        }
    }

    /// `/nodes/{node}/lxc/{vmid}`
    pub fn api_path(&self) -> String {
        format!("/nodes/{}/{}/{}", self.node, self.kind.as_str(), self.vmid)
    }
}

impl fmt::Display for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.vmid)
    }
}

/// Handle of an asynchronous Proxmox task.
///
/// UPIDs look like `UPID:pve1:0000A1B2:0012C3D4:65A1B2C3:vzcreate:9000:root@pam:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub upid: String,
    pub node: String,
}

impl TaskHandle {
    pub fn from_upid(upid: &str) -> ProxlxcResult<Self> {
        let mut fields = upid.split(':');
        match (fields.next(), fields.next()) {
            (Some("UPID"), Some(node)) if !node.is_empty() => Ok(Self {
                upid: upid.to_string(),
                node: node.to_string(),
            }),
            _ => Err(ProxlxcError::Internal(format!(
                "malformed task identifier: {:?}",
                upid
            ))),
        }
    }

    /// Task type field, e.g. `vzdump`.
    pub fn task_type(&self) -> Option<&str> {
        self.upid.split(':').nth(5)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.upid)
    }
}

/// Body of `GET /nodes/{node}/tasks/{upid}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatus {
    pub status: String,
    #[serde(default)]
    pub exitstatus: Option<String>,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        self.status == "stopped"
    }

    pub fn is_ok(&self) -> bool {
        self.exitstatus.as_deref() == Some("OK")
    }
}

/// One entry of `GET /nodes/{node}/lxc/{vmid}/interfaces`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    #[serde(default, rename = "hwaddr")]
    pub hardware_address: Option<String>,
    /// `a.b.c.d/nn`
    #[serde(default)]
    pub inet: Option<String>,
    #[serde(default)]
    pub inet6: Option<String>,
}

impl NetworkInterface {
    /// First usable address without its prefix length.
    pub fn address(&self) -> Option<std::net::IpAddr> {
        if self.name == "lo" {
            return None;
        }
        [self.inet.as_deref(), self.inet6.as_deref()]
            .into_iter()
            .flatten()
            .filter_map(|cidr| cidr.split('/').next()?.parse::<std::net::IpAddr>().ok())
            .find(|ip| !ip.is_loopback() && !ip.is_unspecified())
    }
}

/// Form body of `POST /nodes/{node}/lxc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub vmid: u32,
    pub ostemplate: String,
    pub memory: u32,
    pub cores: u32,
    pub unprivileged: bool,
    pub pool: Option<String>,
    pub hostname: Option<String>,
    pub storage: String,
    pub net0: String,
    pub rootfs: String,
    pub ssh_public_keys: String,
    pub password: String,
}

impl ContainerSpec {
    pub fn from_config(config: &Config, vmid: u32, ssh_public_keys: String) -> ProxlxcResult<Self> {
        let ostemplate = if config.template_file.contains(':') {
            config.template_file.clone()
        } else {
            format!(
                "{}:vztmpl/{}",
                config.template_storage_pool, config.template_file
            )
        };

        let mut net0 = format!(
            "name=eth0,bridge={},hwaddr={}",
            config.network_bridge, config.provision_mac
        );
        match config.provision_address()? {
            address @ ProvisionAddress::Static { addr, .. } if addr.is_ipv6() => {
                net0.push_str(&format!(",ip6={}", address.net0_value()));
                if let Some(ref gw) = config.provision_gateway {
                    net0.push_str(&format!(",gw6={}", gw));
                }
            }
            address => {
                net0.push_str(&format!(",ip={}", address.net0_value()));
                if let Some(ref gw) = config.provision_gateway
                    && address != ProvisionAddress::Dhcp
                {
                    net0.push_str(&format!(",gw={}", gw));
                }
            }
        }

        Ok(Self {
            vmid,
            ostemplate,
            memory: config.memory,
            cores: config.cores,
            unprivileged: config.unprivileged,
            pool: Some(config.pool.clone()).filter(|p| !p.is_empty()),
            hostname: config.hostname.clone(),
            storage: config.filesystem_storage.clone(),
            net0,
            rootfs: format!("{}:{}", config.filesystem_storage, config.filesystem_size),
            ssh_public_keys,
            password: config.provision_password.clone(),
        })
    }

    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("vmid".to_string(), self.vmid.to_string()),
            ("ostemplate".to_string(), self.ostemplate.clone()),
            ("memory".to_string(), self.memory.to_string()),
            ("cores".to_string(), self.cores.to_string()),
            (
                "unprivileged".to_string(),
                if self.unprivileged { "1" } else { "0" }.to_string(),
            ),
            ("storage".to_string(), self.storage.clone()),
            ("net0".to_string(), self.net0.clone()),
            ("rootfs".to_string(), self.rootfs.clone()),
            ("ssh-public-keys".to_string(), self.ssh_public_keys.clone()),
            ("password".to_string(), self.password.clone()),
        ];
        if let Some(ref pool) = self.pool {
            form.push(("pool".to_string(), pool.clone()));
        }
        if let Some(ref hostname) = self.hostname {
            form.push(("hostname".to_string(), hostname.clone()));
        }
        form
    }
}
