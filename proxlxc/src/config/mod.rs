//! Build configuration.
//!
//! Raw configuration arrives as one or more untyped JSON maps. `prepare`
//! merges them left to right, decodes the result, applies defaults and
//! environment fallbacks, and validates everything it can before a build
//! starts. A prepared `Config` is never mutated again.

mod boot;
mod comm;
mod http;

pub use boot::BootConfig;
pub use comm::{CommConfig, CommunicatorKind};
pub use http::HttpConfig;

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;

use base64::Engine;
use proxlxc_shared::constants::{defaults, env};
use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::secrets;

/// Environment lookup used for credential fallbacks.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Validated build configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Endpoint
    pub proxmox_url: String,
    pub insecure_skip_tls_verify: bool,
    pub username: String,
    pub password: String,
    pub node: String,
    pub pool: String,

    // Container sizing
    pub memory: u32,
    pub cores: u32,
    pub unprivileged: bool,
    pub template_file: String,
    pub template_storage_pool: String,
    pub filesystem_storage: String,
    /// Root filesystem size in GiB.
    pub filesystem_size: u32,
    pub vmid: u32,
    pub hostname: Option<String>,
    pub network_bridge: String,

    // Provisioning channel
    pub provision_ip: String,
    pub provision_gateway: Option<String>,
    pub provision_mac: String,
    pub provision_port: u16,
    pub provision_public_key_file: PathBuf,
    pub provision_private_key_file: PathBuf,
    pub provision_password: String,

    // Node SSH used to fetch the backup archive
    pub node_ssh_port: u16,
    pub node_ssh_username: String,
    pub node_ssh_password: String,
    pub node_ssh_host_key: Option<String>,
    pub node_ssh_insecure_skip_host_key: bool,

    pub output_path: PathBuf,

    #[serde(flatten)]
    pub comm: CommConfig,
    #[serde(flatten)]
    pub http: HttpConfig,
    #[serde(flatten)]
    pub boot: BootConfig,

    #[serde(skip)]
    endpoint: Option<Url>,
}

/// How the container's single NIC gets its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionAddress {
    Dhcp,
    Static { addr: IpAddr, prefix_len: u8 },
}

impl ProvisionAddress {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("dhcp") {
            return Some(ProvisionAddress::Dhcp);
        }

        let (addr, prefix) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (raw, None),
        };
        let addr: IpAddr = addr.parse().ok()?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max)?,
            None if addr.is_ipv4() => defaults::PROVISION_PREFIX_LEN,
            None => 64,
        };
        Some(ProvisionAddress::Static { addr, prefix_len })
    }

    /// Value for the `ip=` field of a Proxmox `net0` definition.
    pub fn net0_value(&self) -> String {
        match self {
            ProvisionAddress::Dhcp => "dhcp".to_string(),
            ProvisionAddress::Static { addr, prefix_len } => format!("{}/{}", addr, prefix_len),
        }
    }
}

/// Prepare raw configuration using the process environment for fallbacks.
///
/// Returns the prepared config plus warnings (unknown keys).
pub fn prepare(raws: &[Value]) -> ProxlxcResult<(Config, Vec<String>)> {
    prepare_with_env(raws, &|key| std::env::var(key).ok())
}

/// Prepare raw configuration with an explicit environment lookup.
pub fn prepare_with_env(raws: &[Value], env: EnvLookup<'_>) -> ProxlxcResult<(Config, Vec<String>)> {
    let mut merged = merge_raws(raws)?;
    let mut errors = normalize_integers(&mut merged);

    let mut config: Config = match serde_json::from_value(Value::Object(merged.clone())) {
        Ok(config) => config,
        Err(e) => {
            errors.push(format!("could not decode configuration: {}", e));
            return Err(ProxlxcError::InvalidConfig(errors));
        }
    };

    let warnings = unknown_keys(&merged);
    errors.extend(config.apply(env));
    if !errors.is_empty() {
        return Err(ProxlxcError::InvalidConfig(errors));
    }

    config.register_secrets();
    tracing::debug!(
        node = %config.node,
        vmid = config.vmid,
        warnings = warnings.len(),
        "Configuration prepared"
    );
    Ok((config, warnings))
}

fn merge_raws(raws: &[Value]) -> ProxlxcResult<Map<String, Value>> {
    let mut merged = Map::new();
    for (index, raw) in raws.iter().enumerate() {
        match raw {
            Value::Null => {}
            Value::Object(map) => {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
            other => {
                return Err(ProxlxcError::InvalidConfig(vec![format!(
                    "configuration source {} must be an object, got {}",
                    index,
                    value_kind(other)
                )]));
            }
        }
    }
    Ok(merged)
}

/// Integer keys where zero or a negative value means "use the default".
const DEFAULTED_INTEGERS: &[(&str, u64)] = &[
    ("memory", u32::MAX as u64),
    ("cores", u32::MAX as u64),
    ("filesystem_size", u32::MAX as u64),
    ("provision_port", u16::MAX as u64),
    ("node_ssh_port", u16::MAX as u64),
    ("http_port_min", u16::MAX as u64),
    ("http_port_max", u16::MAX as u64),
];

/// Clamp negative sizing and port values to zero so the defaulting rules
/// apply to them, and range-check them before the typed decode.
fn normalize_integers(merged: &mut Map<String, Value>) -> Vec<String> {
    let mut errs = Vec::new();

    for (key, max) in DEFAULTED_INTEGERS {
        let Some(n) = merged.get(*key).and_then(Value::as_i64) else {
            continue;
        };
        if n < 0 {
            merged.insert(key.to_string(), Value::from(0));
        } else if (n as u64) > *max {
            errs.push(format!("{} must not be greater than {}, got {}", key, max, n));
            merged.remove(*key);
        }
    }

    if let Some(n) = merged.get("vmid").and_then(Value::as_i64)
        && !(0..=i64::from(u32::MAX)).contains(&n)
    {
        errs.push(format!("vmid must be a positive integer or 0, got {}", n));
        merged.remove("vmid");
    }

    errs
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Keys that decode into nothing. The known set is whatever a default
/// `Config` serialises to.
fn unknown_keys(merged: &Map<String, Value>) -> Vec<String> {
    let known: BTreeSet<String> = match serde_json::to_value(Config::default()) {
        Ok(Value::Object(map)) => map.into_iter().map(|(k, _)| k).collect(),
        _ => return Vec::new(),
    };

    merged
        .keys()
        .filter(|key| !known.contains(*key))
        .map(|key| format!("unknown configuration key: {:?}", key))
        .collect()
}

impl Config {
    /// Parsed `proxmox_url`.
    pub fn endpoint(&self) -> ProxlxcResult<&Url> {
        self.endpoint
            .as_ref()
            .ok_or_else(|| ProxlxcError::Config("proxmox_url has not been prepared".into()))
    }

    /// Host part of `proxmox_url`; also the node SSH target.
    pub fn endpoint_host(&self) -> ProxlxcResult<String> {
        self.endpoint()?
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| ProxlxcError::Config("proxmox_url has no host".into()))
    }

    pub fn provision_address(&self) -> ProxlxcResult<ProvisionAddress> {
        ProvisionAddress::parse(&self.provision_ip).ok_or_else(|| {
            ProxlxcError::Config(format!("invalid provision_ip: {}", self.provision_ip))
        })
    }

    /// Register every configured credential with the secret filter.
    pub fn register_secrets(&self) {
        secrets::register(&self.password);
        // The stock provisioning password is public.
        if self.provision_password != defaults::PROVISION_PASSWORD {
            secrets::register(&self.provision_password);
        }
        secrets::register(&self.node_ssh_password);
        if let Some(ref password) = self.comm.ssh_password {
            secrets::register(password);
        }
    }

    /// Apply fallbacks and defaults, then validate. Returns every problem found.
    fn apply(&mut self, env: EnvLookup<'_>) -> Vec<String> {
        self.apply_env(env);
        self.apply_defaults();
        let mut errors = self.validate();

        // Guest communicator is always root on the provisioning address.
        self.comm.ssh_username = defaults::SSH_USERNAME.to_string();
        self.comm.ssh_port = self.provision_port;
        self.comm.ssh_private_key_file = self.provision_private_key_file.clone();

        errors.extend(self.comm.prepare());
        errors.extend(self.boot.prepare());
        errors.extend(self.http.prepare());
        errors
    }

    fn apply_env(&mut self, env: EnvLookup<'_>) {
        let fallback = |field: &mut String, key: &str| {
            if field.is_empty()
                && let Some(value) = env(key)
            {
                *field = value;
            }
        };
        fallback(&mut self.proxmox_url, env::PROXMOX_URL);
        fallback(&mut self.username, env::PROXMOX_USERNAME);
        fallback(&mut self.password, env::PROXMOX_PASSWORD);
    }

    fn apply_defaults(&mut self) {
        if self.memory < defaults::MIN_MEMORY_MIB {
            tracing::debug!(
                memory = self.memory,
                "Memory is too small, using default: {}",
                defaults::MEMORY_MIB
            );
            self.memory = defaults::MEMORY_MIB;
        }
        if self.cores < 1 {
            tracing::debug!(cores = self.cores, "Number of cores is too small, using default: 1");
            self.cores = defaults::CORES;
        }
        if self.provision_port == 0 {
            self.provision_port = defaults::PROVISION_PORT;
        }
        if self.provision_mac.is_empty() {
            self.provision_mac = defaults::PROVISION_MAC.to_string();
        }
        if self.provision_password.is_empty() {
            self.provision_password = defaults::PROVISION_PASSWORD.to_string();
        }
        if self.template_storage_pool.is_empty() {
            self.template_storage_pool = defaults::TEMPLATE_STORAGE_POOL.to_string();
        }
        if self.network_bridge.is_empty() {
            self.network_bridge = defaults::NETWORK_BRIDGE.to_string();
        }
        if self.node_ssh_port == 0 {
            self.node_ssh_port = defaults::NODE_SSH_PORT;
        }
        if self.node_ssh_username.is_empty() {
            // root@pam -> root, builder@pve -> builder
            self.node_ssh_username = match self.username.split_once('@') {
                Some((user, _realm)) => user.to_string(),
                None => self.username.clone(),
            };
        }
        if self.node_ssh_password.is_empty() {
            self.node_ssh_password = self.password.clone();
        }
    }

    fn validate(&mut self) -> Vec<String> {
        let mut errs = Vec::new();

        if self.username.is_empty() {
            errs.push("username must be specified".to_string());
        }
        if self.password.is_empty() {
            errs.push("password must be specified".to_string());
        }
        if self.proxmox_url.is_empty() {
            errs.push("proxmox_url must be specified".to_string());
        } else {
            match Url::parse(&self.proxmox_url) {
                Ok(url) if url.host_str().is_some() => self.endpoint = Some(url),
                Ok(_) => errs.push(format!(
                    "Could not parse proxmox_url: {}: missing host",
                    self.proxmox_url
                )),
                Err(e) => errs.push(format!("Could not parse proxmox_url: {}", e)),
            }
        }
        if self.node.is_empty() {
            errs.push("node must be specified".to_string());
        }
        if self.template_file.contains(' ') {
            errs.push("template_name must not contain spaces".to_string());
        }
        if self.template_file.is_empty() {
            errs.push("template_file must be specified".to_string());
        }
        if self.filesystem_storage.is_empty() {
            errs.push("filesystem_storage must be specified".to_string());
        }
        if self.filesystem_size == 0 {
            errs.push("filesystem_size must be specified".to_string());
        }
        if self.provision_ip.is_empty() {
            errs.push("provision_ip must be specified".to_string());
        } else if ProvisionAddress::parse(&self.provision_ip).is_none() {
            errs.push(format!(
                "provision_ip must be an IP address, a CIDR or \"dhcp\", got {:?}",
                self.provision_ip
            ));
        }
        if let Some(ref gw) = self.provision_gateway
            && gw.parse::<IpAddr>().is_err()
        {
            errs.push(format!("provision_gateway is not an IP address: {:?}", gw));
        }
        if self.provision_public_key_file.as_os_str().is_empty() {
            errs.push("provision_public_key_file must be specified".to_string());
        }
        if self.provision_private_key_file.as_os_str().is_empty() {
            errs.push("provision_private_key_file must be specified".to_string());
        }
        if self.output_path.as_os_str().is_empty() {
            errs.push("output_path must be specified".to_string());
        }
        if let Some(ref fingerprint) = self.node_ssh_host_key
            && !is_sha256_fingerprint(fingerprint)
        {
            errs.push("node_ssh_host_key must be a SHA256:<base64> fingerprint".to_string());
        }

        errs
    }
}

/// `SHA256:<base64 of 32 bytes>`, padded or not, as printed by `ssh-keygen -l`.
pub(crate) fn is_sha256_fingerprint(value: &str) -> bool {
    let Some(encoded) = value.strip_prefix("SHA256:") else {
        return false;
    };
    let encoded = encoded.trim_end_matches('=');
    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(encoded)
        .map(|digest| digest.len() == 32)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn base() -> Value {
        json!({
            "proxmox_url": "https://pve1.example.com:8006/api2/json",
            "username": "root@pam",
            "password": "config-test-password",
            "node": "pve1",
            "vmid": 9000,
            "template_file": "local:vztmpl/debian-12-standard_12.0-1_amd64.tar.zst",
            "filesystem_storage": "local-lvm",
            "filesystem_size": 8,
            "memory": 1024,
            "cores": 2,
            "provision_ip": "10.0.0.50",
            "provision_public_key_file": "/keys/id.pub",
            "provision_private_key_file": "/keys/id",
            "output_path": "/tmp/out.tar.gz"
        })
    }

    fn with(mut raw: Value, key: &str, value: Value) -> Value {
        raw.as_object_mut().unwrap().insert(key.to_string(), value);
        raw
    }

    #[test]
    fn prepares_a_complete_config() {
        let (config, warnings) = prepare_with_env(&[base()], &no_env).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(config.memory, 1024);
        assert_eq!(config.cores, 2);
        assert_eq!(config.template_storage_pool, "local");
        assert_eq!(config.provision_mac, "1e:eb:08:d1:e7:e2");
        assert_eq!(config.provision_port, 22);
        assert_eq!(config.provision_password, "provision");
        assert_eq!(config.node_ssh_username, "root");
        assert_eq!(config.node_ssh_password, "config-test-password");
        assert_eq!(config.endpoint_host().unwrap(), "pve1.example.com");
        assert_eq!(config.comm.ssh_username, "root");
        assert_eq!(config.comm.ssh_port, 22);
        assert_eq!(config.comm.ssh_private_key_file, PathBuf::from("/keys/id"));
        assert!(secrets::is_registered("config-test-password"));
        assert!(!secrets::is_registered("provision"));
    }

    #[test]
    fn rewrites_out_of_range_values() {
        let raw = with(with(with(base(), "memory", json!(8)), "cores", json!(0)), "provision_port", json!(0));
        let raw = with(raw, "provision_mac", json!(""));
        let (config, _) = prepare_with_env(&[raw], &no_env).unwrap();
        assert_eq!(config.memory, 512);
        assert_eq!(config.cores, 1);
        assert_eq!(config.provision_port, 22);
        assert_eq!(config.provision_mac, "1e:eb:08:d1:e7:e2");
    }

    #[test]
    fn negative_values_fall_back_to_defaults() {
        let raw = with(with(with(base(), "memory", json!(-5)), "cores", json!(-2)), "provision_port", json!(-1));
        let (config, _) = prepare_with_env(&[raw], &no_env).unwrap();
        assert_eq!(config.memory, 512);
        assert_eq!(config.cores, 1);
        assert_eq!(config.provision_port, 22);
        assert_eq!(config.comm.ssh_port, 22);
    }

    #[test]
    fn negative_filesystem_size_is_reported_with_other_errors() {
        let raw = with(with(base(), "filesystem_size", json!(-3)), "node", json!(""));
        let errors = prepare_with_env(&[raw], &no_env).unwrap_err().config_errors().to_vec();
        assert!(errors.contains(&"filesystem_size must be specified".to_string()));
        assert!(errors.contains(&"node must be specified".to_string()));
        assert!(!errors.iter().any(|e| e.starts_with("could not decode")));
    }

    #[test]
    fn oversized_and_negative_ids_are_reported() {
        let raw = with(with(base(), "provision_port", json!(70000)), "vmid", json!(-7));
        let errors = prepare_with_env(&[raw], &no_env).unwrap_err().config_errors().to_vec();
        assert!(errors.contains(&"provision_port must not be greater than 65535, got 70000".to_string()));
        assert!(errors.contains(&"vmid must be a positive integer or 0, got -7".to_string()));
    }

    #[test]
    fn missing_node_is_reported() {
        let raw = with(base(), "node", json!(""));
        let err = prepare_with_env(&[raw], &no_env).unwrap_err();
        assert!(
            err.config_errors()
                .iter()
                .any(|e| e == "node must be specified")
        );
    }

    #[test]
    fn collects_every_missing_field() {
        let err = prepare_with_env(&[json!({})], &no_env).unwrap_err();
        let errors = err.config_errors();
        for expected in [
            "username must be specified",
            "password must be specified",
            "proxmox_url must be specified",
            "node must be specified",
            "filesystem_storage must be specified",
            "filesystem_size must be specified",
            "provision_ip must be specified",
            "provision_public_key_file must be specified",
            "provision_private_key_file must be specified",
            "output_path must be specified",
        ] {
            assert!(errors.iter().any(|e| e == expected), "missing {expected}");
        }
    }

    #[test]
    fn credentials_fall_back_to_environment() {
        let mut raw = base();
        let map = raw.as_object_mut().unwrap();
        map.remove("proxmox_url");
        map.remove("username");
        map.remove("password");

        let env = |key: &str| match key {
            "PROXMOX_URL" => Some("https://pve-env:8006/api2/json".to_string()),
            "PROXMOX_USERNAME" => Some("builder@pve".to_string()),
            "PROXMOX_PASSWORD" => Some("env-password".to_string()),
            _ => None,
        };
        let (config, _) = prepare_with_env(&[raw], &env).unwrap();
        assert_eq!(config.endpoint_host().unwrap(), "pve-env");
        assert_eq!(config.username, "builder@pve");
        assert_eq!(config.node_ssh_username, "builder");
        assert!(secrets::is_registered("env-password"));
    }

    #[test]
    fn explicit_values_beat_environment() {
        let env = |_: &str| Some("from-env".to_string());
        let (config, _) = prepare_with_env(&[base()], &env).unwrap();
        assert_eq!(config.username, "root@pam");
    }

    #[test]
    fn later_sources_override_earlier_ones() {
        let (config, _) =
            prepare_with_env(&[base(), json!({ "node": "pve2" }), Value::Null], &no_env).unwrap();
        assert_eq!(config.node, "pve2");
    }

    #[test]
    fn unknown_keys_are_warnings() {
        let raw = with(base(), "disk_format", json!("raw"));
        let (_, warnings) = prepare_with_env(&[raw], &no_env).unwrap();
        assert_eq!(warnings, vec!["unknown configuration key: \"disk_format\"".to_string()]);
    }

    #[test]
    fn non_object_source_is_rejected() {
        let err = prepare_with_env(&[json!([1, 2])], &no_env).unwrap_err();
        assert!(err.to_string().contains("must be an object"));
    }

    #[test]
    fn template_file_with_spaces_is_rejected() {
        let raw = with(base(), "template_file", json!("local:vztmpl/my template.tar.gz"));
        let err = prepare_with_env(&[raw], &no_env).unwrap_err();
        assert!(
            err.config_errors()
                .contains(&"template_name must not contain spaces".to_string())
        );
    }

    #[test]
    fn prepare_is_idempotent() {
        let (first, _) = prepare_with_env(&[base()], &no_env).unwrap();
        let reserialised = serde_json::to_value(&first).unwrap();
        let (second, warnings) = prepare_with_env(&[reserialised], &no_env).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn provision_address_forms() {
        assert_eq!(ProvisionAddress::parse("dhcp"), Some(ProvisionAddress::Dhcp));
        assert_eq!(
            ProvisionAddress::parse("10.0.0.50").unwrap().net0_value(),
            "10.0.0.50/24"
        );
        assert_eq!(
            ProvisionAddress::parse("10.0.0.50/16").unwrap().net0_value(),
            "10.0.0.50/16"
        );
        assert!(ProvisionAddress::parse("10.0.0.50/33").is_none());
        assert!(ProvisionAddress::parse("not-an-ip").is_none());
    }

    #[test]
    fn host_key_must_be_a_sha256_fingerprint() {
        let good = format!(
            "SHA256:{}",
            base64::engine::general_purpose::STANDARD_NO_PAD.encode([7u8; 32])
        );
        assert!(is_sha256_fingerprint(&good));
        assert!(!is_sha256_fingerprint("MD5:aa:bb"));

        let raw = with(base(), "node_ssh_host_key", json!("SHA256:short"));
        let err = prepare_with_env(&[raw], &no_env).unwrap_err();
        assert!(err.to_string().contains("node_ssh_host_key"));
    }
}
