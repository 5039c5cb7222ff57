//! In-memory Proxmox, node and guest doubles shared by the build tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use proxlxc::builder::Backends;
use proxlxc::communicator::{CommandOutput, Communicator, GuestConnector};
use proxlxc::config::{CommConfig, Config, prepare_with_env};
use proxlxc::hook::{GeneratedData, Hook};
use proxlxc::proxmox::{Form, NetworkInterface, ProxmoxApi, TaskHandle, VmRef};
use proxlxc::transfer::{NodeFiles, NodeSession, NodeTarget, RemoteFile};
use proxlxc::ui::Ui;
use proxlxc::{ProxlxcError, ProxlxcResult};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Proxmox
// ============================================================================

/// Records every call as `"<op> <vmid>"`, e.g. `"shutdown 9000"`.
#[derive(Default)]
pub struct FakeProxmox {
    pub next_vmid: u32,
    calls: Mutex<Vec<String>>,
    forms: Mutex<Vec<(String, Vec<(String, String)>)>>,
    failing: Mutex<BTreeSet<String>>,
    storage_path: Mutex<Option<String>>,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
}

impl FakeProxmox {
    pub fn new() -> Self {
        Self {
            next_vmid: 100,
            storage_path: Mutex::new(Some("/var/lib/vz".to_string())),
            ..Default::default()
        }
    }

    pub fn with_next_vmid(mut self, vmid: u32) -> Self {
        self.next_vmid = vmid;
        self
    }

    /// Make `op` answer with HTTP 500.
    pub fn fail_on(&self, op: &str) {
        self.failing.lock().unwrap().insert(op.to_string());
    }

    /// The first `op` request is recorded as sent, then cancels `token`
    /// and never answers.
    pub fn cancel_on(&self, op: &str, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((op.to_string(), token));
    }

    async fn cancel_if_armed(&self, op: &str) {
        let armed = {
            let mut slot = self.cancel_on.lock().unwrap();
            match slot.as_ref() {
                Some((armed_op, _)) if armed_op == op => slot.take(),
                _ => None,
            }
        };
        if let Some((_, token)) = armed {
            token.cancel();
            std::future::pending::<()>().await;
        }
    }

    pub fn set_storage_path(&self, path: Option<&str>) {
        *self.storage_path.lock().unwrap() = path.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }

    /// Form sent with the first POST to a path ending in `suffix`.
    pub fn form_for(&self, suffix: &str) -> Option<BTreeMap<String, String>> {
        self.forms
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| path.ends_with(suffix))
            .map(|(_, form)| form.iter().cloned().collect())
    }

    fn record(&self, op: &str, vmid: &str) -> ProxlxcResult<TaskHandle> {
        self.calls.lock().unwrap().push(format!("{} {}", op, vmid));
        if self.failing.lock().unwrap().contains(op) {
            return Err(ProxlxcError::Api {
                status: 500,
                message: format!("{} failed", op),
            });
        }
        TaskHandle::from_upid(&format!(
            "UPID:pve1:0000A1B2:0012C3D4:65A1B2C3:{}:{}:root@pam:",
            op, vmid
        ))
    }
}

#[async_trait]
impl ProxmoxApi for FakeProxmox {
    async fn next_vmid(&self) -> ProxlxcResult<u32> {
        self.calls.lock().unwrap().push("nextid".to_string());
        Ok(self.next_vmid)
    }

    async fn post_task(&self, path: &str, form: &Form) -> ProxlxcResult<TaskHandle> {
        self.forms
            .lock()
            .unwrap()
            .push((path.to_string(), form.to_vec()));

        let form_vmid = form
            .iter()
            .find(|(k, _)| k == "vmid")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let (op, vmid) = match parts.as_slice() {
            ["nodes", _, "lxc"] => ("create".to_string(), form_vmid),
            ["nodes", _, "vzdump"] => ("vzdump".to_string(), form_vmid),
            ["nodes", _, "lxc", vmid, "status", op] => (op.to_string(), vmid.to_string()),
            _ => {
                return Err(ProxlxcError::Api {
                    status: 501,
                    message: format!("unexpected POST {}", path),
                });
            }
        };
        let task = self.record(&op, &vmid);
        self.cancel_if_armed(&op).await;
        task
    }

    async fn wait_for_task(&self, task: &TaskHandle) -> ProxlxcResult<()> {
        let kind = task.task_type().unwrap_or_default().to_string();
        if self.failing.lock().unwrap().contains(&format!("wait {}", kind)) {
            return Err(ProxlxcError::TaskFailed {
                upid: task.upid.clone(),
                exit_status: "command failed".into(),
            });
        }
        Ok(())
    }

    async fn delete_container(&self, vm: &VmRef) -> ProxlxcResult<TaskHandle> {
        let task = self.record("delete", &vm.vmid.to_string());
        self.cancel_if_armed("delete").await;
        task
    }

    async fn container_interfaces(&self, vm: &VmRef) -> ProxlxcResult<Vec<NetworkInterface>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("interfaces {}", vm.vmid));
        Ok(vec![
            NetworkInterface {
                name: "lo".into(),
                hardware_address: None,
                inet: Some("127.0.0.1/8".into()),
                inet6: None,
            },
            NetworkInterface {
                name: "eth0".into(),
                hardware_address: Some("1e:eb:08:d1:e7:e2".into()),
                inet: Some("10.0.0.77/24".into()),
                inet6: None,
            },
        ])
    }

    async fn storage_path(&self, _storage: &str) -> ProxlxcResult<Option<String>> {
        Ok(self.storage_path.lock().unwrap().clone())
    }
}

// ============================================================================
// Node files
// ============================================================================

#[derive(Clone)]
pub struct FakeFile {
    pub name: String,
    pub content: Vec<u8>,
    /// Size reported by the listing; `None` means the content length.
    pub listed_size: Option<u64>,
}

impl FakeFile {
    pub fn new(name: &str, len: usize) -> Self {
        Self {
            name: name.to_string(),
            content: vec![0x1f; len],
            listed_size: None,
        }
    }
}

#[derive(Default)]
pub struct FakeNodeFiles {
    files: Vec<FakeFile>,
    pub listed_dirs: Arc<Mutex<Vec<String>>>,
    pub targets: Arc<Mutex<Vec<NodeTarget>>>,
}

impl FakeNodeFiles {
    pub fn serving(files: Vec<FakeFile>) -> Self {
        Self {
            files,
            ..Default::default()
        }
    }
}

#[async_trait]
impl NodeFiles for FakeNodeFiles {
    async fn connect(&self, target: &NodeTarget) -> ProxlxcResult<Box<dyn NodeSession>> {
        self.targets.lock().unwrap().push(target.clone());
        Ok(Box::new(FakeSession {
            files: self.files.clone(),
            listed_dirs: Arc::clone(&self.listed_dirs),
        }))
    }
}

struct FakeSession {
    files: Vec<FakeFile>,
    listed_dirs: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NodeSession for FakeSession {
    async fn read_dir(&mut self, dir: &str) -> ProxlxcResult<Vec<RemoteFile>> {
        self.listed_dirs.lock().unwrap().push(dir.to_string());
        Ok(self
            .files
            .iter()
            .map(|f| RemoteFile {
                name: f.name.clone(),
                size: Some(f.listed_size.unwrap_or(f.content.len() as u64)),
            })
            .collect())
    }

    async fn download(&mut self, remote: &str, mut dest: std::fs::File) -> ProxlxcResult<u64> {
        let name = remote.rsplit('/').next().unwrap_or(remote);
        let file = self
            .files
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| ProxlxcError::Transfer(format!("no such file: {}", remote)))?;
        dest.write_all(&file.content)?;
        Ok(file.content.len() as u64)
    }
}

// ============================================================================
// Guest
// ============================================================================

#[derive(Default)]
pub struct FakeGuest {
    pub hosts: Arc<Mutex<Vec<String>>>,
    pub commands: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<bool>>,
}

#[async_trait]
impl GuestConnector for FakeGuest {
    async fn connect(&self, host: &str, _comm: &CommConfig) -> ProxlxcResult<Arc<dyn Communicator>> {
        self.hosts.lock().unwrap().push(host.to_string());
        Ok(Arc::new(FakeCommunicator {
            commands: Arc::clone(&self.commands),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeCommunicator {
    commands: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
}

#[async_trait]
impl Communicator for FakeCommunicator {
    async fn run(&self, command: &str) -> ProxlxcResult<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(CommandOutput::default())
    }

    async fn close(&self) -> ProxlxcResult<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

// ============================================================================
// Ui and hooks
// ============================================================================

#[derive(Default)]
pub struct RecordingUi {
    lines: Mutex<Vec<String>>,
}

impl RecordingUi {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|l| l.strip_prefix("error: ").map(str::to_string))
            .collect()
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("say: {}", message));
    }

    fn message(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("message: {}", message));
    }

    fn error(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("error: {}", message));
    }
}

/// Cancels the build from inside provisioning, then never finishes.
pub struct CancellingHook {
    pub token: CancellationToken,
}

#[async_trait]
impl Hook for CancellingHook {
    async fn run(
        &self,
        _event: &str,
        _ui: &dyn Ui,
        _communicator: Option<&dyn Communicator>,
        _data: &GeneratedData,
    ) -> ProxlxcResult<GeneratedData> {
        self.token.cancel();
        std::future::pending().await
    }
}

/// Returns fixed data.
pub struct DataHook(pub GeneratedData);

#[async_trait]
impl Hook for DataHook {
    async fn run(
        &self,
        _event: &str,
        _ui: &dyn Ui,
        _communicator: Option<&dyn Communicator>,
        _data: &GeneratedData,
    ) -> ProxlxcResult<GeneratedData> {
        Ok(self.0.clone())
    }
}

/// Says one line through the build's ui.
pub struct EchoHook(pub &'static str);

#[async_trait]
impl Hook for EchoHook {
    async fn run(
        &self,
        _event: &str,
        ui: &dyn Ui,
        _communicator: Option<&dyn Communicator>,
        _data: &GeneratedData,
    ) -> ProxlxcResult<GeneratedData> {
        ui.say(self.0);
        Ok(GeneratedData::new())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Key files plus the output location for one test.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("id_ed25519.pub"),
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBuild builder@ci\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("id_ed25519"), "private").unwrap();
        Self { dir }
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("out").join("out.tar.gz")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The happy-path configuration with `overrides` merged on top.
    pub fn config(&self, overrides: Value) -> Config {
        let base = json!({
            "proxmox_url": "https://pve1.lab:8006/api2/json",
            "username": "root@pam",
            "password": "hunter2-secret",
            "node": "pve1",
            "vmid": 9000,
            "template_file": "local:vztmpl/debian-12-standard_12.0-1_amd64.tar.zst",
            "filesystem_storage": "local-lvm",
            "filesystem_size": 8,
            "memory": 1024,
            "cores": 2,
            "provision_ip": "10.0.0.50",
            "provision_public_key_file": self.dir.path().join("id_ed25519.pub"),
            "provision_private_key_file": self.dir.path().join("id_ed25519"),
            "output_path": self.output(),
            "node_ssh_insecure_skip_host_key": true,
        });
        let (config, _) = prepare_with_env(&[base, overrides], &|_| None).unwrap();
        config
    }
}

pub fn backends(api: &Arc<FakeProxmox>, files: FakeNodeFiles, guest: &Arc<FakeGuest>) -> Backends {
    Backends {
        api: Arc::clone(api) as Arc<dyn ProxmoxApi>,
        node_files: Arc::new(files),
        guest: Arc::clone(guest) as Arc<dyn GuestConnector>,
    }
}
