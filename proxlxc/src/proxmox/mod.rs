//! Proxmox VE REST API seam.
//!
//! Every long operation returns a [`TaskHandle`]; callers decide when to
//! block on it with [`ProxmoxApi::wait_for_task`]. The lifecycle calls are
//! thin wrappers over the generic [`ProxmoxApi::post_task`] primitive, which
//! is also what the backup request uses.

mod client;
mod types;

pub use client::ProxmoxClient;
pub use types::{ContainerSpec, NetworkInterface, TaskHandle, TaskStatus, VmKind, VmRef};

use async_trait::async_trait;
use proxlxc_shared::errors::ProxlxcResult;

pub type Form = [(String, String)];

#[async_trait]
pub trait ProxmoxApi: Send + Sync {
    /// Next free cluster-wide VMID.
    async fn next_vmid(&self) -> ProxlxcResult<u32>;

    /// POST a form to a task-returning endpoint.
    async fn post_task(&self, path: &str, form: &Form) -> ProxlxcResult<TaskHandle>;

    /// Block until the task stops. A non-`OK` exit status is an error.
    async fn wait_for_task(&self, task: &TaskHandle) -> ProxlxcResult<()>;

    async fn delete_container(&self, vm: &VmRef) -> ProxlxcResult<TaskHandle>;

    async fn container_interfaces(&self, vm: &VmRef) -> ProxlxcResult<Vec<NetworkInterface>>;

    /// Filesystem path of a storage, `None` for storages without one (LVM, RBD, ...).
    async fn storage_path(&self, storage: &str) -> ProxlxcResult<Option<String>>;

    async fn create_container(&self, node: &str, spec: &ContainerSpec) -> ProxlxcResult<TaskHandle> {
        self.post_task(&format!("/nodes/{}/lxc", node), &spec.to_form())
            .await
    }

    async fn start_container(&self, vm: &VmRef) -> ProxlxcResult<TaskHandle> {
        self.post_task(&format!("{}/status/start", vm.api_path()), &[])
            .await
    }

    /// Graceful shutdown.
    async fn shutdown_container(&self, vm: &VmRef) -> ProxlxcResult<TaskHandle> {
        self.post_task(&format!("{}/status/shutdown", vm.api_path()), &[])
            .await
    }

    /// Hard stop.
    async fn stop_container(&self, vm: &VmRef) -> ProxlxcResult<TaskHandle> {
        self.post_task(&format!("{}/status/stop", vm.api_path()), &[])
            .await
    }
}
