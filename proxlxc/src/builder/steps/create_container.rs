//! Step: CreateContainer - create and start the build container.
//!
//! The container is recorded in the state while the create request is in
//! flight, so cleanup can remove it even if the build is cancelled mid-request
//! or the create task or the start fails afterwards. A rejected create clears
//! the record again.

use std::sync::Arc;

use async_trait::async_trait;
use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use tokio_util::sync::CancellationToken;

use super::halt;
use crate::builder::state::{BuildPhase, BuildState};
use crate::pipeline::{Step, StepAction};
use crate::proxmox::{ContainerSpec, VmRef};

const NAME: &str = "create_container";

pub struct CreateContainerStep;

#[async_trait]
impl Step<BuildState> for CreateContainerStep {
    async fn run(&self, state: &mut BuildState, _cancel: &CancellationToken) -> StepAction {
        state.advance(BuildPhase::Creating);
        match create_and_start(state).await {
            Ok(vm) => {
                state
                    .generated_data
                    .insert("vmid".into(), serde_json::Value::from(vm.vmid));
                state.advance(BuildPhase::Created);
                StepAction::Continue
            }
            Err(e) => halt(state, NAME, e),
        }
    }

    async fn cleanup(&self, state: &mut BuildState) {
        if !state.is_failing() || state.source_deleted {
            return;
        }
        let Some(vm) = state.vm_ref.clone() else {
            return;
        };

        let api = Arc::clone(&state.api);
        state.ui.say(&format!("Stopping and deleting LXC container {}", vm.vmid));

        let stopped = match api.stop_container(&vm).await {
            Ok(task) => api.wait_for_task(&task).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stopped {
            // Already-stopped containers refuse a stop; the delete below still applies.
            tracing::warn!(vmid = vm.vmid, "Failed to stop container during cleanup: {}", e);
        }

        let deleted = match api.delete_container(&vm).await {
            Ok(task) => api.wait_for_task(&task).await,
            Err(e) => Err(e),
        };
        match deleted {
            Ok(()) => {
                state.source_deleted = true;
                state.ui.message(&format!("Deleted LXC container {}", vm.vmid));
            }
            Err(e) => state.ui.error(&format!(
                "Error deleting VM. Please delete it manually: {}",
                e
            )),
        }
    }

    fn name(&self) -> &str {
        NAME
    }
}

async fn create_and_start(state: &mut BuildState) -> ProxlxcResult<VmRef> {
    let config = Arc::clone(&state.config);
    let api = Arc::clone(&state.api);

    let vmid = if config.vmid == 0 {
        let vmid = api
            .next_vmid()
            .await
            .map_err(|e| e.context("Error getting next free VMID"))?;
        tracing::info!(vmid, "Allocated VMID");
        vmid
    } else {
        config.vmid
    };

    let public_key = tokio::fs::read_to_string(&config.provision_public_key_file)
        .await
        .map_err(|e| {
            ProxlxcError::Config(format!(
                "could not read provision_public_key_file {}: {}",
                config.provision_public_key_file.display(),
                e
            ))
        })?;
    let spec = ContainerSpec::from_config(&config, vmid, public_key.trim().to_string())?;

    state.ui.say("Creating LXC container");
    // Recorded before the request: a cancel can drop this future after
    // Proxmox has accepted the create.
    let vm = VmRef::lxc(vmid, config.node.clone());
    state.vm_ref = Some(vm.clone());
    let task = match api.create_container(&config.node, &spec).await {
        Ok(task) => task,
        Err(e) => {
            // Rejected, so the VMID may belong to somebody else's container.
            state.vm_ref = None;
            return Err(e.context("Error creating LXC container"));
        }
    };
    tracing::debug!(vmid, node = %vm.node, upid = %task, "Create task submitted");

    api.wait_for_task(&task)
        .await
        .map_err(|e| e.context("Error creating LXC container"))?;

    state.ui.say("Starting LXC container");
    let task = api
        .start_container(&vm)
        .await
        .map_err(|e| e.context("Error starting LXC container"))?;
    api.wait_for_task(&task)
        .await
        .map_err(|e| e.context("Error starting LXC container"))?;

    state
        .ui
        .message(&format!("Container {} is running on {}", vmid, vm.node));
    Ok(vm)
}
