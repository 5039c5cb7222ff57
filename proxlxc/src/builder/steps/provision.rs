//! Step: Provision - hand the live container to the provisioning hook.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::halt;
use crate::builder::state::{BuildPhase, BuildState};
use crate::hook::HOOK_PROVISION;
use crate::pipeline::{Step, StepAction};

const NAME: &str = "provision";

pub struct ProvisionStep;

#[async_trait]
impl Step<BuildState> for ProvisionStep {
    async fn run(&self, state: &mut BuildState, _cancel: &CancellationToken) -> StepAction {
        seed_generated_data(state);

        let hook = Arc::clone(&state.hook);
        let ui = Arc::clone(&state.ui);
        let communicator = state.communicator.clone();

        ui.say("Running provisioners");
        let produced = hook
            .run(
                HOOK_PROVISION,
                ui.as_ref(),
                communicator.as_deref(),
                &state.generated_data,
            )
            .await;

        match produced {
            Ok(data) => {
                tracing::debug!(entries = data.len(), "Provisioning produced data");
                state.generated_data.extend(data);
                state.advance(BuildPhase::Provisioned);
                StepAction::Continue
            }
            Err(e) => halt(state, NAME, e.context("Error provisioning")),
        }
    }

    fn name(&self) -> &str {
        NAME
    }
}

/// Connection facts provisioning scripts may template against.
fn seed_generated_data(state: &mut BuildState) {
    let config = Arc::clone(&state.config);
    let host = state
        .comm_host
        .clone()
        .unwrap_or_else(|| config.provision_ip.clone());

    let data = &mut state.generated_data;
    data.insert("host".into(), Value::from(host));
    data.insert("port".into(), Value::from(config.comm.ssh_port));
    data.insert("user".into(), Value::from(config.comm.ssh_username.clone()));
    if let Some(vmid) = state.vm_ref.as_ref().map(|vm| vm.vmid) {
        data.insert("vmid".into(), Value::from(vmid));
    }
    if let Some(ip) = state.http_ip {
        data.insert("http_ip".into(), Value::from(ip.to_string()));
    }
    if let Some(port) = state.http_port {
        data.insert("http_port".into(), Value::from(port));
    }
}
