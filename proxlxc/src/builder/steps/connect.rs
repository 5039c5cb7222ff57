//! Step: Connect - open the guest communicator.
//!
//! Retries with exponential backoff until the guest answers, `ssh_timeout`
//! elapses, or the build is cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::halt;
use crate::builder::state::{BuildPhase, BuildState};
use crate::config::{CommunicatorKind, Config, ProvisionAddress};
use crate::pipeline::{Step, StepAction};
use crate::proxmox::{ProxmoxApi, VmRef};

const NAME: &str = "connect";
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(16);

pub struct ConnectStep;

#[async_trait]
impl Step<BuildState> for ConnectStep {
    async fn run(&self, state: &mut BuildState, cancel: &CancellationToken) -> StepAction {
        let config = Arc::clone(&state.config);
        if config.comm.kind() == CommunicatorKind::None {
            state.ui.say("Not using a communicator");
            state.advance(BuildPhase::Connected);
            return StepAction::Continue;
        }

        let Some(vm) = state.vm_ref.clone() else {
            return halt(
                state,
                NAME,
                ProxlxcError::Internal("create_container step must run first".into()),
            );
        };

        if !config.boot.wait().is_zero() {
            state.ui.say(&format!(
                "Waiting {}s for the container to boot",
                config.boot.boot_wait
            ));
            tokio::select! {
                _ = tokio::time::sleep(config.boot.wait()) => {}
                _ = cancel.cancelled() => return StepAction::Halt,
            }
        }

        state.ui.say(&format!(
            "Waiting for SSH to become available on port {}",
            config.comm.ssh_port
        ));

        let api = Arc::clone(&state.api);
        let guest = Arc::clone(&state.guest);
        let deadline = Instant::now() + config.comm.timeout();
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return StepAction::Halt;
            }
            attempt += 1;

            let result = match resolve_host(&config, api.as_ref(), &vm).await {
                Ok(host) => guest
                    .connect(&host, &config.comm)
                    .await
                    .map(|comm| (host, comm)),
                Err(e) => Err(e),
            };

            let err = match result {
                Ok((host, comm)) => {
                    tracing::info!(vmid = vm.vmid, host = %host, attempt, "Guest communicator connected");
                    state.ui.say("Connected to SSH!");
                    state.comm_host = Some(host);
                    state.communicator = Some(comm);
                    state.advance(BuildPhase::Connected);
                    return StepAction::Continue;
                }
                Err(e) => e,
            };

            tracing::debug!(vmid = vm.vmid, attempt, "Guest not reachable yet: {}", err);
            if Instant::now() + backoff > deadline {
                return halt(
                    state,
                    NAME,
                    ProxlxcError::GuestUnreachable(format!(
                        "timeout after {}s waiting for SSH: {}",
                        config.comm.ssh_timeout, err
                    )),
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return StepAction::Halt,
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn cleanup(&self, state: &mut BuildState) {
        if let Some(comm) = state.communicator.take()
            && let Err(e) = comm.close().await
        {
            tracing::warn!("Failed to close communicator: {}", e);
        }
    }

    fn name(&self) -> &str {
        NAME
    }
}

/// Address to open the communicator against.
///
/// A configured static address is used as is. Under DHCP the container's
/// interfaces are queried and the first non-loopback address wins.
pub(crate) async fn resolve_host(config: &Config, api: &dyn ProxmoxApi, vm: &VmRef) -> ProxlxcResult<String> {
    match config.provision_address()? {
        ProvisionAddress::Static { addr, .. } => Ok(addr.to_string()),
        ProvisionAddress::Dhcp => {
            let interfaces = api.container_interfaces(vm).await?;
            interfaces
                .iter()
                .find_map(|iface| iface.address())
                .map(|ip| ip.to_string())
                .ok_or_else(|| {
                    ProxlxcError::GuestUnreachable(format!(
                        "container {} has no non-loopback address yet",
                        vm.vmid
                    ))
                })
        }
    }
}
