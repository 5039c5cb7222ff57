//! Build steps, in execution order.
//!
//! ```text
//!   1. CreateContainer   (allocate VMID, create + start the container)
//!   2. ServeHttp         (optional scratch file server)
//!   3. Connect           (open the guest communicator)
//!   4. Provision         (run the hook)
//!   5. CleanupTempKeys   (drop the bootstrap key, best effort)
//!   6. ConvertToTemplate (shutdown, vzdump, fetch archive, delete source)
//! ```

mod cleanup_temp_keys;
mod connect;
mod convert;
mod create_container;
mod http_server;
mod provision;

pub use cleanup_temp_keys::CleanupTempKeysStep;
pub use connect::ConnectStep;
pub use convert::ConvertToTemplateStep;
pub use create_container::CreateContainerStep;
pub use http_server::ServeHttpStep;
pub use provision::ProvisionStep;

use proxlxc_shared::errors::ProxlxcError;

use super::state::BuildState;
use crate::pipeline::{BoxedStep, StepAction};

/// The full step list for one build.
pub fn build_steps() -> Vec<BoxedStep<BuildState>> {
    vec![
        Box::new(CreateContainerStep),
        Box::new(ServeHttpStep),
        Box::new(ConnectStep),
        Box::new(ProvisionStep),
        Box::new(CleanupTempKeysStep),
        Box::new(ConvertToTemplateStep),
    ]
}

/// Record a fatal step error and halt.
pub(crate) fn halt(state: &mut BuildState, step: &str, err: ProxlxcError) -> StepAction {
    tracing::error!(step, vmid = ?state.vmid(), "Step failed: {}", err);
    state.ui.error(&err.to_string());
    state.error = Some(err);
    StepAction::Halt
}
