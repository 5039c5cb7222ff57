//! Per-build state shared by every step.
//!
//! Services are fixed when the build starts. Step results are `Option`s
//! that start empty and are filled by the step that owns them.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use proxlxc_shared::errors::ProxlxcError;

use super::backends::Backends;
use crate::communicator::{Communicator, GuestConnector};
use crate::config::Config;
use crate::hook::{GeneratedData, Hook};
use crate::http_server::HttpServer;
use crate::pipeline::PipelineState;
use crate::proxmox::{ProxmoxApi, VmRef};
use crate::transfer::NodeFiles;
use crate::ui::Ui;

/// Where a build is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildPhase {
    Initial,
    Creating,
    Created,
    HttpUp,
    Connected,
    Provisioned,
    KeysClean,
    Stopped,
    BackedUp,
    Downloaded,
    SourceDeleted,
    Success,
    Failed,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Initial => "INITIAL",
            BuildPhase::Creating => "CREATING",
            BuildPhase::Created => "CREATED",
            BuildPhase::HttpUp => "HTTP_UP",
            BuildPhase::Connected => "CONNECTED",
            BuildPhase::Provisioned => "PROVISIONED",
            BuildPhase::KeysClean => "KEYS_CLEAN",
            BuildPhase::Stopped => "STOPPED",
            BuildPhase::BackedUp => "BACKED_UP",
            BuildPhase::Downloaded => "DOWNLOADED",
            BuildPhase::SourceDeleted => "SOURCE_DELETED",
            BuildPhase::Success => "SUCCESS",
            BuildPhase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct BuildState {
    // Services
    pub config: Arc<Config>,
    pub api: Arc<dyn ProxmoxApi>,
    pub node_files: Arc<dyn NodeFiles>,
    pub guest: Arc<dyn GuestConnector>,
    pub ui: Arc<dyn Ui>,
    pub hook: Arc<dyn Hook>,

    // Step results
    pub vm_ref: Option<VmRef>,
    pub http_server: Option<HttpServer>,
    pub http_ip: Option<IpAddr>,
    pub http_port: Option<u16>,
    pub comm_host: Option<String>,
    pub communicator: Option<Arc<dyn Communicator>>,
    pub template_path: Option<PathBuf>,
    pub generated_data: GeneratedData,

    // Outcome
    pub error: Option<ProxlxcError>,
    pub cancelled: bool,
    /// Set once the container has been deleted, by Convert or by cleanup.
    pub source_deleted: bool,
    phase: BuildPhase,
}

impl BuildState {
    pub fn new(config: Arc<Config>, backends: Backends, ui: Arc<dyn Ui>, hook: Arc<dyn Hook>) -> Self {
        Self {
            config,
            api: backends.api,
            node_files: backends.node_files,
            guest: backends.guest,
            ui,
            hook,
            vm_ref: None,
            http_server: None,
            http_ip: None,
            http_port: None,
            comm_host: None,
            communicator: None,
            template_path: None,
            generated_data: GeneratedData::new(),
            error: None,
            cancelled: false,
            source_deleted: false,
            phase: BuildPhase::Initial,
        }
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    pub fn advance(&mut self, next: BuildPhase) {
        if next == self.phase {
            return;
        }
        tracing::debug!(
            vmid = ?self.vmid(),
            from = %self.phase,
            to = %next,
            "Build phase changed"
        );
        self.phase = next;
    }

    pub fn vmid(&self) -> Option<u32> {
        self.vm_ref.as_ref().map(|vm| vm.vmid)
    }

    /// Whether the build is ending without an artifact.
    pub fn is_failing(&self) -> bool {
        self.error.is_some() || self.cancelled
    }
}

impl PipelineState for BuildState {
    /// A recorded error takes precedence; the two outcomes never coexist.
    fn set_cancelled(&mut self) {
        if self.error.is_none() {
            self.cancelled = true;
        }
    }
}
