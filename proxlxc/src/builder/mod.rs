//! Builder - one template build from configuration to artifact.
//!
//! ## Architecture
//!
//! - `state`: build phases and the state threaded through the steps
//! - `backends`: REST client, node file access and guest connector
//! - `steps`: the six build steps and their cleanups
//! - `artifact`: the produced template archive
//!
//! `prepare` validates configuration once; `run` connects the backends and
//! drives the steps through the [`Sequencer`](crate::pipeline::Sequencer).

mod artifact;
mod backends;
mod state;
pub mod steps;

pub use artifact::Artifact;
pub use backends::Backends;
pub use state::{BuildPhase, BuildState};

use std::sync::Arc;

use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{self, Config};
use crate::hook::Hook;
use crate::pipeline::Sequencer;
use crate::ui::{FilteredUi, Ui};

/// Drives a single build.
///
/// ```ignore
/// let mut builder = Builder::new();
/// let warnings = builder.prepare(&[raw_config])?;
/// let artifact = builder.run(CancellationToken::new(), ui, hook).await?;
/// ```
#[derive(Debug, Default)]
pub struct Builder {
    config: Option<Config>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode, default and validate the raw configuration sources.
    ///
    /// Later sources override earlier ones. Returns non-fatal warnings.
    pub fn prepare(&mut self, raws: &[Value]) -> ProxlxcResult<Vec<String>> {
        let (config, warnings) = config::prepare(raws)?;
        self.config = Some(config);
        Ok(warnings)
    }

    /// Prepare from an already-resolved configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            config: Some(config),
        }
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    /// Run the build against the real Proxmox backends.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        ui: Arc<dyn Ui>,
        hook: Arc<dyn Hook>,
    ) -> ProxlxcResult<Artifact> {
        let config = self.prepared()?;
        config.register_secrets();
        let ui: Arc<dyn Ui> = Arc::new(FilteredUi::new(ui));

        let backends = tokio::select! {
            result = Backends::connect(config) => result,
            _ = cancel.cancelled() => return Err(ProxlxcError::Cancelled),
        };
        let backends = match backends {
            Ok(backends) => backends,
            Err(e) => {
                let e = e.context("Error connecting to Proxmox API");
                ui.error(&e.to_string());
                return Err(e);
            }
        };

        self.execute(backends, &cancel, ui, hook).await
    }

    /// Run the build against caller-supplied backends.
    pub async fn run_with(
        &self,
        backends: Backends,
        cancel: CancellationToken,
        ui: Arc<dyn Ui>,
        hook: Arc<dyn Hook>,
    ) -> ProxlxcResult<Artifact> {
        self.prepared()?.register_secrets();
        let ui: Arc<dyn Ui> = Arc::new(FilteredUi::new(ui));
        self.execute(backends, &cancel, ui, hook).await
    }

    fn prepared(&self) -> ProxlxcResult<&Config> {
        self.config
            .as_ref()
            .ok_or_else(|| ProxlxcError::InvalidState("prepare must be called before run".into()))
    }

    async fn execute(
        &self,
        backends: Backends,
        cancel: &CancellationToken,
        ui: Arc<dyn Ui>,
        hook: Arc<dyn Hook>,
    ) -> ProxlxcResult<Artifact> {
        let config = Arc::new(self.prepared()?.clone());
        let mut state = BuildState::new(config, backends, ui, hook);

        let sequencer = Sequencer::new(steps::build_steps());
        let metrics = sequencer.run(&mut state, cancel).await;
        metrics.log_summary();

        if let Some(err) = state.error.take() {
            state.advance(BuildPhase::Failed);
            return Err(err);
        }
        if state.cancelled {
            state.advance(BuildPhase::Failed);
            tracing::info!(vmid = ?state.vmid(), "Build cancelled");
            return Err(ProxlxcError::Cancelled);
        }

        let template_path = state
            .template_path
            .take()
            .ok_or_else(|| ProxlxcError::Internal("convert step must run first".into()))?;
        state.advance(BuildPhase::Success);
        tracing::info!(
            vmid = ?state.vmid(),
            path = %template_path.display(),
            "Build finished"
        );

        Ok(Artifact::new(
            template_path,
            std::mem::take(&mut state.generated_data),
        ))
    }
}
