//! Step: ConvertToTemplate - turn the provisioned container into a local archive.
//!
//! ```text
//! shutdown ─▶ vzdump (task) ─▶ resolve dump dir ─▶ SFTP list ─▶ download ─▶ delete source
//!   STOPPED      BACKED_UP                                      DOWNLOADED  SOURCE_DELETED
//! ```
//!
//! The archive is written to a temporary file beside `output_path` and
//! persisted only once the byte count matches the listing, so a truncated
//! transfer never leaves a file at the output path. A build cancelled after
//! the download has its archive removed again by cleanup.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::halt;
use crate::builder::state::{BuildPhase, BuildState};
use crate::pipeline::{Step, StepAction};
use crate::proxmox::VmRef;
use crate::transfer::{NodeTarget, RemoteFile};

const NAME: &str = "convert_to_template";

pub struct ConvertToTemplateStep;

#[async_trait]
impl Step<BuildState> for ConvertToTemplateStep {
    async fn run(&self, state: &mut BuildState, _cancel: &CancellationToken) -> StepAction {
        let Some(vm) = state.vm_ref.clone() else {
            return halt(
                state,
                NAME,
                ProxlxcError::Internal("create_container step must run first".into()),
            );
        };

        if let Err(e) = convert(state, &vm).await {
            return halt(state, NAME, e);
        }

        delete_source(state, &vm).await;
        StepAction::Continue
    }

    /// A build that ends cancelled or failed keeps no archive at `output_path`.
    async fn cleanup(&self, state: &mut BuildState) {
        if !state.is_failing() {
            return;
        }
        let Some(path) = state.template_path.take() else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::info!(path = %path.display(), "Removed template archive of an unfinished build"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => state.ui.error(&format!(
                "Error removing template file {}. Please delete it manually: {}",
                path.display(),
                e
            )),
        }
    }

    fn name(&self) -> &str {
        NAME
    }
}

async fn convert(state: &mut BuildState, vm: &VmRef) -> ProxlxcResult<()> {
    let config = Arc::clone(&state.config);
    let api = Arc::clone(&state.api);
    let ui = Arc::clone(&state.ui);

    // Shutdown
    ui.say("Stopping LXC Container");
    let task = api
        .shutdown_container(vm)
        .await
        .map_err(|e| e.context("Error converting VM to template, could not stop"))?;
    api.wait_for_task(&task)
        .await
        .map_err(|e| e.context("Error converting VM to template, could not stop"))?;
    state.advance(BuildPhase::Stopped);

    // Backup
    ui.say("Converting LXC Container to template");
    let form = vzdump_form(&config.template_storage_pool, vm.vmid);
    let task = api
        .post_task(&format!("/nodes/{}/vzdump", vm.node), &form)
        .await
        .map_err(|e| e.context("Error converting VM to template, failed to create backup"))?;
    api.wait_for_task(&task).await.map_err(|e| {
        e.context("Error converting VM to template, failed to wait process completion")
    })?;
    state.advance(BuildPhase::BackedUp);

    // Locate
    let storage_path = api
        .storage_path(&config.template_storage_pool)
        .await?
        .ok_or_else(|| {
            ProxlxcError::Storage(format!(
                "storage {} has no filesystem path, cannot fetch its dump directory",
                config.template_storage_pool
            ))
        })?;
    let dump_dir = format!("{}/dump", storage_path.trim_end_matches('/'));
    tracing::debug!(vmid = vm.vmid, dump_dir = %dump_dir, "Resolved dump directory");

    let target = NodeTarget::from_config(&config)?;
    ui.message(&format!(
        "Establishing SSH connection with {} at {} for template file...",
        target.username,
        target.address()
    ));
    ui.message("Establishing SFTP connection for template file...");
    let mut session = state.node_files.connect(&target).await?;

    ui.message("Listing vzdump backup directory for template backup...");
    let entries = session.read_dir(&dump_dir).await?;
    let Some(backup) = select_backup(&entries, vm.vmid)? else {
        ui.error(
            "vzdump was called with remove=1; retention may have rotated this backup away before it could be fetched",
        );
        return Err(ProxlxcError::Transfer(format!(
            "could not find backup file for LXC container {}",
            vm.vmid
        )));
    };
    let remote = format!("{}/{}", dump_dir, backup.name);

    // Transfer
    ui.message(&format!("Opening vzdump template backup {}...", remote));
    let output = config.output_path.clone();
    ui.message(&format!("Creating local template file {}...", output.display()));
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    tokio::fs::create_dir_all(&parent).await?;
    let partial = tempfile::NamedTempFile::new_in(&parent)?;

    ui.message("Transferring vzdump template backup file to local path...");
    let written = session.download(&remote, partial.reopen()?).await?;
    if let Some(expected) = backup.size
        && written != expected
    {
        return Err(ProxlxcError::Transfer(format!(
            "transfer of {} was truncated: received {} of {} bytes",
            remote, written, expected
        )));
    }

    partial
        .persist(&output)
        .map_err(|e| ProxlxcError::Io(e.error))?;
    tracing::info!(
        vmid = vm.vmid,
        bytes = written,
        path = %output.display(),
        "Template archive downloaded"
    );
    state.template_path = Some(output);
    state.advance(BuildPhase::Downloaded);
    Ok(())
}

/// Failure here leaves the artifact valid; it is reported, not fatal.
async fn delete_source(state: &mut BuildState, vm: &VmRef) {
    let api = Arc::clone(&state.api);
    state.ui.say("Deleting LXC Container");

    let deleted = match api.delete_container(vm).await {
        Ok(task) => api.wait_for_task(&task).await,
        Err(e) => Err(e),
    };
    match deleted {
        Ok(()) => {
            state.source_deleted = true;
            state.advance(BuildPhase::SourceDeleted);
        }
        Err(e) => {
            tracing::warn!(vmid = vm.vmid, "Failed to delete source container: {}", e);
            state.ui.error(&format!(
                "Error deleting VM. Please delete it manually: {}",
                e
            ));
        }
    }
}

fn vzdump_form(storage: &str, vmid: u32) -> Vec<(String, String)> {
    vec![
        ("mode".into(), "stop".into()),
        ("compress".into(), "gzip".into()),
        ("remove".into(), "1".into()),
        ("storage".into(), storage.into()),
        ("vmid".into(), vmid.to_string()),
    ]
}

/// Last entry, in listing order, that is a gzip vzdump archive of `vmid`.
fn select_backup(entries: &[RemoteFile], vmid: u32) -> ProxlxcResult<Option<&RemoteFile>> {
    let pattern = Regex::new(&format!(r"^vzdump-lxc-{}-.*\.tar\.gz$", vmid))
        .map_err(|e| ProxlxcError::Internal(format!("backup file pattern: {}", e)))?;
    Ok(entries.iter().rev().find(|entry| pattern.is_match(&entry.name)))
}
