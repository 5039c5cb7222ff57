//! Provisioning hook.
//!
//! The provisioning engine is external; the builder only promises to call
//! the hook once, with a live communicator, and to keep whatever data it
//! hands back.

use std::collections::BTreeMap;

use async_trait::async_trait;
use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use serde_json::Value;

use crate::communicator::Communicator;
use crate::ui::Ui;

/// Data produced during the build, exposed through `Artifact::state`.
pub type GeneratedData = BTreeMap<String, Value>;

/// Event name passed to the hook when provisioning starts.
pub const HOOK_PROVISION: &str = "provision";

#[async_trait]
pub trait Hook: Send + Sync {
    /// Run the provisioners. `communicator` is `None` when the build has no
    /// guest channel.
    async fn run(
        &self,
        event: &str,
        ui: &dyn Ui,
        communicator: Option<&dyn Communicator>,
        data: &GeneratedData,
    ) -> ProxlxcResult<GeneratedData>;
}

/// Does nothing.
pub struct NoopHook;

#[async_trait]
impl Hook for NoopHook {
    async fn run(
        &self,
        _event: &str,
        _ui: &dyn Ui,
        _communicator: Option<&dyn Communicator>,
        _data: &GeneratedData,
    ) -> ProxlxcResult<GeneratedData> {
        Ok(GeneratedData::new())
    }
}

/// Runs inline shell commands in order. A non-zero exit fails provisioning.
pub struct ShellHook {
    inline: Vec<String>,
}

impl ShellHook {
    pub fn new(inline: Vec<String>) -> Self {
        Self { inline }
    }
}

#[async_trait]
impl Hook for ShellHook {
    async fn run(
        &self,
        event: &str,
        ui: &dyn Ui,
        communicator: Option<&dyn Communicator>,
        _data: &GeneratedData,
    ) -> ProxlxcResult<GeneratedData> {
        if self.inline.is_empty() {
            return Ok(GeneratedData::new());
        }
        let comm = communicator.ok_or_else(|| {
            ProxlxcError::InvalidState("shell provisioner requires a communicator".into())
        })?;

        ui.say("Provisioning with shell commands...");
        for (index, command) in self.inline.iter().enumerate() {
            tracing::debug!(event, index, "Running inline command");
            ui.message(&format!("Running: {}", command));

            let output = comm.run(command).await?;
            for line in output.stdout.lines() {
                ui.message(line);
            }
            for line in output.stderr.lines() {
                ui.error(line);
            }
            if !output.success() {
                return Err(ProxlxcError::InvalidState(format!(
                    "command {:?} exited with status {}",
                    command, output.exit_status
                )));
            }
        }

        let mut data = GeneratedData::new();
        data.insert("shell_commands".into(), Value::from(self.inline.len()));
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::CommandOutput;
    use std::sync::Mutex;

    struct ScriptedComm {
        exit_status: i32,
        ran: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Communicator for ScriptedComm {
        async fn run(&self, command: &str) -> ProxlxcResult<CommandOutput> {
            self.ran.lock().unwrap().push(command.to_string());
            Ok(CommandOutput {
                exit_status: self.exit_status,
                stdout: format!("ran {}", command),
                stderr: String::new(),
            })
        }

        async fn close(&self) -> ProxlxcResult<()> {
            Ok(())
        }
    }

    struct SilentUi;

    impl Ui for SilentUi {
        fn say(&self, _: &str) {}
        fn message(&self, _: &str) {}
        fn error(&self, _: &str) {}
    }

    #[tokio::test]
    async fn shell_hook_runs_commands_in_order() {
        let comm = ScriptedComm {
            exit_status: 0,
            ran: Mutex::new(Vec::new()),
        };
        let hook = ShellHook::new(vec!["apt-get update".into(), "apt-get -y upgrade".into()]);

        let data = hook
            .run(HOOK_PROVISION, &SilentUi, Some(&comm), &GeneratedData::new())
            .await
            .unwrap();

        assert_eq!(
            *comm.ran.lock().unwrap(),
            vec!["apt-get update".to_string(), "apt-get -y upgrade".to_string()]
        );
        assert_eq!(data.get("shell_commands"), Some(&Value::from(2)));
    }

    #[tokio::test]
    async fn shell_hook_stops_on_failure() {
        let comm = ScriptedComm {
            exit_status: 2,
            ran: Mutex::new(Vec::new()),
        };
        let hook = ShellHook::new(vec!["false".into(), "true".into()]);

        let err = hook
            .run(HOOK_PROVISION, &SilentUi, Some(&comm), &GeneratedData::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("exited with status 2"));
        assert_eq!(comm.ran.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shell_hook_needs_a_channel() {
        let hook = ShellHook::new(vec!["true".into()]);
        let result = hook
            .run(HOOK_PROVISION, &SilentUi, None, &GeneratedData::new())
            .await;
        assert!(matches!(result, Err(ProxlxcError::InvalidState(_))));
    }
}
