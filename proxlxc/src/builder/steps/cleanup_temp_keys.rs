//! Step: CleanupTempKeys - remove the bootstrap key from the guest.
//!
//! Best effort. A failure is reported to the operator and the build goes on.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::builder::state::{BuildPhase, BuildState};
use crate::pipeline::{Step, StepAction};

const NAME: &str = "cleanup_temp_keys";

pub struct CleanupTempKeysStep;

#[async_trait]
impl Step<BuildState> for CleanupTempKeysStep {
    async fn run(&self, state: &mut BuildState, _cancel: &CancellationToken) -> StepAction {
        let config = Arc::clone(&state.config);
        let comm = match state.communicator.clone() {
            Some(comm) if config.comm.ssh_clear_authorized_keys => comm,
            _ => {
                state.advance(BuildPhase::KeysClean);
                return StepAction::Continue;
            }
        };

        state
            .ui
            .say("Trying to remove ephemeral keys from authorized_keys files");

        let key = match tokio::fs::read_to_string(&config.provision_public_key_file).await {
            Ok(key) => key,
            Err(e) => {
                state.ui.error(&format!("Error reading the ephemeral public key: {}", e));
                state.advance(BuildPhase::KeysClean);
                return StepAction::Continue;
            }
        };

        match key_body(&key) {
            Some(body) => match comm.run(&removal_command(body)).await {
                Ok(output) if output.success() => {
                    state.ui.message("Removed the ephemeral key from authorized_keys");
                }
                Ok(output) => state.ui.error(&format!(
                    "Error removing temporary SSH keys: exit status {}: {}",
                    output.exit_status,
                    output.stderr.trim()
                )),
                Err(e) => state
                    .ui
                    .error(&format!("Error removing temporary SSH keys: {}", e)),
            },
            None => state
                .ui
                .error("Error removing temporary SSH keys: public key file is empty"),
        }

        state.advance(BuildPhase::KeysClean);
        StepAction::Continue
    }

    fn name(&self) -> &str {
        NAME
    }
}

/// Base64 body of an OpenSSH public key line (`type body [comment]`).
fn key_body(public_key: &str) -> Option<&str> {
    let mut fields = public_key.split_whitespace();
    let first = fields.next()?;
    Some(fields.next().unwrap_or(first))
}

fn removal_command(key_body: &str) -> String {
    let quoted = format!("'{}'", key_body.replace('\'', r"'\''"));
    format!(
        "grep -v -F -- {} ~/.ssh/authorized_keys > ~/.ssh/authorized_keys.tmp; \
         mv ~/.ssh/authorized_keys.tmp ~/.ssh/authorized_keys",
        quoted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_the_key_body() {
        assert_eq!(
            key_body("ssh-ed25519 AAAAC3Nza builder@ci\n"),
            Some("AAAAC3Nza")
        );
        assert_eq!(key_body("AAAAonly"), Some("AAAAonly"));
        assert_eq!(key_body("   \n"), None);
    }

    #[test]
    fn removal_command_quotes_the_key() {
        let cmd = removal_command("AAAA+/x=");
        assert!(cmd.starts_with("grep -v -F -- 'AAAA+/x=' ~/.ssh/authorized_keys"));
        assert!(cmd.ends_with("mv ~/.ssh/authorized_keys.tmp ~/.ssh/authorized_keys"));
    }
}
