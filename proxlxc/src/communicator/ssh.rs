//! SSH communicator backed by `ssh2`.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use ssh2::Session;

use super::{CommandOutput, Communicator, GuestConnector};
use crate::config::CommConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// SSH authentication methods, in the order they are tried.
#[derive(Debug, Clone)]
enum SshAuth {
    Key(std::path::PathBuf),
    Password(String),
}

pub struct SshConnector;

#[async_trait]
impl GuestConnector for SshConnector {
    async fn connect(&self, host: &str, comm: &CommConfig) -> ProxlxcResult<Arc<dyn Communicator>> {
        let host = host.to_string();
        let comm = comm.clone();

        let session = tokio::task::spawn_blocking(move || create_session(&host, &comm))
            .await
            .map_err(|e| ProxlxcError::Internal(format!("SSH connect task failed: {}", e)))??;

        Ok(Arc::new(SshCommunicator {
            session: Arc::new(Mutex::new(Some(session))),
        }))
    }
}

fn create_session(host: &str, comm: &CommConfig) -> ProxlxcResult<Session> {
    let address = if host.contains(':') {
        format!("[{}]:{}", host, comm.ssh_port)
    } else {
        format!("{}:{}", host, comm.ssh_port)
    };
    let socket = address
        .to_socket_addrs()
        .map_err(|e| ProxlxcError::GuestUnreachable(format!("failed to resolve {}: {}", address, e)))?
        .next()
        .ok_or_else(|| ProxlxcError::GuestUnreachable(format!("{} did not resolve", address)))?;

    let tcp = TcpStream::connect_timeout(&socket, CONNECT_TIMEOUT).map_err(|e| {
        ProxlxcError::GuestUnreachable(format!("TCP connection to {} failed: {}", address, e))
    })?;

    let mut session = Session::new().map_err(|e| {
        ProxlxcError::GuestUnreachable(format!("SSH session creation failed: {}", e))
    })?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| ProxlxcError::GuestUnreachable(format!("SSH handshake failed: {}", e)))?;

    let mut methods = Vec::new();
    if !comm.ssh_private_key_file.as_os_str().is_empty() {
        methods.push(SshAuth::Key(comm.ssh_private_key_file.clone()));
    }
    if let Some(ref password) = comm.ssh_password {
        methods.push(SshAuth::Password(password.clone()));
    }

    let mut last_error = None;
    for method in methods {
        let result = match &method {
            SshAuth::Key(key_path) => {
                session.userauth_pubkey_file(&comm.ssh_username, None, key_path, None)
            }
            SshAuth::Password(password) => session.userauth_password(&comm.ssh_username, password),
        };
        match result {
            Ok(()) if session.authenticated() => {
                tracing::debug!(address = %address, user = %comm.ssh_username, "Guest SSH session opened");
                return Ok(session);
            }
            Ok(()) => {}
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(ProxlxcError::GuestUnreachable(format!(
        "SSH authentication as {} failed: {}",
        comm.ssh_username,
        last_error.unwrap_or_else(|| "no authentication method configured".into())
    )))
}

pub struct SshCommunicator {
    session: Arc<Mutex<Option<Session>>>,
}

#[async_trait]
impl Communicator for SshCommunicator {
    async fn run(&self, command: &str) -> ProxlxcResult<CommandOutput> {
        let session = Arc::clone(&self.session);
        let command = command.to_string();

        tokio::task::spawn_blocking(move || -> ProxlxcResult<CommandOutput> {
            let guard = session.lock().unwrap_or_else(|e| e.into_inner());
            let session = guard
                .as_ref()
                .ok_or_else(|| ProxlxcError::InvalidState("communicator is closed".into()))?;

            let ssh_err = |what: &str, e: ssh2::Error| {
                ProxlxcError::GuestUnreachable(format!("{}: {}", what, e))
            };
            let mut channel = session
                .channel_session()
                .map_err(|e| ssh_err("failed to open channel", e))?;
            channel.exec(&command).map_err(|e| ssh_err("exec failed", e))?;

            let mut stdout = String::new();
            channel.read_to_string(&mut stdout)?;
            let mut stderr = String::new();
            channel.stderr().read_to_string(&mut stderr)?;

            channel.wait_close().map_err(|e| ssh_err("wait close failed", e))?;
            let exit_status = channel
                .exit_status()
                .map_err(|e| ssh_err("no exit status", e))?;

            Ok(CommandOutput {
                exit_status,
                stdout,
                stderr,
            })
        })
        .await
        .map_err(|e| ProxlxcError::Internal(format!("SSH command task failed: {}", e)))?
    }

    async fn close(&self) -> ProxlxcResult<()> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = session.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(session) = guard.take() {
                let _ = session.disconnect(None, "build finished", None);
            }
        })
        .await
        .map_err(|e| ProxlxcError::Internal(format!("SSH close task failed: {}", e)))
    }
}
