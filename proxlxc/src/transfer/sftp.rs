//! SFTP transport built on `ssh2`.
//!
//! libssh2 is blocking, so every call runs on the blocking thread pool.

use std::io::{BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use ssh2::{CheckResult, HashType, KnownHostFileKind, Session, Sftp};

use super::{HostKeyPolicy, NodeFiles, NodeSession, NodeTarget, RemoteFile};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SftpNodeFiles;

#[async_trait]
impl NodeFiles for SftpNodeFiles {
    async fn connect(&self, target: &NodeTarget) -> ProxlxcResult<Box<dyn NodeSession>> {
        let target = target.clone();
        let (session, sftp) = tokio::task::spawn_blocking(move || open(&target))
            .await
            .map_err(|e| ProxlxcError::Internal(format!("SFTP connect task failed: {}", e)))??;

        Ok(Box::new(SftpSession {
            _session: session,
            sftp: Arc::new(Mutex::new(sftp)),
        }))
    }
}

struct SftpSession {
    // Keeps the transport alive for the SFTP channel.
    _session: Session,
    sftp: Arc<Mutex<Sftp>>,
}

#[async_trait]
impl NodeSession for SftpSession {
    async fn read_dir(&mut self, dir: &str) -> ProxlxcResult<Vec<RemoteFile>> {
        let sftp = Arc::clone(&self.sftp);
        let dir = dir.to_string();

        tokio::task::spawn_blocking(move || -> ProxlxcResult<Vec<RemoteFile>> {
            let sftp = sftp.lock().unwrap_or_else(|e| e.into_inner());
            let entries = sftp
                .readdir(Path::new(&dir))
                .map_err(|e| ProxlxcError::Transfer(format!("failed to list {}: {}", dir, e)))?;

            Ok(entries
                .into_iter()
                .filter_map(|(path, stat)| {
                    let name = path.file_name()?.to_string_lossy().into_owned();
                    Some(RemoteFile {
                        name,
                        size: stat.size,
                    })
                })
                .collect())
        })
        .await
        .map_err(|e| ProxlxcError::Internal(format!("SFTP listing task failed: {}", e)))?
    }

    async fn download(&mut self, remote: &str, dest: std::fs::File) -> ProxlxcResult<u64> {
        let sftp = Arc::clone(&self.sftp);
        let remote = remote.to_string();

        tokio::task::spawn_blocking(move || -> ProxlxcResult<u64> {
            let sftp = sftp.lock().unwrap_or_else(|e| e.into_inner());
            let mut source = sftp
                .open(Path::new(&remote))
                .map_err(|e| ProxlxcError::Transfer(format!("failed to open {}: {}", remote, e)))?;

            let mut writer = BufWriter::new(dest);
            let copied = std::io::copy(&mut source, &mut writer)
                .map_err(|e| ProxlxcError::Transfer(format!("failed to read {}: {}", remote, e)))?;
            writer.flush()?;

            tracing::debug!(remote = %remote, bytes = copied, "Downloaded file from node");
            Ok(copied)
        })
        .await
        .map_err(|e| ProxlxcError::Internal(format!("SFTP download task failed: {}", e)))?
    }
}

fn open(target: &NodeTarget) -> ProxlxcResult<(Session, Sftp)> {
    let address = target.address();
    let socket = address
        .to_socket_addrs()
        .map_err(|e| ProxlxcError::Transfer(format!("failed to resolve {}: {}", address, e)))?
        .next()
        .ok_or_else(|| ProxlxcError::Transfer(format!("{} did not resolve", address)))?;

    let tcp = TcpStream::connect_timeout(&socket, CONNECT_TIMEOUT)
        .map_err(|e| ProxlxcError::Transfer(format!("TCP connection to {} failed: {}", address, e)))?;

    let mut session = Session::new()
        .map_err(|e| ProxlxcError::Transfer(format!("SSH session creation failed: {}", e)))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| ProxlxcError::Transfer(format!("SSH handshake with {} failed: {}", address, e)))?;

    verify_host_key(&session, target)?;

    session
        .userauth_password(&target.username, &target.password)
        .map_err(|e| ProxlxcError::Transfer(format!("SSH password auth failed: {}", e)))?;
    if !session.authenticated() {
        return Err(ProxlxcError::Transfer("SSH authentication failed".into()));
    }

    let sftp = session
        .sftp()
        .map_err(|e| ProxlxcError::Transfer(format!("SFTP subsystem failed: {}", e)))?;

    tracing::debug!(address = %address, user = %target.username, "Opened SFTP session");
    Ok((session, sftp))
}

fn verify_host_key(session: &Session, target: &NodeTarget) -> ProxlxcResult<()> {
    match &target.host_key {
        HostKeyPolicy::Insecure => {
            tracing::warn!(host = %target.host, "Skipping node SSH host key verification");
            Ok(())
        }
        HostKeyPolicy::Fingerprint(expected) => {
            let digest = session.host_key_hash(HashType::Sha256).ok_or_else(|| {
                ProxlxcError::Transfer("node did not present a host key".into())
            })?;
            let actual = format!(
                "SHA256:{}",
                base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest)
            );
            if actual == expected.trim_end_matches('=') {
                Ok(())
            } else {
                Err(ProxlxcError::Transfer(format!(
                    "host key mismatch for {}: expected {}, got {}",
                    target.host, expected, actual
                )))
            }
        }
        HostKeyPolicy::KnownHosts(path) => {
            let mut known_hosts = session
                .known_hosts()
                .map_err(|e| ProxlxcError::Transfer(format!("known_hosts unavailable: {}", e)))?;
            known_hosts
                .read_file(path, KnownHostFileKind::OpenSSH)
                .map_err(|e| {
                    ProxlxcError::Transfer(format!("failed to read {}: {}", path.display(), e))
                })?;

            let (key, _) = session
                .host_key()
                .ok_or_else(|| ProxlxcError::Transfer("node did not present a host key".into()))?;

            match known_hosts.check_port(&target.host, target.port, key) {
                CheckResult::Match => Ok(()),
                CheckResult::NotFound => Err(ProxlxcError::Transfer(format!(
                    "host key for {} not found in {}; set node_ssh_host_key or node_ssh_insecure_skip_host_key",
                    target.host,
                    path.display()
                ))),
                CheckResult::Mismatch => Err(ProxlxcError::Transfer(format!(
                    "host key for {} does not match {}",
                    target.host,
                    path.display()
                ))),
                CheckResult::Failure => Err(ProxlxcError::Transfer(format!(
                    "could not check host key for {}",
                    target.host
                ))),
            }
        }
    }
}
