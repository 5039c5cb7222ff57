//! reqwest-backed Proxmox client.
//!
//! Authenticates with a ticket (`POST /access/ticket`) and sends it back as
//! the `PVEAuthCookie` cookie, plus the CSRF token on writes. Connection
//! errors and 5xx answers are retried with exponential backoff; a 401
//! triggers one re-login.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use proxlxc_shared::constants::rest;
use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use reqwest::header::COOKIE;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use super::types::{NetworkInterface, TaskHandle, TaskStatus, VmRef};
use super::{Form, ProxmoxApi};
use crate::config::Config;

const CSRF_HEADER: &str = "CSRFPreventionToken";

#[derive(Debug, Clone)]
struct Ticket {
    cookie: String,
    csrf_token: String,
}

#[derive(Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct StorageConfig {
    #[serde(default)]
    path: Option<String>,
}

pub struct ProxmoxClient {
    http: reqwest::Client,
    /// `https://host:8006/api2/json`, no trailing slash.
    base: String,
    username: String,
    password: String,
    ticket: Mutex<Option<Ticket>>,
    poll_interval: Duration,
    task_timeout: Duration,
    retry_backoff: Duration,
}

impl ProxmoxClient {
    pub fn new(config: &Config) -> ProxlxcResult<Self> {
        let endpoint = config.endpoint()?;
        let http = reqwest::Client::builder()
            .timeout(rest::OPERATION_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| ProxlxcError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base: endpoint.as_str().trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            ticket: Mutex::new(None),
            poll_interval: rest::TASK_POLL_INTERVAL,
            task_timeout: rest::OPERATION_TIMEOUT,
            retry_backoff: rest::RETRY_INITIAL_BACKOFF,
        })
    }

    /// Build a client and log in.
    pub async fn connect(config: &Config) -> ProxlxcResult<Self> {
        let client = Self::new(config)?;
        client.login().await?;
        Ok(client)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub async fn login(&self) -> ProxlxcResult<()> {
        let url = format!("{}/access/ticket", self.base);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let data: TicketData = decode(response).await?;
        *self.ticket.lock().await = Some(Ticket {
            cookie: format!("PVEAuthCookie={}", data.ticket),
            csrf_token: data.csrf_token,
        });

        tracing::debug!(username = %self.username, "Obtained Proxmox ticket");
        Ok(())
    }

    async fn ticket(&self) -> ProxlxcResult<Ticket> {
        if let Some(ticket) = self.ticket.lock().await.clone() {
            return Ok(ticket);
        }
        self.login().await?;
        self.ticket
            .lock()
            .await
            .clone()
            .ok_or_else(|| ProxlxcError::Internal("login did not store a ticket".into()))
    }

    async fn send_once(&self, method: &Method, path: &str, form: Option<&Form>) -> ProxlxcResult<Value> {
        let ticket = self.ticket().await?;
        let url = format!("{}{}", self.base, path);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(COOKIE, &ticket.cookie);
        if *method != Method::GET {
            request = request.header(CSRF_HEADER, &ticket.csrf_token);
        }
        if let Some(form) = form {
            request = request.form(form);
        }

        let response = request.send().await.map_err(transport_error)?;
        decode(response).await
    }

    async fn request(&self, method: Method, path: &str, form: Option<&Form>) -> ProxlxcResult<Value> {
        let mut backoff = self.retry_backoff;
        let mut relogged = false;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.send_once(&method, path, form).await {
                Ok(data) => return Ok(data),
                Err(e) => e,
            };

            match err {
                ProxlxcError::Api { status, .. }
                    if status == StatusCode::UNAUTHORIZED.as_u16() && !relogged =>
                {
                    tracing::debug!(path, "Ticket rejected, logging in again");
                    relogged = true;
                    self.login().await?;
                }
                e if e.is_transient() && attempt < rest::RETRY_ATTEMPTS => {
                    tracing::warn!(
                        path,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Proxmox request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                e if e.is_transient() => {
                    return Err(ProxlxcError::Network(format!(
                        "{} {} failed after {} attempts: {}",
                        method, path, attempt, e
                    )));
                }
                e => return Err(e),
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ProxlxcResult<T> {
        let data = self.request(Method::GET, path, None).await?;
        serde_json::from_value(data).map_err(|e| {
            ProxlxcError::Internal(format!("unexpected response from {}: {}", path, e))
        })
    }
}

#[async_trait]
impl ProxmoxApi for ProxmoxClient {
    async fn next_vmid(&self) -> ProxlxcResult<u32> {
        let data: Value = self.get("/cluster/nextid").await?;
        let vmid = match &data {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        };
        vmid.ok_or_else(|| ProxlxcError::Internal(format!("unexpected next VMID: {}", data)))
    }

    async fn post_task(&self, path: &str, form: &Form) -> ProxlxcResult<TaskHandle> {
        let data = self.request(Method::POST, path, Some(form)).await?;
        upid_from(path, data)
    }

    async fn wait_for_task(&self, task: &TaskHandle) -> ProxlxcResult<()> {
        let path = format!("/nodes/{}/tasks/{}/status", task.node, task.upid);
        let started = Instant::now();

        loop {
            let status: TaskStatus = self.get(&path).await?;
            if status.is_finished() {
                if status.is_ok() {
                    tracing::debug!(upid = %task.upid, "Task finished");
                    return Ok(());
                }
                return Err(ProxlxcError::TaskFailed {
                    upid: task.upid.clone(),
                    exit_status: status.exitstatus.unwrap_or_else(|| "unknown".into()),
                });
            }

            if started.elapsed() >= self.task_timeout {
                return Err(ProxlxcError::Network(format!(
                    "task {} did not finish within {}s",
                    task.upid,
                    self.task_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn delete_container(&self, vm: &VmRef) -> ProxlxcResult<TaskHandle> {
        let path = vm.api_path();
        let data = self.request(Method::DELETE, &path, None).await?;
        upid_from(&path, data)
    }

    async fn container_interfaces(&self, vm: &VmRef) -> ProxlxcResult<Vec<NetworkInterface>> {
        self.get(&format!("{}/interfaces", vm.api_path())).await
    }

    async fn storage_path(&self, storage: &str) -> ProxlxcResult<Option<String>> {
        let config: StorageConfig = self.get(&format!("/storage/{}", storage)).await?;
        Ok(config.path.filter(|p| !p.is_empty()))
    }
}

fn upid_from(path: &str, data: Value) -> ProxlxcResult<TaskHandle> {
    match data.as_str() {
        Some(upid) => TaskHandle::from_upid(upid),
        None => Err(ProxlxcError::Internal(format!(
            "{} did not return a task: {}",
            path, data
        ))),
    }
}

fn transport_error(e: reqwest::Error) -> ProxlxcError {
    ProxlxcError::Network(e.to_string())
}

/// Unwrap the `{"data": ...}` envelope, turning HTTP errors into `Api`.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ProxlxcResult<T> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        let message = match body.trim() {
            "" => status.canonical_reason().unwrap_or("no reason given").to_string(),
            text => text.to_string(),
        };
        return Err(ProxlxcError::Api {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str::<Envelope<T>>(&body)
        .map(|envelope| envelope.data)
        .map_err(|e| ProxlxcError::Internal(format!("malformed Proxmox response: {}", e)))
}
