//! Step: ServeHttp - scratch file server for provisioning.

use std::net::IpAddr;

use async_trait::async_trait;
use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use tokio_util::sync::CancellationToken;

use super::halt;
use crate::builder::state::{BuildPhase, BuildState};
use crate::http_server::{HttpServer, advertised_ip};
use crate::pipeline::{Step, StepAction};

const NAME: &str = "serve_http";

pub struct ServeHttpStep;

#[async_trait]
impl Step<BuildState> for ServeHttpStep {
    async fn run(&self, state: &mut BuildState, _cancel: &CancellationToken) -> StepAction {
        if !state.config.http.enabled() {
            tracing::debug!("No http_directory configured, not starting HTTP server");
            state.advance(BuildPhase::HttpUp);
            return StepAction::Continue;
        }

        match start(state).await {
            Ok(()) => {
                state.advance(BuildPhase::HttpUp);
                StepAction::Continue
            }
            Err(e) => halt(state, NAME, e.context("Error starting HTTP server")),
        }
    }

    async fn cleanup(&self, state: &mut BuildState) {
        if let Some(mut server) = state.http_server.take() {
            server.shutdown().await;
        }
    }

    fn name(&self) -> &str {
        NAME
    }
}

async fn start(state: &mut BuildState) -> ProxlxcResult<()> {
    let http = state.config.http.clone();
    let bind: IpAddr = http.http_bind_address.parse().map_err(|_| {
        ProxlxcError::Config(format!(
            "http_bind_address is not an IP address: {}",
            http.http_bind_address
        ))
    })?;

    state.ui.say(&format!(
        "Starting HTTP server on port {} to {}",
        http.http_port_min, http.http_port_max
    ));
    let server = HttpServer::start(
        http.http_directory.clone(),
        bind,
        http.http_port_min,
        http.http_port_max,
    )
    .await?;

    let ip = advertised_ip(bind, &state.config.endpoint_host()?).await;
    let port = server.port();
    state
        .ui
        .message(&format!("HTTP server is working at http://{}:{}/", ip, port));

    state.http_ip = Some(ip);
    state.http_port = Some(port);
    state.http_server = Some(server);
    Ok(())
}
