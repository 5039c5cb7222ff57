//! Scratch HTTP file server for provisioning.
//!
//! Serves a local directory read-only so scripts inside the guest can pull
//! files from the build host. Lives from the ServeHTTP step until that
//! step's cleanup.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use proxlxc_shared::errors::{ProxlxcError, ProxlxcResult};
use rand::seq::SliceRandom;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct HttpServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HttpServer {
    /// Bind a port from `[port_min, port_max]`, tried in random order, and
    /// start serving `root`.
    pub async fn start(root: PathBuf, bind: IpAddr, port_min: u16, port_max: u16) -> ProxlxcResult<Self> {
        if !root.is_dir() {
            return Err(ProxlxcError::Config(format!(
                "http_directory {} is not a directory",
                root.display()
            )));
        }

        let mut ports: Vec<u16> = (port_min..=port_max).collect();
        ports.shuffle(&mut rand::rng());

        let mut listener = None;
        for port in ports {
            match TcpListener::bind((bind, port)).await {
                Ok(l) => {
                    listener = Some(l);
                    break;
                }
                Err(e) => tracing::trace!(port, "HTTP port unavailable: {}", e),
            }
        }
        let listener = listener.ok_or_else(|| {
            ProxlxcError::Network(format!(
                "no free HTTP port on {} in range {}-{}",
                bind, port_min, port_max
            ))
        })?;
        let addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, Arc::new(root), shutdown.clone()));

        tracing::info!(addr = %addr, "HTTP server started");
        Ok(Self {
            addr,
            shutdown,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!("HTTP server task ended abnormally: {}", e);
        }
        tracing::debug!(addr = %self.addr, "HTTP server stopped");
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, root: Arc<PathBuf>, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("HTTP accept failed: {}", e);
                    continue;
                }
            },
        };

        let root = Arc::clone(&root);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| serve(Arc::clone(&root), req));
            let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            tokio::select! {
                result = conn => {
                    if let Err(e) = result {
                        tracing::debug!(peer = %peer, "HTTP connection error: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }
}

async fn serve(root: Arc<PathBuf>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
    }

    let Some(path) = resolve(&root, req.uri().path()) else {
        return Ok(respond(StatusCode::BAD_REQUEST, Bytes::from_static(b"bad path\n")));
    };

    let response = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => match tokio::fs::read(&path).await {
            Ok(contents) => respond(StatusCode::OK, Bytes::from(contents)),
            Err(e) => {
                tracing::warn!(path = %path.display(), "HTTP read failed: {}", e);
                respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
            }
        },
        _ => respond(StatusCode::NOT_FOUND, Bytes::from_static(b"not found\n")),
    };

    tracing::debug!(
        method = %req.method(),
        path = %req.uri().path(),
        status = response.status().as_u16(),
        "HTTP request"
    );
    Ok(response)
}

/// Map a request path under `root`. `None` when it tries to leave `root`.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}

fn respond(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}

/// Address the guest should use to reach a server bound on `bind`.
///
/// An unspecified bind address is replaced by the local address the host
/// would route through to reach `remote_host`.
pub async fn advertised_ip(bind: IpAddr, remote_host: &str) -> IpAddr {
    if !bind.is_unspecified() {
        return bind;
    }

    let probe = async {
        let socket = UdpSocket::bind((bind, 0)).await?;
        socket.connect((remote_host, 443)).await?;
        socket.local_addr().map(|addr| addr.ip())
    };
    match probe.await {
        Ok(ip) => ip,
        Err(e) => {
            tracing::warn!(remote_host, "Could not determine local address: {}", e);
            bind
        }
    }
}
