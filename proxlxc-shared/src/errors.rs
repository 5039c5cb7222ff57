//! Error types shared by the builder core and the CLI.

use std::fmt;

/// Result alias used across the workspace.
pub type ProxlxcResult<T> = Result<T, ProxlxcError>;

/// Every failure a template build can surface.
#[derive(Debug, thiserror::Error)]
pub enum ProxlxcError {
    /// One or more configuration problems found by `prepare`.
    #[error("{}", ConfigErrorList(.0))]
    InvalidConfig(Vec<String>),

    /// A single configuration problem discovered after `prepare`.
    #[error("configuration error: {0}")]
    Config(String),

    /// Proxmox answered with a permanent (non-retryable) HTTP error.
    #[error("proxmox API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Connection-level failure, or a transient error that outlived the retry budget.
    #[error("network error: {0}")]
    Network(String),

    /// A Proxmox task finished with a non-OK exit status.
    #[error("task {upid} failed: {exit_status}")]
    TaskFailed { upid: String, exit_status: String },

    /// The guest communicator could not be opened.
    #[error("guest unreachable: {0}")]
    GuestUnreachable(String),

    /// Artifact retrieval from the node failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Storage layout problem on the node or locally.
    #[error("storage error: {0}")]
    Storage(String),

    /// Stage-level context wrapped around the underlying failure.
    #[error("{context}: {source}")]
    Stage {
        context: String,
        #[source]
        source: Box<ProxlxcError>,
    },

    /// The build was cancelled from outside.
    #[error("build was cancelled")]
    Cancelled,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxlxcError {
    /// Wrap this error with stage context, e.g. `"Error converting VM to template, could not stop"`.
    pub fn context(self, context: impl Into<String>) -> Self {
        ProxlxcError::Stage {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether a retry may succeed (connection errors, HTTP 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            ProxlxcError::Network(_) => true,
            ProxlxcError::Api { status, .. } => *status >= 500,
            ProxlxcError::Stage { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Configuration messages when this is an `InvalidConfig`.
    pub fn config_errors(&self) -> &[String] {
        match self {
            ProxlxcError::InvalidConfig(errors) => errors,
            _ => &[],
        }
    }
}

struct ConfigErrorList<'a>(&'a [String]);

impl fmt::Display for ConfigErrorList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred:", self.0.len())?;
        for err in self.0 {
            write!(f, "\n\n* {}", err)?;
        }
        Ok(())
    }
}
