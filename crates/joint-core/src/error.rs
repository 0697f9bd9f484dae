//! Error types for the joint core.
//!
//! [`JointError`] is what every caller-facing operation returns.
//! [`RemoteError`] is produced by [`ServiceGateway`] implementations and
//! propagates unchanged through the pipeline stages.
//!
//! [`ServiceGateway`]: crate::gateway::ServiceGateway

use joint_types::SessionKey;

/// Failure of a required remote invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The bus could not deliver the request or the reply.
    #[error("transport error calling {service}.{method}: {message}")]
    Transport {
        /// Target service.
        service: String,
        /// Target method.
        method: String,
        /// Description of the transport failure.
        message: String,
    },

    /// The remote service answered with an error.
    #[error("{service}.{method} failed: {message}")]
    Remote {
        /// Target service.
        service: String,
        /// Target method.
        method: String,
        /// Error reported by the service.
        message: String,
    },

    /// No reply arrived within the request timeout.
    #[error("{service}.{method} timed out after {timeout_ms}ms")]
    Timeout {
        /// Target service.
        service: String,
        /// Target method.
        method: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The reply could not be decoded.
    #[error("undecodable reply from {service}.{method}: {message}")]
    Decode {
        /// Target service.
        service: String,
        /// Target method.
        method: String,
        /// Description of the decode failure.
        message: String,
    },
}

/// Errors surfaced by joint operations.
#[derive(Debug, thiserror::Error)]
pub enum JointError {
    /// No component set exists for the session.
    #[error("component set (solver, temporal solver, simulation model) for token '{key}' is not created")]
    NotConfigured {
        /// The session that was looked up.
        key: SessionKey,
    },

    /// `configure` was called without a simulation source file.
    #[error("simulation file (at_simulation_file) is required to configure token '{key}'")]
    MissingFile {
        /// The session being configured.
        key: SessionKey,
    },

    /// A tact run is already active for the session.
    #[error("a tact run is already active for token '{key}'")]
    Busy {
        /// The busy session.
        key: SessionKey,
    },

    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required remote invocation failed.
    #[error("remote error: {source}")]
    Remote {
        /// The underlying remote error.
        #[from]
        source: RemoteError,
    },

    /// A solve task panicked or was cancelled.
    #[error("solve task failed: {0}")]
    TaskFailed(String),
}

impl JointError {
    /// Stable machine-readable kind, used in RPC error replies.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured { .. } => "not_configured",
            Self::MissingFile { .. } => "missing_file",
            Self::Busy { .. } => "busy",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Remote { .. } => "remote",
            Self::TaskFailed(_) => "task_failed",
        }
    }
}

impl From<tokio::task::JoinError> for JointError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}
