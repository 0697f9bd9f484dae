//! Request/reply envelopes shared by every service on the bus.
//!
//! A request is `{auth_token?, args}`. A reply is either `{result}` or
//! `{error: {kind, message}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Incoming or outgoing request envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Authorization token identifying the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Method arguments.
    #[serde(default)]
    pub args: Value,
}

/// Error body of a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable error kind.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
}

/// Reply envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcReply {
    /// The call failed.
    Err {
        /// What went wrong.
        error: ErrorBody,
    },
    /// The call succeeded.
    Ok {
        /// Method result.
        result: Value,
    },
}

impl RpcReply {
    /// A failed reply.
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Err {
            error: ErrorBody {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }
}
