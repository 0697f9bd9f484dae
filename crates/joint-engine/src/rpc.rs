//! NATS front end for the joint's operations.
//!
//! The server subscribes to `{prefix}.{name}.*` and handles each request in
//! its own task, so a long `process_tact` never delays a `stop` for the
//! same session.

use futures::StreamExt as _;
use joint_core::Joint;
use joint_core::config::TactConfig;
use joint_core::error::JointError;
use joint_types::ComponentRoles;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::wire::{RpcReply, RpcRequest};

/// Bind a component set to the session.
pub const CONFIGURE: &str = "configure";
/// Whether the session has a component set.
pub const IS_CONFIGURED: &str = "is_configured";
/// Run tacts.
pub const PROCESS_TACT: &str = "process_tact";
/// Request a cooperative stop.
pub const STOP: &str = "stop";
/// Recreate the simulation process.
pub const RESET: &str = "reset";
/// Read the session's component set.
pub const GET_CONFIG: &str = "get_config";
/// Probe every role's service.
pub const COMPONENT_STATE: &str = "component_state";
/// Forget the session.
pub const TEARDOWN: &str = "teardown";

/// Arguments of `process_tact`. Missing fields take the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProcessTactArgs {
    /// Number of tacts.
    #[serde(default)]
    pub iterate: Option<u64>,
    /// Pause between tacts in milliseconds.
    #[serde(default)]
    pub wait: Option<u64>,
    /// Return immediately and run in the background.
    #[serde(default)]
    pub background: bool,
}

/// Serves joint operations on the bus.
pub struct RpcServer {
    client: async_nats::Client,
    joint: Joint,
    subject: String,
    tact_defaults: TactConfig,
}

impl RpcServer {
    /// Create a server answering on `{prefix}.{name}.*`.
    pub fn new(
        client: async_nats::Client,
        joint: Joint,
        prefix: &str,
        name: &str,
        tact_defaults: TactConfig,
    ) -> Self {
        Self {
            client,
            joint,
            subject: format!("{prefix}.{name}.*"),
            tact_defaults,
        }
    }

    /// Answer requests until the subscription ends.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Nats`] if the subscription cannot be created.
    pub async fn serve(self) -> Result<(), EngineError> {
        let mut subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| EngineError::Nats {
                message: format!("failed to subscribe to {}: {e}", self.subject),
            })?;
        info!(subject = self.subject, "serving joint operations");

        while let Some(message) = subscriber.next().await {
            let Some(reply_to) = message.reply.clone() else {
                warn!(subject = message.subject.as_str(), "request without reply subject ignored");
                continue;
            };
            let Some(method) = method_of(message.subject.as_str()).map(str::to_owned) else {
                continue;
            };

            let client = self.client.clone();
            let joint = self.joint.clone();
            let defaults = self.tact_defaults.clone();
            tokio::spawn(async move {
                let reply = handle(&joint, &defaults, &method, &message.payload).await;
                match serde_json::to_vec(&reply) {
                    Ok(payload) => {
                        if let Err(e) = client.publish(reply_to, payload.into()).await {
                            warn!(method, error = %e, "failed to publish reply");
                        }
                    }
                    Err(e) => warn!(method, error = %e, "failed to serialize reply"),
                }
            });
        }

        info!(subject = self.subject, "subscription closed");
        Ok(())
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// The method token of a request subject, i.e. its last segment.
pub fn method_of(subject: &str) -> Option<&str> {
    subject.rsplit('.').next().filter(|method| !method.is_empty())
}

/// Decode a request payload, dispatch it and build the reply.
pub async fn handle(joint: &Joint, defaults: &TactConfig, method: &str, payload: &[u8]) -> RpcReply {
    let request: RpcRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => {
            let err = JointError::InvalidArgument(format!("malformed request: {e}"));
            return RpcReply::error(err.kind(), err.to_string());
        }
    };
    debug!(method, token = request.auth_token.as_deref(), "request received");

    match dispatch(joint, defaults, method, request).await {
        Ok(result) => RpcReply::Ok { result },
        Err(e) => {
            debug!(method, kind = e.kind(), error = %e, "request failed");
            RpcReply::error(e.kind(), e.to_string())
        }
    }
}

/// Run one joint operation.
pub async fn dispatch(
    joint: &Joint,
    defaults: &TactConfig,
    method: &str,
    request: RpcRequest,
) -> Result<Value, JointError> {
    let token = request.auth_token.as_deref();
    match method {
        CONFIGURE => {
            let roles: ComponentRoles = decode_args(request.args)?;
            Ok(Value::Bool(joint.configure(&roles, token).await?))
        }
        IS_CONFIGURED => Ok(Value::Bool(joint.is_configured(token).await)),
        PROCESS_TACT => {
            let args: ProcessTactArgs = decode_args(request.args)?;
            let iterate = args.iterate.unwrap_or(defaults.default_iterate);
            let wait_ms = args.wait.unwrap_or(defaults.default_wait_ms);
            if args.background {
                Ok(Value::Bool(
                    joint.process_tact_background(iterate, wait_ms, token).await?,
                ))
            } else {
                encode(&joint.process_tact(iterate, wait_ms, token).await?)
            }
        }
        STOP => {
            joint.stop(token).await;
            Ok(Value::Null)
        }
        RESET => Ok(Value::Bool(joint.reset(token).await?)),
        GET_CONFIG => encode(&joint.get_config(token).await?),
        COMPONENT_STATE => encode(&joint.component_state(token).await?),
        TEARDOWN => Ok(Value::Bool(joint.teardown(token).await?)),
        other => Err(JointError::InvalidArgument(format!(
            "unknown method '{other}'"
        ))),
    }
}

fn decode_args<T: DeserializeOwned>(args: Value) -> Result<T, JointError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| JointError::InvalidArgument(format!("invalid arguments: {e}")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, JointError> {
    serde_json::to_value(value)
        .map_err(|e| JointError::TaskFailed(format!("failed to encode result: {e}")))
}
