//! [`ServiceGateway`] over NATS request/reply.
//!
//! # Subject Convention
//!
//! - **Method call:** `{prefix}.{service}.{method}`
//! - **Configured probe:** `{prefix}.{service}.check_configured`
//! - **Registered probe:** `{prefix}.registry.inspect` with `{component}`
//!
//! Every request carries the [`RpcRequest`] envelope and every reply is an
//! [`RpcReply`]. Probes treat any failure (no responders, timeout, bad
//! reply) as a negative answer; method calls surface it as a
//! [`RemoteError`].

use std::time::Duration;

use async_nats::client::RequestErrorKind;
use async_trait::async_trait;
use joint_core::{RemoteError, ServiceGateway};
use joint_types::SessionKey;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::wire::{RpcReply, RpcRequest};

/// Registry service answering `inspect` probes.
pub const REGISTRY_SERVICE: &str = "registry";
/// Registry method answering whether a component is on the bus.
pub const INSPECT_METHOD: &str = "inspect";
/// Per-service method answering whether the service is configured.
pub const CHECK_CONFIGURED_METHOD: &str = "check_configured";

/// Subject of `method` on `service`.
pub fn service_subject(prefix: &str, service: &str, method: &str) -> String {
    format!("{prefix}.{service}.{method}")
}

/// Decode a reply payload from `service.method`.
///
/// # Errors
///
/// Returns [`RemoteError::Decode`] if the payload is not a reply envelope
/// and [`RemoteError::Remote`] if the service reported an error.
pub fn parse_reply(service: &str, method: &str, payload: &[u8]) -> Result<Value, RemoteError> {
    let reply: RpcReply = serde_json::from_slice(payload).map_err(|e| RemoteError::Decode {
        service: service.to_owned(),
        method: method.to_owned(),
        message: e.to_string(),
    })?;
    match reply {
        RpcReply::Ok { result } => Ok(result),
        RpcReply::Err { error } => Err(RemoteError::Remote {
            service: service.to_owned(),
            method: method.to_owned(),
            message: format!("{}: {}", error.kind, error.message),
        }),
    }
}

/// Gateway that reaches remote services through a NATS connection.
#[derive(Clone)]
pub struct NatsGateway {
    client: async_nats::Client,
    prefix: String,
    timeout: Duration,
}

impl NatsGateway {
    /// Wrap an existing client. Its request timeout should match `timeout`.
    pub const fn new(client: async_nats::Client, prefix: String, timeout: Duration) -> Self {
        Self {
            client,
            prefix,
            timeout,
        }
    }

    /// Connect to a NATS server with `timeout` as the request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Nats`] if the connection fails.
    pub async fn connect(url: &str, prefix: &str, timeout: Duration) -> Result<Self, EngineError> {
        info!(url = url, "connecting to NATS server");
        let client = async_nats::ConnectOptions::new()
            .request_timeout(Some(timeout))
            .connect(url)
            .await
            .map_err(|e| EngineError::Nats {
                message: format!("failed to connect to NATS at {url}: {e}"),
            })?;
        info!("NATS connection established");
        Ok(Self::new(client, prefix.to_owned(), timeout))
    }

    /// The underlying client.
    pub const fn client(&self) -> &async_nats::Client {
        &self.client
    }

    async fn request(
        &self,
        service: &str,
        method: &str,
        request: &RpcRequest,
    ) -> Result<Value, RemoteError> {
        let subject = service_subject(&self.prefix, service, method);
        let payload = serde_json::to_vec(request).map_err(|e| RemoteError::Transport {
            service: service.to_owned(),
            method: method.to_owned(),
            message: format!("failed to serialize request: {e}"),
        })?;
        debug!(subject = subject, "sending request");

        let message = self
            .client
            .request(subject, payload.into())
            .await
            .map_err(|e| match e.kind() {
                RequestErrorKind::TimedOut => RemoteError::Timeout {
                    service: service.to_owned(),
                    method: method.to_owned(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                },
                RequestErrorKind::NoResponders => RemoteError::Transport {
                    service: service.to_owned(),
                    method: method.to_owned(),
                    message: "no responders".to_owned(),
                },
                RequestErrorKind::Other => RemoteError::Transport {
                    service: service.to_owned(),
                    method: method.to_owned(),
                    message: e.to_string(),
                },
            })?;
        parse_reply(service, method, &message.payload)
    }
}

impl std::fmt::Debug for NatsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsGateway")
            .field("prefix", &self.prefix)
            .field("timeout_ms", &self.timeout.as_millis())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceGateway for NatsGateway {
    async fn is_registered(&self, service: &str) -> bool {
        let request = RpcRequest {
            auth_token: None,
            args: json!({"component": service}),
        };
        match self.request(REGISTRY_SERVICE, INSPECT_METHOD, &request).await {
            Ok(reply) => reply
                .get("registered")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Err(e) => {
                debug!(service, error = %e, "registration probe failed");
                false
            }
        }
    }

    async fn is_configured(&self, service: &str, session: &SessionKey) -> bool {
        let request = RpcRequest {
            auth_token: Some(session.as_str().to_owned()),
            args: json!({}),
        };
        match self.request(service, CHECK_CONFIGURED_METHOD, &request).await {
            Ok(reply) => reply.as_bool().unwrap_or(false),
            Err(e) => {
                debug!(service, session = %session, error = %e, "configuration probe failed");
                false
            }
        }
    }

    async fn invoke(
        &self,
        service: &str,
        method: &str,
        args: Value,
        session: &SessionKey,
    ) -> Result<Value, RemoteError> {
        let request = RpcRequest {
            auth_token: Some(session.as_str().to_owned()),
            args,
        };
        self.request(service, method, &request).await
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
