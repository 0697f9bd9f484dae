//! Remote service gateway trait.
//!
//! The joint never talks to the bus directly. Every remote call goes through
//! a [`ServiceGateway`], which the engine binary implements over NATS and
//! tests implement with [`ScriptedGateway`](crate::testing::ScriptedGateway).
//!
//! Capability probes are made before every conditional invocation and their
//! answers are never cached: a service may register or drop off the bus
//! between two tacts.

use async_trait::async_trait;
use joint_types::SessionKey;
use serde_json::Value;

use crate::error::RemoteError;

/// Uniform capability-checked access to named remote services.
#[async_trait]
pub trait ServiceGateway: Send + Sync {
    /// Whether `service` is currently registered on the bus.
    async fn is_registered(&self, service: &str) -> bool;

    /// Whether `service` has been configured for the session's token.
    async fn is_configured(&self, service: &str, session: &SessionKey) -> bool;

    /// Invoke `method` on `service` on behalf of the session.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport failure, timeout, or when the
    /// remote side reports an error.
    async fn invoke(
        &self,
        service: &str,
        method: &str,
        args: Value,
        session: &SessionKey,
    ) -> Result<Value, RemoteError>;
}

/// Both capability probes in order: registered, then configured.
pub async fn is_available(
    gateway: &dyn ServiceGateway,
    service: &str,
    session: &SessionKey,
) -> bool {
    gateway.is_registered(service).await && gateway.is_configured(service, session).await
}
