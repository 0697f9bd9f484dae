//! AT joint binary.
//!
//! Wires the tact orchestrator to the bus: loads configuration, connects to
//! NATS, builds the NATS service gateway and the joint, and serves the
//! joint's operations until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `at-joint.yaml` (or `AT_JOINT_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to NATS and create the service gateway
//! 4. Create the joint with an in-memory session store
//! 5. Serve requests until the subscription closes or Ctrl-C

mod error;
mod nats_gateway;
mod rpc;
mod wire;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use joint_core::config::JointConfig;
use joint_core::{Joint, ServiceGateway};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::nats_gateway::NatsGateway;
use crate::rpc::RpcServer;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "at-joint.yaml";

/// Application entry point for the joint.
///
/// # Errors
///
/// Returns an error if configuration, the NATS connection, or the
/// subscription fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = config_path();
    let config_found = config_path.exists();
    let config = load_config(&config_path, config_found)?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("at-joint starting");
    if config_found {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        nats_url = config.infrastructure.nats_url,
        subject_prefix = config.infrastructure.subject_prefix,
        service = config.service.name,
        debugger = config.service.debugger,
        request_timeout_ms = config.service.request_timeout_ms,
        "Configuration resolved"
    );

    // 3. Connect to NATS.
    let timeout = Duration::from_millis(config.service.request_timeout_ms);
    let gateway = NatsGateway::connect(
        &config.infrastructure.nats_url,
        &config.infrastructure.subject_prefix,
        timeout,
    )
    .await?;
    let client = gateway.client().clone();

    // 4. Create the joint.
    let joint = Joint::with_memory_store(
        Arc::new(gateway) as Arc<dyn ServiceGateway>,
        config.service.debugger.clone(),
    );
    info!("Joint initialized");

    // 5. Serve.
    let server = RpcServer::new(
        client,
        joint,
        &config.infrastructure.subject_prefix,
        &config.service.name,
        config.tact.clone(),
    );
    tokio::select! {
        result = server.serve() => result?,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
    }

    info!("at-joint shutdown complete");
    Ok(())
}

/// Config file location, overridable with `AT_JOINT_CONFIG`.
fn config_path() -> PathBuf {
    std::env::var_os("AT_JOINT_CONFIG").map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load the configuration, falling back to defaults when the file is absent.
fn load_config(path: &std::path::Path, found: bool) -> Result<JointConfig, EngineError> {
    if found {
        Ok(JointConfig::from_file(path)?)
    } else {
        let mut config = JointConfig::default();
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }
}
