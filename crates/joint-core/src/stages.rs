//! Pipeline stage functions.
//!
//! Each stage wraps the remote calls of one component behind the
//! registered/configured guard. A component that is absent or not configured
//! for the session is not an error: the stage returns that component's
//! empty default result and the tact goes on. Failures of the calls
//! themselves are [`RemoteError`]s and propagate.

use joint_types::{Item, SolverItem};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::RemoteError;
use crate::gateway::{self, ServiceGateway};
use crate::session::Session;

/// Simulation method advancing the bound process by one tick.
pub const RUN_TICK: &str = "run_tick";
/// Simulation method creating a process from a source file.
pub const CREATE_PROCESS: &str = "create_process";
/// Simulation method killing a process.
pub const KILL_PROCESS: &str = "kill_process";
/// Solver method pulling the blackboard into working memory.
pub const UPDATE_WM_FROM_BB: &str = "update_wm_from_bb";
/// Temporal solver method running one tact.
pub const PROCESS_TACT: &str = "process_tact";
/// Solver method running inference.
pub const RUN: &str = "run";
/// Blackboard method writing items.
pub const SET_ITEMS: &str = "set_items";

/// Result used when the simulation is unavailable.
pub fn default_simulation_result() -> Value {
    json!({"resources": []})
}

/// Result used when the temporal solver is unavailable.
pub fn default_temporal_result() -> Value {
    json!({
        "wm": {},
        "timeline": {"tacts": []},
        "signified": {},
        "signified_meta": {}
    })
}

/// Result used when the solver is unavailable.
pub fn default_solver_result() -> Value {
    json!({"wm": {}, "trace": {"steps": []}})
}

/// Advance the session's simulation process by one tick.
///
/// Also returns the default when no process is bound to the session.
pub async fn run_simulation_tick(
    gateway: &dyn ServiceGateway,
    session: &Session,
) -> Result<Value, RemoteError> {
    let service = &session.components().at_simulation;
    if !gateway::is_available(gateway, service, session.key()).await {
        debug!(service = service.as_str(), session = %session.key(), "simulation unavailable, using default");
        return Ok(default_simulation_result());
    }
    let Some(process_id) = session.process_id().await else {
        debug!(session = %session.key(), "no simulation process bound, using default");
        return Ok(default_simulation_result());
    };
    gateway
        .invoke(
            service,
            RUN_TICK,
            json!({"process_id": process_id.as_str()}),
            session.key(),
        )
        .await
}

/// Sync the temporal solver from the blackboard and run one tact.
pub async fn run_temporal_solver(
    gateway: &dyn ServiceGateway,
    session: &Session,
) -> Result<Value, RemoteError> {
    let service = &session.components().at_temporal_solver;
    if !gateway::is_available(gateway, service, session.key()).await {
        debug!(service = service.as_str(), session = %session.key(), "temporal solver unavailable, using default");
        return Ok(default_temporal_result());
    }
    let _ = gateway
        .invoke(service, UPDATE_WM_FROM_BB, json!({}), session.key())
        .await?;
    gateway
        .invoke(service, PROCESS_TACT, json!({}), session.key())
        .await
}

/// Sync the solver from the blackboard and run it.
pub async fn run_solver(
    gateway: &dyn ServiceGateway,
    session: &Session,
) -> Result<Value, RemoteError> {
    let service = &session.components().at_solver;
    if !gateway::is_available(gateway, service, session.key()).await {
        debug!(service = service.as_str(), session = %session.key(), "solver unavailable, using default");
        return Ok(default_solver_result());
    }
    let _ = gateway
        .invoke(service, UPDATE_WM_FROM_BB, json!({}), session.key())
        .await?;
    gateway.invoke(service, RUN, json!({}), session.key()).await
}

/// Write plain items to the session's blackboard.
pub async fn write_items(
    gateway: &dyn ServiceGateway,
    session: &Session,
    items: &[Item],
) -> Result<(), RemoteError> {
    set_items(gateway, session, json!({"items": items})).await
}

/// Write solver items to the session's blackboard.
pub async fn write_solver_items(
    gateway: &dyn ServiceGateway,
    session: &Session,
    items: &[SolverItem],
) -> Result<(), RemoteError> {
    set_items(gateway, session, json!({"items": items})).await
}

async fn set_items(
    gateway: &dyn ServiceGateway,
    session: &Session,
    args: Value,
) -> Result<(), RemoteError> {
    let service = &session.components().at_blackboard;
    let _ = gateway
        .invoke(service, SET_ITEMS, args, session.key())
        .await?;
    Ok(())
}
