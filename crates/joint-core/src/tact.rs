//! The pipelined tact loop.
//!
//! Each iteration fetches one simulation tick, then hands the solving of
//! that tick to a spawned task and moves on to the next tick while the
//! solvers run:
//!
//! ```text
//! iteration i:   stop? -> run_tick(i) -> await solve(i-1) -> spawn solve(i) -> wait
//! solve(i):      bb <- sim items -> temporal -> bb <- signified -> solver -> bb <- wm
//! ```
//!
//! At most one solve task is outstanding. The result of tact `i` is appended
//! when iteration `i + 1` awaits it, or after the loop for the last tact, so
//! results come back in tact order even though they are reported one
//! iteration late.
//!
//! Stop is cooperative: the flag is read at the top of each iteration and
//! never interrupts an in-flight remote call or solve task.
//!
//! Debug events are queued, never awaited; the run returns as soon as its
//! last solve task is done, whatever the debugger is doing.

use std::sync::Arc;
use std::time::Duration;

use joint_types::{Item, ResourceParameter, Role, RunId, TactResult};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters;
use crate::debug::{DebugEmitter, JOINT_INITIATOR};
use crate::error::{JointError, RemoteError};
use crate::gateway::ServiceGateway;
use crate::session::{RunGuard, Session};
use crate::stages;

/// Parameters of one `process_tact` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TactPlan {
    /// Number of tacts to run (at least 1).
    pub iterate: u64,
    /// Pause between tacts in milliseconds; unused for single-tact runs.
    pub wait_ms: u64,
}

/// Why a run's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TactEnd {
    /// All requested tacts were started.
    Completed,
    /// A stop request was observed.
    Stopped,
}

type SolveTask = JoinHandle<Result<TactResult, RemoteError>>;

/// Run the tact loop for the session held by `guard`.
///
/// The busy flag is released when this returns, after the last solve task
/// has finished.
///
/// # Errors
///
/// Returns [`JointError::Remote`] if the simulation fetch or any solve task
/// hits a remote failure, and [`JointError::TaskFailed`] if a solve task
/// panicked.
pub async fn run_tacts(
    gateway: Arc<dyn ServiceGateway>,
    debug_events: DebugEmitter,
    guard: RunGuard,
    plan: TactPlan,
) -> Result<Vec<TactResult>, JointError> {
    let session = Arc::clone(guard.session());
    let run_id = RunId::new();
    info!(
        run_id = %run_id,
        session = %session.key(),
        iterate = plan.iterate,
        wait_ms = plan.wait_ms,
        "tact run starting"
    );

    let mut results = Vec::new();
    let mut pending: Option<SolveTask> = None;
    let outcome = drive(&gateway, &debug_events, &session, plan, &mut pending, &mut results).await;

    let outcome = match (outcome, pending.take()) {
        (Ok(end), Some(last)) => last
            .await
            .map_err(JointError::from)
            .and_then(|r| r.map_err(JointError::from))
            .map(|result| {
                results.push(result);
                end
            }),
        (Ok(end), None) => Ok(end),
        (Err(e), Some(last)) => {
            // Let the in-flight solve finish before the busy flag is released.
            if let Ok(Err(solve_err)) = last.await {
                warn!(run_id = %run_id, error = %solve_err, "solve task failed after run aborted");
            }
            Err(e)
        }
        (Err(e), None) => Err(e),
    };

    debug_events.emit(JOINT_INITIATOR, json!({"stop": true}), session.key());
    drop(guard);

    match outcome {
        Ok(end) => {
            info!(
                run_id = %run_id,
                session = %session.key(),
                end = ?end,
                tacts = results.len(),
                "tact run finished"
            );
            Ok(results)
        }
        Err(e) => {
            warn!(run_id = %run_id, session = %session.key(), error = %e, "tact run aborted");
            Err(e)
        }
    }
}

async fn drive(
    gateway: &Arc<dyn ServiceGateway>,
    debug_events: &DebugEmitter,
    session: &Arc<Session>,
    plan: TactPlan,
    pending: &mut Option<SolveTask>,
    results: &mut Vec<TactResult>,
) -> Result<TactEnd, JointError> {
    for tact in 0..plan.iterate {
        if session.is_stop_requested() {
            info!(session = %session.key(), tact, "stop requested");
            return Ok(TactEnd::Stopped);
        }

        let simulation_output = stages::run_simulation_tick(gateway.as_ref(), session).await?;
        debug_events.emit(Role::AtSimulation.key(), simulation_output.clone(), session.key());
        let resources = adapters::resource_parameters(&simulation_output);
        let items = adapters::items_from_resource_parameters(&resources);
        debug!(session = %session.key(), tact, items = items.len(), "simulation tick fetched");

        if let Some(previous) = pending.take() {
            results.push(previous.await??);
        }

        *pending = Some(tokio::spawn(solve(
            Arc::clone(gateway),
            debug_events.clone(),
            Arc::clone(session),
            tact,
            resources,
            items,
        )));

        if plan.iterate > 1 && plan.wait_ms > 0 {
            tokio::time::sleep(Duration::from_millis(plan.wait_ms)).await;
        }
    }
    Ok(TactEnd::Completed)
}

/// Push one tact's simulation items through both solvers and the blackboard.
async fn solve(
    gateway: Arc<dyn ServiceGateway>,
    debug_events: DebugEmitter,
    session: Arc<Session>,
    tact: u64,
    resources: Vec<ResourceParameter>,
    items: Vec<Item>,
) -> Result<TactResult, RemoteError> {
    let gateway = gateway.as_ref();
    let key = session.key();

    stages::write_items(gateway, &session, &items).await?;

    let temporal = stages::run_temporal_solver(gateway, &session).await?;
    debug_events.emit(Role::AtTemporalSolver.key(), temporal.clone(), key);
    stages::write_items(gateway, &session, &adapters::items_from_temporal_result(&temporal)).await?;

    let solver = stages::run_solver(gateway, &session).await?;
    debug_events.emit(Role::AtSolver.key(), solver.clone(), key);
    stages::write_solver_items(gateway, &session, &adapters::items_from_solver_result(&solver))
        .await?;

    debug!(session = %key, tact, "tact solved");
    Ok(TactResult {
        tact,
        at_simulation: resources,
        at_temporal_solver: temporal,
        at_solver: solver,
    })
}
