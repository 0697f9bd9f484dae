//! Records exchanged between the joint, its callers and the remote
//! components.
//!
//! Solver and simulator outputs stay opaque [`serde_json::Value`]s; only the
//! parts the joint reshapes for the blackboard get their own structs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::roles::Role;

// ---------------------------------------------------------------------------
// Component sets
// ---------------------------------------------------------------------------

/// Role assignment supplied to `configure`.
///
/// Every service name is optional and falls back to the role's default
/// service. `at_simulation_file` is required by `configure` itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ComponentRoles {
    /// Solver service name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_solver: Option<String>,
    /// Temporal solver service name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_temporal_solver: Option<String>,
    /// Simulation service name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_simulation: Option<String>,
    /// Source file the simulation process is created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_simulation_file: Option<String>,
    /// Blackboard service name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_blackboard: Option<String>,
}

/// Remote service names bound to one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ComponentSet {
    /// Simulation service name.
    pub at_simulation: String,
    /// Temporal solver service name.
    pub at_temporal_solver: String,
    /// Solver service name.
    pub at_solver: String,
    /// Blackboard service name.
    pub at_blackboard: String,
}

impl ComponentSet {
    /// Build a component set, filling omitted roles with default services.
    pub fn from_roles(roles: &ComponentRoles) -> Self {
        let pick = |name: Option<&String>, role: Role| {
            name.cloned()
                .unwrap_or_else(|| role.default_service().to_owned())
        };
        Self {
            at_simulation: pick(roles.at_simulation.as_ref(), Role::AtSimulation),
            at_temporal_solver: pick(roles.at_temporal_solver.as_ref(), Role::AtTemporalSolver),
            at_solver: pick(roles.at_solver.as_ref(), Role::AtSolver),
            at_blackboard: pick(roles.at_blackboard.as_ref(), Role::AtBlackboard),
        }
    }

    /// Service name bound to `role`.
    pub fn service(&self, role: Role) -> &str {
        match role {
            Role::AtSimulation => &self.at_simulation,
            Role::AtTemporalSolver => &self.at_temporal_solver,
            Role::AtSolver => &self.at_solver,
            Role::AtBlackboard => &self.at_blackboard,
        }
    }
}

impl Default for ComponentSet {
    fn default() -> Self {
        Self::from_roles(&ComponentRoles::default())
    }
}

/// Reachability of one role's service for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ComponentStatus {
    /// The role probed.
    pub role: Role,
    /// Service name bound to the role.
    pub name: String,
    /// Whether the service is registered on the bus.
    pub registered: bool,
    /// Whether the service is configured for the session's token.
    pub configured: bool,
}

// ---------------------------------------------------------------------------
// Blackboard items
// ---------------------------------------------------------------------------

/// One simulator-reported resource with its parameters in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ResourceParameter {
    /// Resource name.
    pub name: String,
    /// All non-name fields of the resource.
    #[ts(type = "Record<string, unknown>")]
    pub parameters: Map<String, Value>,
}

/// A plain blackboard entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Item {
    /// Blackboard reference, e.g. `"Tank.level"`.
    #[serde(rename = "ref")]
    pub reference: String,
    /// Item value.
    #[ts(type = "unknown")]
    pub value: Value,
}

/// A blackboard entry derived from solver working memory, with optional
/// confidence annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SolverItem {
    /// Working-memory key.
    #[serde(rename = "ref")]
    pub reference: String,
    /// Item value.
    #[ts(type = "unknown")]
    pub value: Value,
    /// Belief annotation.
    #[ts(type = "unknown")]
    pub belief: Value,
    /// Probability annotation.
    #[ts(type = "unknown")]
    pub probability: Value,
    /// Accuracy annotation.
    #[ts(type = "unknown")]
    pub accuracy: Value,
}

// ---------------------------------------------------------------------------
// Tact output
// ---------------------------------------------------------------------------

/// Outcome of one tact: the simulation output and what the solvers made
/// of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TactResult {
    /// Zero-based tact index within the run.
    pub tact: u64,
    /// Resource parameters fetched at the start of this tact.
    pub at_simulation: Vec<ResourceParameter>,
    /// Temporal solver result computed from them.
    #[ts(type = "unknown")]
    pub at_temporal_solver: Value,
    /// Solver result computed from them.
    #[ts(type = "unknown")]
    pub at_solver: Value,
}

/// Intermediate stage output published to the debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DebugEvent {
    /// Stage that produced the payload (`at_simulation`, `at_joint`, ...).
    pub initiator: String,
    /// Stage output.
    #[ts(type = "unknown")]
    pub data: Value,
}
