//! Logical roles of the remote components a joint session coordinates.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Default service name of the non-temporal solver.
pub const AT_SOLVER: &str = "ATSolver";
/// Default service name of the temporal solver.
pub const AT_TEMPORAL_SOLVER: &str = "ATTemporalSolver";
/// Default service name of the simulation model.
pub const AT_SIMULATION: &str = "ATSimulation";
/// Default service name of the blackboard.
pub const AT_BLACKBOARD: &str = "ATBlackboard";

/// A role in the component set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Role {
    /// Discrete-event simulator producing resource parameters per tact.
    AtSimulation,
    /// Temporal reasoner.
    AtTemporalSolver,
    /// Non-temporal solver.
    AtSolver,
    /// Shared working-memory store.
    AtBlackboard,
}

impl Role {
    /// All roles in pipeline order.
    pub const ALL: [Self; 4] = [
        Self::AtSimulation,
        Self::AtTemporalSolver,
        Self::AtSolver,
        Self::AtBlackboard,
    ];

    /// Service name used when the configuration omits this role.
    pub const fn default_service(self) -> &'static str {
        match self {
            Self::AtSimulation => AT_SIMULATION,
            Self::AtTemporalSolver => AT_TEMPORAL_SOLVER,
            Self::AtSolver => AT_SOLVER,
            Self::AtBlackboard => AT_BLACKBOARD,
        }
    }

    /// Key of this role in configuration payloads and tact results.
    pub const fn key(self) -> &'static str {
        match self {
            Self::AtSimulation => "at_simulation",
            Self::AtTemporalSolver => "at_temporal_solver",
            Self::AtSolver => "at_solver",
            Self::AtBlackboard => "at_blackboard",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.key())
    }
}
