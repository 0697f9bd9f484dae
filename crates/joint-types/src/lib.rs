//! Shared type definitions for the AT joint.
//!
//! Types defined here are used by the orchestration core, the engine binary
//! and, through `ts-rs`, the debugger front end.
//!
//! # Modules
//!
//! - [`ids`] -- Session keys, simulation process ids and run ids
//! - [`roles`] -- Component roles and their default service names
//! - [`records`] -- Component sets, blackboard items, tact results

pub mod ids;
pub mod records;
pub mod roles;

pub use ids::{DEFAULT_SESSION, ProcessId, RunId, SessionKey};
pub use records::{
    ComponentRoles, ComponentSet, ComponentStatus, DebugEvent, Item, ResourceParameter,
    SolverItem, TactResult,
};
pub use roles::{AT_BLACKBOARD, AT_SIMULATION, AT_SOLVER, AT_TEMPORAL_SOLVER, Role};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for the debugger front end.

    #[test]
    fn export_bindings() {
        use ts_rs::TS;

        let _ = crate::ids::SessionKey::export_all();
        let _ = crate::ids::ProcessId::export_all();
        let _ = crate::ids::RunId::export_all();
        let _ = crate::roles::Role::export_all();
        let _ = crate::records::ComponentRoles::export_all();
        let _ = crate::records::ComponentSet::export_all();
        let _ = crate::records::ComponentStatus::export_all();
        let _ = crate::records::ResourceParameter::export_all();
        let _ = crate::records::Item::export_all();
        let _ = crate::records::SolverItem::export_all();
        let _ = crate::records::TactResult::export_all();
        let _ = crate::records::DebugEvent::export_all();
    }
}
