//! Tact orchestration for the AT joint.
//!
//! The joint sequences a simulation model, a temporal solver, a solver and a
//! shared blackboard, per session, through repeated tacts. This crate owns
//! that orchestration; the bus itself is behind the [`ServiceGateway`]
//! trait.
//!
//! # Modules
//!
//! - [`adapters`] -- Pure reshaping of simulator/solver outputs into
//!   blackboard items.
//! - [`config`] -- Configuration loading from `at-joint.yaml`.
//! - [`debug`] -- Best-effort, order-preserving debug event channel.
//! - [`error`] -- [`JointError`] and [`RemoteError`].
//! - [`gateway`] -- [`ServiceGateway`] trait.
//! - [`joint`] -- [`Joint`], the caller-facing operations.
//! - [`session`] -- Per-session state and the [`SessionStore`] trait.
//! - [`stages`] -- Guarded simulation/temporal/solver stages.
//! - [`tact`] -- The pipelined tact loop.
//!
//! [`ServiceGateway`]: gateway::ServiceGateway
//! [`JointError`]: error::JointError
//! [`RemoteError`]: error::RemoteError
//! [`Joint`]: joint::Joint
//! [`SessionStore`]: session::SessionStore

pub mod adapters;
pub mod config;
pub mod debug;
pub mod error;
pub mod gateway;
pub mod joint;
pub mod session;
pub mod stages;
pub mod tact;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{JointError, RemoteError};
pub use gateway::ServiceGateway;
pub use joint::Joint;
