//! Phase translation and leader-follower synchronization between workflow
//! engines, plus a bounded-retry pipeline state machine.
//!
//! - [`resolver`] translates a phase of one workflow kind into phases of another.
//! - [`sync`] links instances across two engines and keeps targets in step.
//! - [`state_machine`] drives pipelines through stages with a capped fix loop.
//! - [`orchestrator`] hosts named pipelines and persists them through [`store`].

pub mod config;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod resolver;
pub mod state_machine;
pub mod store;
pub mod sync;

pub use error::{ConditionError, PhaseSyncError, Result};
