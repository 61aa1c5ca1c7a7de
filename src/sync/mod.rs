//! Leader-follower synchronization between two workflow engines.
//!
//! [`SyncExecutor`] links source instances to targets and performs single
//! sync attempts; [`AutoSyncController`] runs those attempts whenever the
//! source engine reports a phase change.

mod auto;
mod engine;
mod executor;
mod history;
mod link;
pub mod memory;

pub use auto::AutoSyncController;
pub use engine::{PhaseChange, SyncStrategy, TransitionMetadata, WorkflowEngine, WorkflowInstance};
pub use executor::{SyncEvent, SyncExecutor, SyncSettings, SyncStats};
pub use history::{HistoryFilter, SyncHistory, SyncRecord};
pub use link::{LinkOptions, SyncLink, SyncLinkRegistry};
pub use memory::InMemoryEngine;
