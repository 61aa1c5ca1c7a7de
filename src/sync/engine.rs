//! Boundary with the external workflow engines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{PhaseSyncError, Result};
use crate::resolver::Context;

/// A workflow instance as reported by an engine lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub instance_id: String,
    pub workflow_kind: String,
    pub current_phase: String,
    #[serde(default)]
    pub context: Context,
}

impl WorkflowInstance {
    pub fn new(
        instance_id: impl Into<String>,
        workflow_kind: impl Into<String>,
        current_phase: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            workflow_kind: workflow_kind.into(),
            current_phase: current_phase.into(),
            context: Context::new(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// Notification published on every phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseChange {
    pub instance_id: String,
    pub from_phase: Option<String>,
    pub to_phase: String,
    /// Source instance whose sync caused this change, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_from: Option<String>,
}

/// The only supported synchronization strategy: the source drives the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    #[default]
    #[serde(rename = "leader-follower")]
    LeaderFollower,
}

impl SyncStrategy {
    /// Parse a strategy tag; anything but `leader-follower` is unsupported.
    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "leader-follower" => Ok(SyncStrategy::LeaderFollower),
            other => Err(PhaseSyncError::UnsupportedStrategy(other.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStrategy::LeaderFollower => write!(f, "leader-follower"),
        }
    }
}

/// Provenance attached to a transition requested by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionMetadata {
    pub synced_from: String,
    pub source_phase: String,
    pub strategy: SyncStrategy,
    pub timestamp: DateTime<Utc>,
}

/// Operations consumed from a workflow engine.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn lookup(&self, instance_id: &str) -> Option<WorkflowInstance>;

    /// Ask the engine to move `instance_id` to `phase`. `false` means rejected.
    async fn transition_to(
        &self,
        instance_id: &str,
        phase: &str,
        metadata: TransitionMetadata,
    ) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<PhaseChange>;
}
