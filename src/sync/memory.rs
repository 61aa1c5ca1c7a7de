//! In-process [`WorkflowEngine`] used by the demo and by tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use super::engine::{PhaseChange, TransitionMetadata, WorkflowEngine, WorkflowInstance};

const CHANGE_CAPACITY: usize = 256;

pub struct InMemoryEngine {
    instances: RwLock<HashMap<String, WorkflowInstance>>,
    rejected: RwLock<HashSet<String>>,
    last_metadata: RwLock<Option<TransitionMetadata>>,
    transition_calls: AtomicUsize,
    changes: broadcast::Sender<PhaseChange>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            instances: RwLock::new(HashMap::new()),
            rejected: RwLock::new(HashSet::new()),
            last_metadata: RwLock::new(None),
            transition_calls: AtomicUsize::new(0),
            changes,
        }
    }

    /// Add or replace an instance. Does not publish a change.
    pub async fn insert(&self, instance: WorkflowInstance) {
        self.instances
            .write()
            .await
            .insert(instance.instance_id.clone(), instance);
    }

    /// Move an instance to `phase` and publish the change.
    /// Returns `false` for unknown instances.
    pub async fn set_phase(&self, instance_id: &str, phase: &str) -> bool {
        self.apply(instance_id, phase, None).await
    }

    /// Make every later transition request for `instance_id` fail.
    pub async fn reject_transitions(&self, instance_id: &str) {
        self.rejected.write().await.insert(instance_id.to_string());
    }

    pub async fn phase_of(&self, instance_id: &str) -> Option<String> {
        self.instances
            .read()
            .await
            .get(instance_id)
            .map(|i| i.current_phase.clone())
    }

    pub fn transition_calls(&self) -> usize {
        self.transition_calls.load(Ordering::SeqCst)
    }

    pub async fn last_metadata(&self) -> Option<TransitionMetadata> {
        self.last_metadata.read().await.clone()
    }

    async fn apply(&self, instance_id: &str, phase: &str, synced_from: Option<String>) -> bool {
        let from_phase = {
            let mut instances = self.instances.write().await;
            let Some(instance) = instances.get_mut(instance_id) else {
                return false;
            };
            std::mem::replace(&mut instance.current_phase, phase.to_string())
        };

        let _ = self.changes.send(PhaseChange {
            instance_id: instance_id.to_string(),
            from_phase: Some(from_phase),
            to_phase: phase.to_string(),
            synced_from,
        });
        true
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowEngine for InMemoryEngine {
    async fn lookup(&self, instance_id: &str) -> Option<WorkflowInstance> {
        self.instances.read().await.get(instance_id).cloned()
    }

    async fn transition_to(
        &self,
        instance_id: &str,
        phase: &str,
        metadata: TransitionMetadata,
    ) -> bool {
        self.transition_calls.fetch_add(1, Ordering::SeqCst);
        let synced_from = metadata.synced_from.clone();
        *self.last_metadata.write().await = Some(metadata);

        if self.rejected.read().await.contains(instance_id) {
            return false;
        }
        self.apply(instance_id, phase, Some(synced_from)).await
    }

    fn subscribe(&self) -> broadcast::Receiver<PhaseChange> {
        self.changes.subscribe()
    }
}
