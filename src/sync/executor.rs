//! One-directional phase synchronization between linked workflow instances.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use super::engine::{PhaseChange, SyncStrategy, TransitionMetadata, WorkflowEngine, WorkflowInstance};
use super::history::{HistoryFilter, SyncHistory, SyncRecord};
use super::link::{LinkOptions, SyncLink, SyncLinkRegistry};
use crate::config::PhaseSyncConfig;
use crate::error::{PhaseSyncError, Result};
use crate::resolver::{Context, MappingRule, PhaseResolver};

const EVENT_CAPACITY: usize = 256;

/// Notifications emitted by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    LinkCreated { source_id: String, target_id: String },
    SyncCompleted(SyncRecord),
    SyncFailed(SyncRecord),
    CycleDetected { source_id: String, target_id: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub cycles_detected: u64,
    pub total_links: usize,
    pub is_running: bool,
}

/// Tunables for a [`SyncExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub history_capacity: usize,
    /// Upper bound on every call into an engine.
    pub timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            history_capacity: SyncHistory::DEFAULT_CAPACITY,
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&PhaseSyncConfig> for SyncSettings {
    fn from(config: &PhaseSyncConfig) -> Self {
        Self {
            history_capacity: config.history_capacity,
            timeout: Duration::from_millis(config.sync_timeout_ms),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    cycles: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [&self.total, &self.successful, &self.failed, &self.cycles] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Marks both endpoints of a sync as in progress until dropped.
struct InFlight<'a> {
    markers: &'a Mutex<HashSet<String>>,
    ids: [String; 2],
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut markers = self.markers.lock().unwrap_or_else(PoisonError::into_inner);
        for id in &self.ids {
            markers.remove(id);
        }
    }
}

/// Phases observed during one attempt, kept for the history record.
#[derive(Default)]
struct Progress {
    source_phase: Option<String>,
    target_phase: Option<String>,
}

/// Links source instances to target instances and drives targets to the
/// phase resolved from their source.
pub struct SyncExecutor {
    resolver: Arc<RwLock<PhaseResolver>>,
    source: Arc<dyn WorkflowEngine>,
    target: Arc<dyn WorkflowEngine>,
    links: RwLock<SyncLinkRegistry>,
    history: RwLock<SyncHistory>,
    in_flight: Mutex<HashSet<String>>,
    /// Target id to the chain of sources whose syncs led to its pending change.
    lineage: Mutex<HashMap<String, Vec<String>>>,
    counters: Counters,
    running: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
    timeout: Duration,
}

impl SyncExecutor {
    pub fn new(
        resolver: Arc<RwLock<PhaseResolver>>,
        source: Arc<dyn WorkflowEngine>,
        target: Arc<dyn WorkflowEngine>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            resolver,
            source,
            target,
            links: RwLock::new(SyncLinkRegistry::new()),
            history: RwLock::new(SyncHistory::new(settings.history_capacity)),
            in_flight: Mutex::new(HashSet::new()),
            lineage: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            running: AtomicBool::new(false),
            events,
            timeout: settings.timeout,
        }
    }

    pub fn resolver(&self) -> Arc<RwLock<PhaseResolver>> {
        Arc::clone(&self.resolver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub(crate) fn source_engine(&self) -> &Arc<dyn WorkflowEngine> {
        &self.source
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Link `source_id` to `target_id`. Linking an existing pair again is a no-op.
    pub async fn link_workflows(
        &self,
        source_id: &str,
        target_id: &str,
        options: LinkOptions,
    ) -> Result<()> {
        if source_id == target_id {
            return Err(PhaseSyncError::Validation(format!(
                "cannot link instance '{source_id}' to itself"
            )));
        }
        let strategy = match options.strategy.as_deref() {
            Some(tag) => SyncStrategy::parse(tag)?,
            None => SyncStrategy::default(),
        };
        let mapping_rules = match options.mapping_rules {
            Some(rules) => {
                let resolver = self.resolver.read().await;
                let prepared = rules
                    .into_iter()
                    .map(|rule| resolver.prepare_rule(rule))
                    .collect::<Result<Vec<MappingRule>>>()?;
                Some(prepared)
            }
            None => None,
        };

        self.lookup(&self.source, source_id, "source instance").await?;
        self.lookup(&self.target, target_id, "target instance").await?;

        let link = SyncLink {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            strategy,
            mapping_rules,
            context: options.context,
            created_at: Utc::now(),
        };
        if !self.links.write().await.insert(link) {
            warn!(source_id, target_id, "Link already exists, ignoring");
            return Ok(());
        }

        info!(source_id, target_id, %strategy, "Linked workflows");
        self.emit(SyncEvent::LinkCreated {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
        });
        Ok(())
    }

    /// Run one synchronization attempt. Never returns an error: failures are
    /// recorded in the history and reported as `false`.
    pub async fn sync(&self, source_id: &str, target_id: &str) -> bool {
        self.sync_with(source_id, target_id, &[]).await
    }

    /// `ancestors` are the sources upstream of `source_id` in the current
    /// chain of synced changes.
    async fn sync_with(&self, source_id: &str, target_id: &str, ancestors: &[String]) -> bool {
        let Some(_guard) = self.acquire(source_id, target_id) else {
            self.cycle_detected(source_id, target_id);
            return false;
        };

        let mut progress = Progress::default();
        let outcome = self
            .attempt(source_id, target_id, ancestors, &mut progress)
            .await;

        let mut record = SyncRecord {
            source_instance_id: source_id.to_string(),
            target_instance_id: target_id.to_string(),
            source_phase: progress.source_phase,
            target_phase: progress.target_phase,
            timestamp: Utc::now(),
            success: false,
            skipped: false,
            error: None,
        };

        match outcome {
            Ok(skipped) => {
                record.success = true;
                record.skipped = skipped;
                self.counters.total.fetch_add(1, Ordering::Relaxed);
                self.counters.successful.fetch_add(1, Ordering::Relaxed);
                debug!(source_id, target_id, phase = ?record.target_phase, skipped, "Sync completed");
                self.history.write().await.push(record.clone());
                self.emit(SyncEvent::SyncCompleted(record));
                true
            }
            Err(e) => {
                record.error = Some(e.to_string());
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(source_id, target_id, error = %e, "Sync failed");
                self.history.write().await.push(record.clone());
                self.emit(SyncEvent::SyncFailed(record));
                false
            }
        }
    }

    /// Sync every target linked from the instance in `change`, one after another.
    ///
    /// A target that already sits upstream of `change` in a chain of synced
    /// changes is not synced again; the attempt counts as a detected cycle.
    pub async fn propagate(&self, change: &PhaseChange) -> Vec<(String, bool)> {
        let recorded = self
            .lineage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&change.instance_id);
        let ancestors = match (&change.synced_from, recorded) {
            (None, _) => Vec::new(),
            (Some(_), Some(chain)) => chain,
            (Some(source), None) => vec![source.clone()],
        };

        let targets = self.get_linked_workflows(&change.instance_id).await;
        if !targets.is_empty() {
            debug!(
                instance_id = %change.instance_id,
                to_phase = %change.to_phase,
                targets = targets.len(),
                "Propagating phase change"
            );
        }

        let mut results = Vec::with_capacity(targets.len());
        for target_id in targets {
            if ancestors.contains(&target_id) {
                self.cycle_detected(&change.instance_id, &target_id);
                results.push((target_id, false));
                continue;
            }
            let ok = self
                .sync_with(&change.instance_id, &target_id, &ancestors)
                .await;
            results.push((target_id, ok));
        }
        results
    }

    /// Outbound target ids of `source_id`.
    pub async fn get_linked_workflows(&self, source_id: &str) -> Vec<String> {
        self.links.read().await.targets_of(source_id)
    }

    pub async fn links(&self) -> Vec<SyncLink> {
        self.links.read().await.links().to_vec()
    }

    pub async fn get_sync_history(&self, filter: &HistoryFilter) -> Vec<SyncRecord> {
        self.history.read().await.query(filter)
    }

    pub async fn stats(&self) -> SyncStats {
        SyncStats {
            total_syncs: self.counters.total.load(Ordering::Relaxed),
            successful_syncs: self.counters.successful.load(Ordering::Relaxed),
            failed_syncs: self.counters.failed.load(Ordering::Relaxed),
            cycles_detected: self.counters.cycles.load(Ordering::Relaxed),
            total_links: self.links.read().await.len(),
            is_running: self.running.load(Ordering::SeqCst),
        }
    }

    /// Drop all links, history and counters.
    pub async fn reset(&self) {
        self.links.write().await.clear();
        self.history.write().await.clear();
        self.lineage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.counters.reset();
        info!("Sync state reset");
    }

    async fn attempt(
        &self,
        source_id: &str,
        target_id: &str,
        ancestors: &[String],
        progress: &mut Progress,
    ) -> Result<bool> {
        let source = self.lookup(&self.source, source_id, "source instance").await?;
        progress.source_phase = Some(source.current_phase.clone());
        let target = self.lookup(&self.target, target_id, "target instance").await?;

        let link = self.links.read().await.get(source_id, target_id).cloned();
        let context = merged_context(&source, &target, link.as_ref());
        let phases = {
            let resolver = self.resolver.read().await;
            match link.as_ref().and_then(|l| l.mapping_rules.as_deref()) {
                Some(rules) => resolver.map_with_rules(rules, &source.current_phase, &context),
                None => resolver.map(&source.current_phase, &context),
            }
        };

        let phase = phases
            .into_iter()
            .next()
            .ok_or_else(|| PhaseSyncError::Unresolved(source.current_phase.clone()))?;
        progress.target_phase = Some(phase.clone());

        if target.current_phase == phase {
            debug!(target_id, %phase, "Target already in resolved phase");
            return Ok(true);
        }

        let metadata = TransitionMetadata {
            synced_from: source_id.to_string(),
            source_phase: source.current_phase.clone(),
            strategy: link.map(|l| l.strategy).unwrap_or_default(),
            timestamp: Utc::now(),
        };
        // Recorded before the call so the change it publishes can be traced back.
        self.lineage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target_id.to_string(), lineage_of(ancestors, source_id));
        let accepted = self
            .bounded("transition", self.target.transition_to(target_id, &phase, metadata))
            .await;
        if !matches!(accepted, Ok(true)) {
            self.lineage
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(target_id);
        }
        if !accepted? {
            return Err(PhaseSyncError::Transition {
                instance_id: target_id.to_string(),
                phase,
            });
        }
        Ok(false)
    }

    async fn lookup(
        &self,
        engine: &Arc<dyn WorkflowEngine>,
        instance_id: &str,
        kind: &'static str,
    ) -> Result<WorkflowInstance> {
        self.bounded("lookup", engine.lookup(instance_id))
            .await?
            .ok_or_else(|| PhaseSyncError::not_found(kind, instance_id))
    }

    async fn bounded<T>(&self, operation: &'static str, fut: impl Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| PhaseSyncError::Timeout {
                operation,
                after_ms: self.timeout.as_millis() as u64,
            })
    }

    fn acquire(&self, source_id: &str, target_id: &str) -> Option<InFlight<'_>> {
        let mut markers = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if markers.contains(source_id) || markers.contains(target_id) {
            return None;
        }
        markers.insert(source_id.to_string());
        markers.insert(target_id.to_string());
        Some(InFlight {
            markers: &self.in_flight,
            ids: [source_id.to_string(), target_id.to_string()],
        })
    }

    fn cycle_detected(&self, source_id: &str, target_id: &str) {
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        warn!(source_id, target_id, "Sync cycle detected, aborting");
        self.emit(SyncEvent::CycleDetected {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
        });
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn lineage_of(ancestors: &[String], source_id: &str) -> Vec<String> {
    let mut chain = ancestors.to_vec();
    chain.push(source_id.to_string());
    chain
}

fn merged_context(
    source: &WorkflowInstance,
    target: &WorkflowInstance,
    link: Option<&SyncLink>,
) -> Context {
    let mut context = source.context.clone();
    if let Some(link) = link {
        context.extend(link.context.clone());
    }
    context.insert("sourceId".into(), source.instance_id.clone().into());
    context.insert("targetId".into(), target.instance_id.clone().into());
    context.insert("sourceWorkflow".into(), source.workflow_kind.clone().into());
    context.insert("targetWorkflow".into(), target.workflow_kind.clone().into());
    context
}
