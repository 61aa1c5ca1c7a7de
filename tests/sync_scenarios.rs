use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use phasesync::resolver::{Condition, Context, NewRule, PhaseResolver};
use phasesync::sync::{
    HistoryFilter, InMemoryEngine, LinkOptions, PhaseChange, SyncEvent, SyncExecutor,
    SyncSettings, TransitionMetadata, WorkflowEngine, WorkflowInstance,
};
use tokio::sync::{Notify, RwLock, broadcast};

/// Blocks inside `transition_to` until released.
struct GatedEngine {
    instances: HashMap<String, WorkflowInstance>,
    entered: Notify,
    release: Notify,
    changes: broadcast::Sender<PhaseChange>,
}

impl GatedEngine {
    fn new(instances: Vec<WorkflowInstance>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            instances: instances
                .into_iter()
                .map(|i| (i.instance_id.clone(), i))
                .collect(),
            entered: Notify::new(),
            release: Notify::new(),
            changes,
        }
    }
}

#[async_trait]
impl WorkflowEngine for GatedEngine {
    async fn lookup(&self, instance_id: &str) -> Option<WorkflowInstance> {
        self.instances.get(instance_id).cloned()
    }

    async fn transition_to(&self, _: &str, _: &str, _: TransitionMetadata) -> bool {
        self.entered.notify_one();
        self.release.notified().await;
        true
    }

    fn subscribe(&self) -> broadcast::Receiver<PhaseChange> {
        self.changes.subscribe()
    }
}

/// Answers lookups but never finishes a transition.
struct HangingEngine {
    inner: InMemoryEngine,
}

#[async_trait]
impl WorkflowEngine for HangingEngine {
    async fn lookup(&self, instance_id: &str) -> Option<WorkflowInstance> {
        self.inner.lookup(instance_id).await
    }

    async fn transition_to(&self, _: &str, _: &str, _: TransitionMetadata) -> bool {
        std::future::pending::<bool>().await
    }

    fn subscribe(&self) -> broadcast::Receiver<PhaseChange> {
        self.inner.subscribe()
    }
}

fn resolver_with(rules: Vec<NewRule>) -> Arc<RwLock<PhaseResolver>> {
    let mut resolver = PhaseResolver::new();
    for rule in rules {
        resolver.register_rule(rule).unwrap();
    }
    Arc::new(RwLock::new(resolver))
}

#[test]
fn one_to_one_rule_maps_both_ways() {
    let mut resolver = PhaseResolver::new();
    resolver
        .register_rule(NewRule::new("draft", ["planning"]))
        .unwrap();

    let ctx = Context::new();
    assert_eq!(resolver.map("draft", &ctx), vec!["planning"]);
    assert_eq!(resolver.reverse_map("planning", &ctx), vec!["draft"]);
}

#[test]
fn heavier_rule_ranks_first() {
    let mut resolver = PhaseResolver::new();
    resolver
        .register_rule(NewRule::new("draft", ["x"]).with_weight(0.5))
        .unwrap();
    resolver
        .register_rule(NewRule::new("draft", ["y"]).with_weight(0.9))
        .unwrap();

    assert_eq!(resolver.map("draft", &Context::new()), vec!["y", "x"]);
}

#[tokio::test]
async fn target_already_in_phase_is_a_skipped_success() {
    let engine = Arc::new(InMemoryEngine::new());
    engine
        .insert(WorkflowInstance::new("A", "product", "review"))
        .await;
    engine
        .insert(WorkflowInstance::new("B", "engineering", "design"))
        .await;

    let executor = SyncExecutor::new(
        resolver_with(vec![NewRule::new("review", ["design"])]),
        engine.clone(),
        engine.clone(),
        SyncSettings::default(),
    );
    executor
        .link_workflows("A", "B", LinkOptions::default())
        .await
        .unwrap();

    assert!(executor.sync("A", "B").await);
    assert_eq!(engine.transition_calls(), 0);

    let history = executor.get_sync_history(&HistoryFilter::default()).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert!(history[0].skipped);

    let stats = executor.stats().await;
    assert_eq!(stats.successful_syncs, 1);
    assert_eq!(stats.total_links, 1);
}

#[tokio::test]
async fn busy_endpoint_aborts_as_cycle() {
    let engine = Arc::new(GatedEngine::new(vec![
        WorkflowInstance::new("A", "product", "review"),
        WorkflowInstance::new("B", "engineering", "backlog"),
        WorkflowInstance::new("C", "qa", "backlog"),
    ]));
    let executor = Arc::new(SyncExecutor::new(
        resolver_with(vec![NewRule::new("review", ["design"])]),
        engine.clone(),
        engine.clone(),
        SyncSettings::default(),
    ));
    let mut events = executor.subscribe();

    let first = tokio::spawn({
        let executor = Arc::clone(&executor);
        async move { executor.sync("A", "B").await }
    });
    engine.entered.notified().await;

    // B is mid-sync, so B -> C must not start.
    assert!(!executor.sync("B", "C").await);
    let stats = executor.stats().await;
    assert_eq!(stats.cycles_detected, 1);
    assert!(executor
        .get_sync_history(&HistoryFilter::default())
        .await
        .is_empty());
    assert!(matches!(
        events.recv().await.unwrap(),
        SyncEvent::CycleDetected { .. }
    ));

    engine.release.notify_one();
    assert!(first.await.unwrap());

    let stats = executor.stats().await;
    assert_eq!(stats.cycles_detected, 1);
    assert_eq!(stats.successful_syncs, 1);
    assert_eq!(
        executor
            .get_sync_history(&HistoryFilter::default())
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn hung_transition_times_out_and_releases_markers() {
    let engine = Arc::new(HangingEngine {
        inner: InMemoryEngine::new(),
    });
    engine
        .inner
        .insert(WorkflowInstance::new("A", "product", "review"))
        .await;
    engine
        .inner
        .insert(WorkflowInstance::new("B", "engineering", "backlog"))
        .await;

    let executor = SyncExecutor::new(
        resolver_with(vec![NewRule::new("review", ["design"])]),
        engine.clone(),
        engine.clone(),
        SyncSettings {
            history_capacity: 10,
            timeout: Duration::from_millis(50),
        },
    );

    assert!(!executor.sync("A", "B").await);
    let failures = executor
        .get_sync_history(&HistoryFilter::default().success(false))
        .await;
    assert_eq!(failures.len(), 1);
    assert!(failures[0].error.as_deref().unwrap().contains("timed out"));
    assert_eq!(failures[0].target_phase.as_deref(), Some("design"));

    // Markers were released, so a retry is a fresh failure rather than a cycle.
    assert!(!executor.sync("A", "B").await);
    let stats = executor.stats().await;
    assert_eq!(stats.failed_syncs, 2);
    assert_eq!(stats.cycles_detected, 0);
}

#[tokio::test]
async fn history_keeps_only_the_newest_records() {
    let engine = Arc::new(InMemoryEngine::new());
    let executor = SyncExecutor::new(
        resolver_with(Vec::new()),
        engine.clone(),
        engine.clone(),
        SyncSettings {
            history_capacity: 3,
            timeout: Duration::from_secs(1),
        },
    );

    for n in 0..5 {
        assert!(!executor.sync(&format!("S{n}"), "T").await);
    }

    let history = executor.get_sync_history(&HistoryFilter::default()).await;
    let sources: Vec<_> = history
        .iter()
        .map(|r| r.source_instance_id.as_str())
        .collect();
    assert_eq!(sources, vec!["S2", "S3", "S4"]);
    assert_eq!(executor.stats().await.failed_syncs, 5);
}

#[tokio::test]
async fn conditional_link_rules_pick_by_context() {
    let engine = Arc::new(InMemoryEngine::new());
    engine
        .insert(WorkflowInstance::new("A", "product", "approved"))
        .await;
    engine
        .insert(WorkflowInstance::new("B", "engineering", "backlog"))
        .await;

    let executor = SyncExecutor::new(
        resolver_with(vec![NewRule::new("approved", ["build"])]),
        engine.clone(),
        engine.clone(),
        SyncSettings::default(),
    );

    let mut context = Context::new();
    context.insert("priority".into(), "high".into());
    let options = LinkOptions::default().context(context).rules(vec![
        NewRule::new("approved", ["build"]),
        NewRule::new("approved", ["expedite"])
            .with_weight(5.0)
            .with_condition(Condition::equals("priority", "high")),
    ]);
    executor.link_workflows("A", "B", options).await.unwrap();

    assert!(executor.sync("A", "B").await);
    assert_eq!(engine.phase_of("B").await.as_deref(), Some("expedite"));

    let metadata = engine.last_metadata().await.unwrap();
    assert_eq!(metadata.synced_from, "A");
    assert_eq!(metadata.source_phase, "approved");
}
