use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::engine::SyncStrategy;
use crate::resolver::{Context, MappingRule, NewRule};

/// A directed source → target relationship. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLink {
    pub source_id: String,
    pub target_id: String,
    pub strategy: SyncStrategy,
    /// Replaces the global rule table for this link when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_rules: Option<Vec<MappingRule>>,
    #[serde(default)]
    pub context: Context,
    pub created_at: DateTime<Utc>,
}

/// Options accepted by [`SyncExecutor::link_workflows`](super::SyncExecutor::link_workflows).
#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    /// Strategy tag; only `leader-follower` is accepted.
    pub strategy: Option<String>,
    pub mapping_rules: Option<Vec<NewRule>>,
    /// Extra context merged over the source instance's context.
    pub context: Context,
}

impl LinkOptions {
    pub fn strategy(mut self, tag: impl Into<String>) -> Self {
        self.strategy = Some(tag.into());
        self
    }

    pub fn rules(mut self, rules: Vec<NewRule>) -> Self {
        self.mapping_rules = Some(rules);
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// Links in registration order, at most one per (source, target) pair.
#[derive(Debug, Default)]
pub struct SyncLinkRegistry {
    links: Vec<SyncLink>,
}

impl SyncLinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `link`. Returns `false` (and stores nothing) if the pair is already linked.
    pub fn insert(&mut self, link: SyncLink) -> bool {
        if self.contains(&link.source_id, &link.target_id) {
            return false;
        }
        self.links.push(link);
        true
    }

    pub fn contains(&self, source_id: &str, target_id: &str) -> bool {
        self.get(source_id, target_id).is_some()
    }

    pub fn get(&self, source_id: &str, target_id: &str) -> Option<&SyncLink> {
        self.links
            .iter()
            .find(|l| l.source_id == source_id && l.target_id == target_id)
    }

    /// Outbound target ids of `source_id`, in link order.
    pub fn targets_of(&self, source_id: &str) -> Vec<String> {
        self.links
            .iter()
            .filter(|l| l.source_id == source_id)
            .map(|l| l.target_id.clone())
            .collect()
    }

    pub fn links(&self) -> &[SyncLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }
}
