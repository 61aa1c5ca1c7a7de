use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One synchronization attempt. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub source_instance_id: String,
    pub target_instance_id: String,
    /// Absent when the source could not be looked up.
    pub source_phase: Option<String>,
    /// Absent when the attempt failed before resolution.
    pub target_phase: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filters for [`SyncHistory::query`].
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Matches either side of the sync.
    pub instance_id: Option<String>,
    pub success: Option<bool>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn instance(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// FIFO log of sync records bounded by `capacity`.
#[derive(Debug)]
pub struct SyncHistory {
    records: VecDeque<SyncRecord>,
    capacity: usize,
}

impl SyncHistory {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
            capacity,
        }
    }

    /// Append a record, evicting the oldest one when full.
    pub fn push(&mut self, record: SyncRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Matching records, oldest first.
    pub fn query(&self, filter: &HistoryFilter) -> Vec<SyncRecord> {
        let matches: Vec<&SyncRecord> = self
            .records
            .iter()
            .filter(|r| {
                filter.instance_id.as_deref().is_none_or(|id| {
                    r.source_instance_id == id || r.target_instance_id == id
                })
            })
            .filter(|r| filter.success.is_none_or(|s| r.success == s))
            .collect();

        let skip = filter
            .limit
            .map_or(0, |limit| matches.len().saturating_sub(limit));
        matches.into_iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for SyncHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
