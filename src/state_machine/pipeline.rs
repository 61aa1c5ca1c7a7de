use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one entry in a pipeline's stage history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The pipeline is currently in this stage.
    Active,
    /// The stage was left for another one, or is the success terminal.
    Completed,
    /// The failure terminal.
    Failed,
    /// Any other terminal (e.g. `cancelled`).
    Stopped,
}

/// One stage visit. Entries are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageEntry {
    pub stage: String,
    pub entered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: StageStatus,
    #[serde(default)]
    pub from_stage: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// State of a single pipeline driven by a
/// [`PhaseStateMachine`](super::PhaseStateMachine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInstance {
    pub current_stage: String,
    pub stage_history: Vec<StageEntry>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub active: bool,
}

impl PipelineInstance {
    pub fn new(initial_stage: &str, max_retries: u32) -> Self {
        Self {
            current_stage: initial_stage.to_string(),
            stage_history: vec![StageEntry {
                stage: initial_stage.to_string(),
                entered_at: Utc::now(),
                completed_at: None,
                status: StageStatus::Active,
                from_stage: None,
                reason: Some("created".to_string()),
            }],
            retry_count: 0,
            max_retries,
            active: true,
        }
    }

    /// Stage names in visiting order.
    pub fn visited_stages(&self) -> Vec<&str> {
        self.stage_history.iter().map(|e| e.stage.as_str()).collect()
    }

    pub(crate) fn close_current(&mut self, now: DateTime<Utc>) {
        if let Some(entry) = self.stage_history.last_mut() {
            if entry.completed_at.is_none() {
                entry.completed_at = Some(now);
            }
            if entry.status == StageStatus::Active {
                entry.status = StageStatus::Completed;
            }
        }
    }
}

/// Lifecycle of a unit of work tracked alongside a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTask {
    pub id: u32,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineTask {
    pub fn new(id: u32, description: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            description,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
