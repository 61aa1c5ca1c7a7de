use thiserror::Error;

/// Errors raised by the resolver, the sync engine, and the pipeline state machine.
#[derive(Debug, Error)]
pub enum PhaseSyncError {
    /// A malformed rule, link request, or pipeline definition. Rejected before any state change.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Unsupported sync strategy: {0}")]
    UnsupportedStrategy(String),

    /// A custom mapper broke its output contract.
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Cannot resolve phase '{0}' for target")]
    Unresolved(String),

    #[error("Engine rejected transition of {instance_id} to '{phase}'")]
    Transition { instance_id: String, phase: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Pipeline is in terminal stage '{0}'")]
    TerminalState(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to persist snapshot: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl PhaseSyncError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PhaseSyncError>;

/// Failure of a rule condition. Evaluating to this is, by contract, a non-match.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("value at '{key}' is not a number")]
    NotANumber { key: String },

    #[error("unknown predicate '{0}'")]
    UnknownPredicate(String),

    #[error("predicate failed: {0}")]
    Predicate(String),
}
