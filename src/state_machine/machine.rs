use chrono::Utc;
use tracing::{debug, info, warn};

use super::definition::PipelineDefinition;
use super::pipeline::{PipelineInstance, StageEntry, StageStatus};
use crate::error::{PhaseSyncError, Result};

/// The outcome of an accepted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Moved to a non-terminal stage.
    Next(String),
    /// Entered the retry stage; `attempt` is the new retry count.
    Retry { stage: String, attempt: u32 },
    /// The retry cap was exceeded and the pipeline was sent to the failure terminal.
    Exhausted { requested: String, landed: String },
    /// Reached a terminal stage.
    Complete(String),
}

impl Transition {
    pub fn stage(&self) -> &str {
        match self {
            Transition::Next(stage) | Transition::Complete(stage) => stage,
            Transition::Retry { stage, .. } => stage,
            Transition::Exhausted { landed, .. } => landed,
        }
    }
}

/// Drives a [`PipelineInstance`] through the stages of a [`PipelineDefinition`].
///
/// Transitions are checked against the adjacency table. Entering the retry
/// stage bumps `retry_count`; once it exceeds `max_retries` the request is
/// redirected to the failure terminal. Entering the success terminal resets
/// the count. Terminal stages deactivate the pipeline until [`resume`](Self::resume).
#[derive(Debug, Clone)]
pub struct PhaseStateMachine {
    definition: PipelineDefinition,
    instance: PipelineInstance,
}

impl PhaseStateMachine {
    pub fn new(definition: PipelineDefinition) -> Self {
        let instance = PipelineInstance::new(definition.initial_stage(), definition.max_retries());
        Self {
            definition,
            instance,
        }
    }

    /// Rebuild a machine from a persisted instance.
    pub fn restore(definition: PipelineDefinition, instance: PipelineInstance) -> Result<Self> {
        if !definition.is_declared(&instance.current_stage) {
            return Err(PhaseSyncError::Validation(format!(
                "persisted stage '{}' is not declared by the pipeline",
                instance.current_stage
            )));
        }
        // A resumed pipeline may be active in a terminal stage; the reverse never happens.
        if !instance.active && !definition.is_terminal(&instance.current_stage) {
            return Err(PhaseSyncError::Validation(format!(
                "persisted pipeline is inactive in non-terminal stage '{}'",
                instance.current_stage
            )));
        }
        Ok(Self {
            definition,
            instance,
        })
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn instance(&self) -> &PipelineInstance {
        &self.instance
    }

    pub fn current_stage(&self) -> &str {
        &self.instance.current_stage
    }

    pub fn stage_history(&self) -> &[StageEntry] {
        &self.instance.stage_history
    }

    pub fn retry_count(&self) -> u32 {
        self.instance.retry_count
    }

    pub fn is_active(&self) -> bool {
        self.instance.active
    }

    /// Stages reachable from the current stage.
    pub fn allowed_transitions(&self) -> &[String] {
        if self.instance.active {
            self.definition.successors(&self.instance.current_stage)
        } else {
            &[]
        }
    }

    /// Move to `to_stage`.
    ///
    /// Fails with [`PhaseSyncError::TerminalState`] once the pipeline is
    /// inactive and with [`PhaseSyncError::IllegalTransition`] when
    /// `to_stage` is not a successor of the current stage.
    pub fn transition(&mut self, to_stage: &str, reason: Option<&str>) -> Result<Transition> {
        let from = self.instance.current_stage.clone();
        if !self.instance.active || self.definition.is_terminal(&from) {
            return Err(PhaseSyncError::TerminalState(from));
        }
        if !self.definition.allows(&from, to_stage) {
            return Err(PhaseSyncError::IllegalTransition {
                from,
                to: to_stage.to_string(),
            });
        }

        let mut landed = to_stage.to_string();
        let mut outcome = None;

        if to_stage == self.definition.retry_stage() {
            self.instance.retry_count += 1;
            if self.instance.retry_count > self.instance.max_retries {
                landed = self.definition.failure_stage().to_string();
                warn!(
                    attempts = self.instance.retry_count,
                    max = self.instance.max_retries,
                    "Retry limit exceeded, redirecting {to_stage} -> {landed}"
                );
                outcome = Some(Transition::Exhausted {
                    requested: to_stage.to_string(),
                    landed: landed.clone(),
                });
            } else {
                outcome = Some(Transition::Retry {
                    stage: landed.clone(),
                    attempt: self.instance.retry_count,
                });
            }
        }

        if landed == self.definition.success_stage() {
            self.instance.retry_count = 0;
        }

        let reason = match (&outcome, reason) {
            (Some(Transition::Exhausted { .. }), None) => Some("retry limit exceeded".to_string()),
            (_, reason) => reason.map(str::to_string),
        };
        self.enter(&landed, from, reason);

        let outcome = match outcome {
            Some(outcome) => outcome,
            None if self.definition.is_terminal(&landed) => Transition::Complete(landed),
            None => Transition::Next(landed),
        };
        debug!(stage = %self.instance.current_stage, active = self.instance.active, "Pipeline transition");
        Ok(outcome)
    }

    /// Reactivate an inactive pipeline in `to_stage`, skipping adjacency checks.
    pub fn resume(&mut self, to_stage: &str) -> Result<()> {
        if self.instance.active {
            return Err(PhaseSyncError::InvalidState(format!(
                "pipeline is already active in '{}'",
                self.instance.current_stage
            )));
        }
        if !self.definition.is_declared(to_stage) {
            return Err(PhaseSyncError::Validation(format!(
                "cannot resume into undeclared stage '{to_stage}'"
            )));
        }

        let from = self.instance.current_stage.clone();
        self.instance.retry_count = 0;
        self.enter(to_stage, from, Some("resumed".to_string()));
        self.instance.active = true;
        info!(stage = to_stage, "Pipeline resumed");
        Ok(())
    }

    fn enter(&mut self, stage: &str, from: String, reason: Option<String>) {
        let now = Utc::now();
        self.instance.close_current(now);

        let terminal = self.definition.is_terminal(stage);
        let status = if !terminal {
            StageStatus::Active
        } else if stage == self.definition.success_stage() {
            StageStatus::Completed
        } else if stage == self.definition.failure_stage() {
            StageStatus::Failed
        } else {
            StageStatus::Stopped
        };

        self.instance.stage_history.push(StageEntry {
            stage: stage.to_string(),
            entered_at: now,
            completed_at: terminal.then_some(now),
            status,
            from_stage: Some(from),
            reason,
        });
        self.instance.current_stage = stage.to_string();
        self.instance.active = !terminal;
    }
}
