use std::collections::BTreeMap;

use chrono::Utc;
use tracing::info;

use crate::error::{PhaseSyncError, Result};
use crate::state_machine::{
    PhaseStateMachine, PipelineDefinition, PipelineTask, TaskStatus, Transition,
};
use crate::store::{PipelineSnapshot, SnapshotStore};

#[derive(Clone)]
struct Pipeline {
    machine: PhaseStateMachine,
    tasks: Vec<PipelineTask>,
}

/// Owns named pipelines and keeps their snapshot file current.
///
/// Constructed explicitly by the host process and passed where needed.
/// State is loaded once in [`open`](Self::open). Every mutation is applied to
/// a copy, written to the store, and only then made live, so a failed save
/// leaves both memory and the file as they were.
pub struct PipelineCoordinator {
    definition: PipelineDefinition,
    store: SnapshotStore,
    pipelines: BTreeMap<String, Pipeline>,
}

impl PipelineCoordinator {
    /// Load every persisted pipeline from `store`.
    pub fn open(definition: PipelineDefinition, store: SnapshotStore) -> Result<Self> {
        let mut pipelines = BTreeMap::new();
        for (name, snapshot) in store.load()? {
            let machine = PhaseStateMachine::restore(definition.clone(), snapshot.to_instance())
                .map_err(|e| PhaseSyncError::Validation(format!("pipeline '{name}': {e}")))?;
            pipelines.insert(
                name,
                Pipeline {
                    machine,
                    tasks: snapshot.tasks,
                },
            );
        }
        info!(path = %store.path().display(), pipelines = pipelines.len(), "Loaded pipelines");

        Ok(Self {
            definition,
            store,
            pipelines,
        })
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&PhaseStateMachine> {
        self.pipelines.get(name).map(|p| &p.machine)
    }

    pub fn tasks(&self, name: &str) -> Option<&[PipelineTask]> {
        self.pipelines.get(name).map(|p| p.tasks.as_slice())
    }

    pub fn snapshot(&self, name: &str) -> Option<PipelineSnapshot> {
        self.pipelines
            .get(name)
            .map(|p| PipelineSnapshot::capture(p.machine.instance(), &p.tasks))
    }

    /// Start a new pipeline in the definition's initial stage.
    pub fn create(&mut self, name: &str) -> Result<&PhaseStateMachine> {
        if name.trim().is_empty() {
            return Err(PhaseSyncError::Validation("pipeline name must not be empty".into()));
        }
        if self.pipelines.contains_key(name) {
            return Err(PhaseSyncError::Validation(format!(
                "pipeline '{name}' already exists"
            )));
        }

        let pipeline = Pipeline {
            machine: PhaseStateMachine::new(self.definition.clone()),
            tasks: Vec::new(),
        };
        self.commit(name, Some(pipeline))?;
        info!(pipeline = name, "Created pipeline");
        self.get(name)
            .ok_or_else(|| PhaseSyncError::not_found("pipeline", name))
    }

    pub fn transition(
        &mut self,
        name: &str,
        to_stage: &str,
        reason: Option<&str>,
    ) -> Result<Transition> {
        let mut pipeline = self.pipeline(name)?.clone();
        let outcome = pipeline.machine.transition(to_stage, reason)?;
        self.commit(name, Some(pipeline))?;
        info!(pipeline = name, stage = outcome.stage(), "Pipeline advanced");
        Ok(outcome)
    }

    pub fn resume(&mut self, name: &str, to_stage: &str) -> Result<()> {
        let mut pipeline = self.pipeline(name)?.clone();
        pipeline.machine.resume(to_stage)?;
        self.commit(name, Some(pipeline))
    }

    /// Track a new task on `name`, returning its id.
    pub fn add_task(&mut self, name: &str, description: &str) -> Result<u32> {
        if description.trim().is_empty() {
            return Err(PhaseSyncError::Validation("task description must not be empty".into()));
        }
        let mut pipeline = self.pipeline(name)?.clone();
        let id = pipeline.tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        pipeline
            .tasks
            .push(PipelineTask::new(id, description.to_string()));
        self.commit(name, Some(pipeline))?;
        Ok(id)
    }

    pub fn set_task_status(&mut self, name: &str, task_id: u32, status: TaskStatus) -> Result<()> {
        let mut pipeline = self.pipeline(name)?.clone();
        let task = pipeline
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| PhaseSyncError::not_found("task", task_id.to_string()))?;
        task.status = status;
        task.updated_at = Utc::now();
        self.commit(name, Some(pipeline))
    }

    /// Forget a pipeline. Returns `false` if it did not exist.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        if !self.pipelines.contains_key(name) {
            return Ok(false);
        }
        self.commit(name, None)?;
        Ok(true)
    }

    fn pipeline(&self, name: &str) -> Result<&Pipeline> {
        self.pipelines
            .get(name)
            .ok_or_else(|| PhaseSyncError::not_found("pipeline", name))
    }

    /// Save the state with `name` replaced by `next` (or dropped), then apply it.
    fn commit(&mut self, name: &str, next: Option<Pipeline>) -> Result<()> {
        let mut snapshots: BTreeMap<String, PipelineSnapshot> = self
            .pipelines
            .iter()
            .map(|(key, p)| {
                (
                    key.clone(),
                    PipelineSnapshot::capture(p.machine.instance(), &p.tasks),
                )
            })
            .collect();
        match &next {
            Some(p) => {
                snapshots.insert(
                    name.to_string(),
                    PipelineSnapshot::capture(p.machine.instance(), &p.tasks),
                );
            }
            None => {
                snapshots.remove(name);
            }
        }
        self.store.save(&snapshots)?;

        match next {
            Some(p) => {
                self.pipelines.insert(name.to_string(), p);
            }
            None => {
                self.pipelines.remove(name);
            }
        }
        Ok(())
    }
}
