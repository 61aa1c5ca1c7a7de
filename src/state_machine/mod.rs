mod definition;
mod machine;
mod pipeline;

pub use definition::{PipelineDefinition, PipelineDefinitionBuilder, StageSpec};
pub use machine::{PhaseStateMachine, Transition};
pub use pipeline::{PipelineInstance, PipelineTask, StageEntry, StageStatus, TaskStatus};
