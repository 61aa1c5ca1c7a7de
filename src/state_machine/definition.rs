use serde::{Deserialize, Serialize};

use crate::error::{PhaseSyncError, Result};

/// A non-terminal stage and the stages it may move to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub successors: Vec<String>,
}

/// Declares the stages of a pipeline, its adjacency table, the bounded
/// retry stage and the terminal stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    stages: Vec<StageSpec>,
    terminals: Vec<String>,
    retry_stage: String,
    success_stage: String,
    failure_stage: String,
    max_retries: u32,
}

impl PipelineDefinition {
    pub fn builder() -> PipelineDefinitionBuilder {
        PipelineDefinitionBuilder::default()
    }

    /// The implement/verify/fix pipeline:
    ///
    /// `plan → implement → verify → complete`, with `verify → fix → verify`
    /// as the bounded retry loop and `cancelled` reachable from every
    /// non-terminal stage.
    pub fn standard(max_fix_attempts: u32) -> Self {
        PipelineDefinitionBuilder::default()
            .stage("plan", ["implement", "cancelled"])
            .stage("implement", ["verify", "cancelled"])
            .stage("verify", ["complete", "fix", "cancelled"])
            .stage("fix", ["verify", "fix", "cancelled"])
            .terminal("complete")
            .terminal("failed")
            .terminal("cancelled")
            .retry_stage("fix")
            .success_stage("complete")
            .failure_stage("failed")
            .max_retries(max_fix_attempts)
            .build_unchecked()
    }

    /// The first declared non-terminal stage.
    pub fn initial_stage(&self) -> &str {
        self.stages
            .first()
            .map_or(self.failure_stage.as_str(), |s| s.name.as_str())
    }

    pub fn is_declared(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s.name == stage) || self.is_terminal(stage)
    }

    pub fn is_terminal(&self, stage: &str) -> bool {
        self.terminals.iter().any(|t| t == stage)
    }

    /// Allowed successors of `stage`. Empty for terminal or unknown stages.
    pub fn successors(&self, stage: &str) -> &[String] {
        self.stages
            .iter()
            .find(|s| s.name == stage)
            .map(|s| s.successors.as_slice())
            .unwrap_or(&[])
    }

    pub fn allows(&self, from: &str, to: &str) -> bool {
        self.successors(from).iter().any(|s| s == to)
    }

    /// All declared stage names, non-terminal stages first.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .map(|s| s.name.as_str())
            .chain(self.terminals.iter().map(String::as_str))
    }

    pub fn retry_stage(&self) -> &str {
        &self.retry_stage
    }

    pub fn success_stage(&self) -> &str {
        &self.success_stage
    }

    pub fn failure_stage(&self) -> &str {
        &self.failure_stage
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PhaseSyncError::Validation(msg));

        if self.stages.is_empty() {
            return invalid("pipeline needs at least one non-terminal stage".into());
        }

        let mut seen = std::collections::HashSet::new();
        for name in self.stage_names() {
            if name.trim().is_empty() {
                return invalid("stage names must not be empty".into());
            }
            if !seen.insert(name) {
                return invalid(format!("stage '{name}' is declared twice"));
            }
        }

        for spec in &self.stages {
            if let Some(unknown) = spec.successors.iter().find(|s| !self.is_declared(s)) {
                return invalid(format!(
                    "stage '{}' lists undeclared successor '{unknown}'",
                    spec.name
                ));
            }
        }

        if self.is_terminal(&self.retry_stage) || !self.is_declared(&self.retry_stage) {
            return invalid(format!(
                "retry stage '{}' must be a declared non-terminal stage",
                self.retry_stage
            ));
        }
        for (role, stage) in [
            ("success", &self.success_stage),
            ("failure", &self.failure_stage),
        ] {
            if !self.is_terminal(stage) {
                return invalid(format!("{role} stage '{stage}' must be a terminal stage"));
            }
        }
        if self.success_stage == self.failure_stage {
            return invalid("success and failure stages must differ".into());
        }

        Ok(())
    }
}

/// Fluent builder for [`PipelineDefinition`].
#[derive(Debug, Default)]
pub struct PipelineDefinitionBuilder {
    stages: Vec<StageSpec>,
    terminals: Vec<String>,
    retry_stage: String,
    success_stage: String,
    failure_stage: String,
    max_retries: u32,
}

impl PipelineDefinitionBuilder {
    /// Declare a non-terminal stage. The first one declared is the initial stage.
    pub fn stage<I, S>(mut self, name: impl Into<String>, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages.push(StageSpec {
            name: name.into(),
            successors: successors.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn terminal(mut self, name: impl Into<String>) -> Self {
        self.terminals.push(name.into());
        self
    }

    pub fn retry_stage(mut self, name: impl Into<String>) -> Self {
        self.retry_stage = name.into();
        self
    }

    pub fn success_stage(mut self, name: impl Into<String>) -> Self {
        self.success_stage = name.into();
        self
    }

    pub fn failure_stage(mut self, name: impl Into<String>) -> Self {
        self.failure_stage = name.into();
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn build(self) -> Result<PipelineDefinition> {
        let definition = self.build_unchecked();
        definition.validate()?;
        Ok(definition)
    }

    fn build_unchecked(self) -> PipelineDefinition {
        PipelineDefinition {
            stages: self.stages,
            terminals: self.terminals,
            retry_stage: self.retry_stage,
            success_stage: self.success_stage,
            failure_stage: self.failure_stage,
            max_retries: self.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_definition_is_valid() {
        let def = PipelineDefinition::standard(3);
        def.validate().unwrap();
        assert_eq!(def.initial_stage(), "plan");
        assert_eq!(def.retry_stage(), "fix");
        assert_eq!(def.max_retries(), 3);
        assert!(def.allows("verify", "fix"));
        assert!(def.allows("fix", "verify"));
        assert!(!def.allows("plan", "verify"));
        assert!(def.successors("complete").is_empty());
        assert!(def.is_terminal("cancelled"));
    }

    #[test]
    fn stage_names_lists_terminals_last() {
        let def = PipelineDefinition::standard(1);
        let names: Vec<&str> = def.stage_names().collect();
        assert_eq!(
            names,
            vec!["plan", "implement", "verify", "fix", "complete", "failed", "cancelled"]
        );
    }

    #[test]
    fn rejects_undeclared_successor() {
        let err = PipelineDefinition::builder()
            .stage("build", ["deploy"])
            .stage("retry", ["build"])
            .terminal("done")
            .terminal("failed")
            .retry_stage("retry")
            .success_stage("done")
            .failure_stage("failed")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("undeclared successor 'deploy'"));
    }

    #[test]
    fn rejects_terminal_retry_stage() {
        let result = PipelineDefinition::builder()
            .stage("build", ["done"])
            .terminal("done")
            .terminal("failed")
            .retry_stage("failed")
            .success_stage("done")
            .failure_stage("failed")
            .build();
        assert!(matches!(result, Err(PhaseSyncError::Validation(_))));
    }

    #[test]
    fn rejects_duplicate_stage() {
        let result = PipelineDefinition::builder()
            .stage("build", ["done"])
            .stage("retry", ["build"])
            .terminal("done")
            .terminal("build")
            .terminal("failed")
            .retry_stage("retry")
            .success_stage("done")
            .failure_stage("failed")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_pipeline() {
        let result = PipelineDefinition::builder().terminal("done").build();
        assert!(result.is_err());
    }

    #[test]
    fn definition_roundtrips_through_json() {
        let def = PipelineDefinition::standard(2);
        let json = serde_json::to_string(&def).unwrap();
        let back: PipelineDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
    }
}
