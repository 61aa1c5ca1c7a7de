//! Persistência dos snapshots de pipeline em um único arquivo JSON.
//!
//! O arquivo é reescrito por inteiro a cada mutação, mas de forma atômica:
//! o conteúdo vai para um arquivo temporário no mesmo diretório, que então
//! substitui o original via rename. Um leitor nunca vê um arquivo parcial.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;
use crate::state_machine::{PipelineInstance, PipelineTask, StageEntry};

/// Estado persistido de um pipeline, indexado pelo nome no arquivo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub current_phase: String,
    pub stage_history: Vec<StageEntry>,
    pub fix_loop_count: u32,
    pub max_fix_attempts: u32,
    pub active: bool,
    #[serde(default)]
    pub tasks: Vec<PipelineTask>,
}

impl PipelineSnapshot {
    pub fn capture(instance: &PipelineInstance, tasks: &[PipelineTask]) -> Self {
        Self {
            current_phase: instance.current_stage.clone(),
            stage_history: instance.stage_history.clone(),
            fix_loop_count: instance.retry_count,
            max_fix_attempts: instance.max_retries,
            active: instance.active,
            tasks: tasks.to_vec(),
        }
    }

    pub fn to_instance(&self) -> PipelineInstance {
        PipelineInstance {
            current_stage: self.current_phase.clone(),
            stage_history: self.stage_history.clone(),
            retry_count: self.fix_loop_count,
            max_retries: self.max_fix_attempts,
            active: self.active,
        }
    }
}

/// Arquivo de snapshots com escrita atômica.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lê todos os snapshots. Arquivo inexistente significa nenhum pipeline.
    pub fn load(&self) -> Result<BTreeMap<String, PipelineSnapshot>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Grava todos os snapshots (arquivo temporário + rename).
    pub fn save(&self, snapshots: &BTreeMap<String, PipelineSnapshot>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, snapshots)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        debug!(path = %self.path.display(), pipelines = snapshots.len(), "Saved pipeline snapshots");
        Ok(())
    }
}
