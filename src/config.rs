//! Configuração do phasesync carregada a partir de `phasesync.toml`.
//!
//! A struct [`PhaseSyncConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `PHASESYNC_STATE_FILE` tem precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "phasesync.toml";

/// Variável de ambiente que sobrescreve `state_file`.
pub const STATE_FILE_ENV: &str = "PHASESYNC_STATE_FILE";

/// Configuração de nível superior carregada de `phasesync.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseSyncConfig {
    /// Máximo de registros mantidos no histórico de sincronização.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Tempo máximo em milissegundos para cada chamada ao engine externo.
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,

    /// Máximo de entradas no estágio `fix` antes de marcar o pipeline como falho.
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,

    /// Arquivo JSON com o snapshot dos pipelines.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Diretiva padrão do filtro de logs (sobrescrita por `RUST_LOG`).
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

// Valor padrão para o histórico: 1000 registros.
fn default_history_capacity() -> usize {
    1000
}

// Valor padrão para o timeout: 30s.
fn default_sync_timeout_ms() -> u64 {
    30_000
}

// Valor padrão para tentativas de correção: 3.
fn default_max_fix_attempts() -> u32 {
    3
}

fn default_state_file() -> PathBuf {
    PathBuf::from(".phasesync/pipelines.json")
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for PhaseSyncConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            sync_timeout_ms: default_sync_timeout_ms(),
            max_fix_attempts: default_max_fix_attempts(),
            state_file: default_state_file(),
            log_filter: default_log_filter(),
        }
    }
}

impl PhaseSyncConfig {
    /// Carrega a configuração de `phasesync.toml` no diretório atual.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega a configuração do caminho informado.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<PhaseSyncConfig>(&contents)
                .with_context(|| format!("invalid config in {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_state_file_override(std::env::var(STATE_FILE_ENV).ok());
        Ok(config)
    }

    // Variável de ambiente tem precedência sobre o arquivo de configuração.
    fn apply_state_file_override(&mut self, value: Option<String>) {
        if let Some(path) = value.filter(|p| !p.trim().is_empty()) {
            self.state_file = PathBuf::from(path);
        }
    }
}
