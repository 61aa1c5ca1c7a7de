//! Interface de linha de comando do phasesync baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (map, reverse,
//! pipeline, demo) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use phasesync::resolver::{Context, MappingStrategy};
use phasesync::state_machine::TaskStatus;
use serde_json::Value;

/// phasesync: tradução de fases e sincronização entre workflows.
#[derive(Debug, Parser)]
#[command(name = "phasesync", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `phasesync.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Estratégia de mapeamento aceita pela CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Todas as regras que casam, ordenadas por peso.
    Weighted,
    /// Somente regras com condição satisfeita.
    Conditional,
}

impl From<StrategyArg> for MappingStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Weighted => MappingStrategy::Weighted,
            StrategyArg::Conditional => MappingStrategy::Conditional,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Traduz uma fase de origem para as fases de destino.
    Map {
        /// Arquivo TOML com as regras (`[[rules]]`).
        #[arg(long)]
        rules: PathBuf,

        /// Fase de origem.
        phase: String,

        /// Pares chave=valor do contexto (valores JSON são interpretados).
        #[arg(long = "context", value_parser = parse_key_val)]
        context: Vec<(String, String)>,

        /// Estratégia de resolução.
        #[arg(long, value_enum, default_value_t = StrategyArg::Weighted)]
        strategy: StrategyArg,
    },

    /// Lista as fases de origem que produzem a fase de destino.
    Reverse {
        /// Arquivo TOML com as regras (`[[rules]]`).
        #[arg(long)]
        rules: PathBuf,

        /// Fase de destino.
        phase: String,
    },

    /// Opera pipelines persistidos no arquivo de estado.
    Pipeline {
        #[command(subcommand)]
        action: PipelineCommand,
    },

    /// Executa a demonstração embutida (sync em memória + fix-loop).
    Demo,
}

#[derive(Debug, Subcommand)]
pub enum PipelineCommand {
    /// Cria um pipeline no estágio inicial.
    Create { name: String },

    /// Mostra o estado de um pipeline.
    Status { name: String },

    /// Move o pipeline para outro estágio.
    Advance {
        name: String,
        stage: String,

        /// Motivo registrado no histórico.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Reativa um pipeline parado em estágio terminal.
    Resume { name: String, stage: String },

    /// Lista os pipelines conhecidos.
    List,

    /// Adiciona uma tarefa ao pipeline.
    Task { name: String, description: String },

    /// Atualiza o status de uma tarefa.
    #[command(name = "task-status")]
    UpdateTask {
        name: String,
        id: u32,
        /// pending, in_progress, completed ou failed.
        status: TaskStatus,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid key=value pair: '{s}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

/// Monta o contexto a partir dos pares da CLI. Valores que são JSON válido
/// (números, booleanos, objetos) mantêm o tipo; o resto vira string.
pub fn context_from_pairs(pairs: &[(String, String)]) -> Context {
    pairs
        .iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw.as_str()));
            (key.clone(), value)
        })
        .collect()
}
