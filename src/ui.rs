//! Interface de terminal do phasesync: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use phasesync::state_machine::{PhaseStateMachine, PipelineTask, StageStatus, TaskStatus, Transition};
use phasesync::sync::{SyncRecord, SyncStats};

/// Indicador visual de progresso para a demonstração.
///
/// Exibe um spinner durante cada etapa e mensagens coloridas para sucesso
/// (verde), falha (vermelho) e retentativa (amarelo).
pub struct DemoProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl DemoProgress {
    /// Inicia o spinner com a mensagem inicial.
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    pub fn step(&self, message: &str) {
        self.pb.set_message(message.to_string());
    }

    /// Imprime o resultado de uma sincronização acima do spinner.
    pub fn sync_record(&self, record: &SyncRecord) {
        let phases = format!(
            "{} → {}",
            record.source_phase.as_deref().unwrap_or("?"),
            record.target_phase.as_deref().unwrap_or("?")
        );
        let line = if record.success {
            let note = if record.skipped { " (already there)" } else { "" };
            format!(
                "  {} {} → {}: {phases}{}",
                self.green.apply_to("✓"),
                record.source_instance_id,
                record.target_instance_id,
                self.dim.apply_to(note)
            )
        } else {
            format!(
                "  {} {} → {}: {}",
                self.red.apply_to("✗"),
                record.source_instance_id,
                record.target_instance_id,
                record.error.as_deref().unwrap_or("unknown error")
            )
        };
        self.pb.println(line);
    }

    /// Imprime o resultado de uma transição de pipeline.
    pub fn transition(&self, outcome: &Transition) {
        let line = match outcome {
            Transition::Next(stage) => format!("  {} {stage}", self.green.apply_to("→")),
            Transition::Retry { stage, attempt } => {
                format!("  {} {stage} (attempt {attempt})", self.yellow.apply_to("↻"))
            }
            Transition::Exhausted { requested, landed } => format!(
                "  {} {requested} refused, retry limit exceeded: {landed}",
                self.red.apply_to("✗")
            ),
            Transition::Complete(stage) => format!("  {} {stage}", self.green.apply_to("✓")),
        };
        self.pb.println(line);
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Imprime a lista de fases resolvidas, uma por linha.
pub fn print_phases(label: &str, phases: &[String]) {
    let bold = Style::new().bold();
    if phases.is_empty() {
        println!("{} {}", bold.apply_to(label), Style::new().dim().apply_to("(no match)"));
        return;
    }
    println!("{}", bold.apply_to(label));
    for phase in phases {
        println!("  {phase}");
    }
}

/// Imprime estágio atual, histórico e tarefas de um pipeline.
pub fn print_pipeline(name: &str, machine: &PhaseStateMachine, tasks: &[PipelineTask]) {
    let bold = Style::new().bold();
    let state = if machine.is_active() {
        Style::new().green().apply_to("active")
    } else {
        Style::new().yellow().apply_to("stopped")
    };
    println!(
        "{} [{}] stage: {}  fix loops: {}/{}",
        bold.apply_to(name),
        state,
        machine.current_stage(),
        machine.retry_count(),
        machine.instance().max_retries
    );

    for entry in machine.stage_history() {
        let marker = match entry.status {
            StageStatus::Active => Style::new().cyan().apply_to("●"),
            StageStatus::Completed => Style::new().green().apply_to("✓"),
            StageStatus::Failed => Style::new().red().apply_to("✗"),
            StageStatus::Stopped => Style::new().yellow().apply_to("■"),
        };
        let reason = entry.reason.as_deref().unwrap_or("");
        println!(
            "  {marker} {:<10} {}  {}",
            entry.stage,
            entry.entered_at.format("%Y-%m-%d %H:%M:%S"),
            Style::new().dim().apply_to(reason)
        );
    }

    if !tasks.is_empty() {
        println!("  {}", bold.apply_to("tasks"));
        for task in tasks {
            let status = match task.status {
                TaskStatus::Completed => Style::new().green().apply_to(task.status.to_string()),
                TaskStatus::Failed => Style::new().red().apply_to(task.status.to_string()),
                TaskStatus::InProgress => Style::new().cyan().apply_to(task.status.to_string()),
                TaskStatus::Pending => Style::new().dim().apply_to(task.status.to_string()),
            };
            println!("    #{} [{status}] {}", task.id, task.description);
        }
    }
}

/// Imprime as estatísticas do executor formatadas em JSON.
pub fn print_stats(stats: &SyncStats) {
    println!();
    println!("{}", Style::new().cyan().bold().apply_to("─── Sync Stats ───"));
    println!("{}", serde_json::to_string_pretty(stats).unwrap_or_default());
}

/// Uma linha por pipeline para o comando `list`.
pub fn print_pipeline_summary(name: &str, machine: &PhaseStateMachine) {
    let state = if machine.is_active() {
        Style::new().green().apply_to("active ")
    } else {
        Style::new().yellow().apply_to("stopped")
    };
    println!("{state} {:<20} {}", name, machine.current_stage());
}
