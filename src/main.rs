mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio::sync::{RwLock, broadcast};

use cli::{Cli, Command, PipelineCommand};
use phasesync::config::PhaseSyncConfig;
use phasesync::observability;
use phasesync::orchestrator::PipelineCoordinator;
use phasesync::resolver::{Context, PhaseResolver, RuleSet};
use phasesync::state_machine::{PhaseStateMachine, PipelineDefinition};
use phasesync::store::SnapshotStore;
use phasesync::sync::{
    AutoSyncController, InMemoryEngine, LinkOptions, SyncEvent, SyncExecutor, SyncSettings,
    WorkflowInstance,
};

const DEMO_RULES: &str = r#"
[[rules]]
from = "draft"
to = ["backlog"]

[[rules]]
from = "review"
to = ["design"]

[[rules]]
from = "approved"
to = ["build"]

[[rules]]
from = "approved"
to = ["expedite"]
weight = 10.0
condition = { op = "equals", key = "priority", value = "high" }
"#;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PhaseSyncConfig::load_from(path)?,
        None => PhaseSyncConfig::load()?,
    };
    observability::init(&config.log_filter, cli.verbose);

    match cli.command {
        Command::Map {
            rules,
            phase,
            context,
            strategy,
        } => {
            let resolver = load_resolver(&rules)?;
            let context = cli::context_from_pairs(&context);
            let phases = resolver.resolve(&strategy.into(), &phase, &context)?;
            ui::print_phases(&format!("{phase} →"), &phases);
        }
        Command::Reverse { rules, phase } => {
            let resolver = load_resolver(&rules)?;
            let phases = resolver.reverse_map(&phase, &Context::new());
            ui::print_phases(&format!("← {phase}"), &phases);
        }
        Command::Pipeline { action } => run_pipeline(&config, action)?,
        Command::Demo => run_demo(&config).await?,
    }

    Ok(())
}

fn load_resolver(path: &Path) -> Result<PhaseResolver> {
    let rules = RuleSet::load(path)
        .with_context(|| format!("failed to load rules from {}", path.display()))?;
    let mut resolver = PhaseResolver::new();
    resolver.register_rules(rules)?;
    Ok(resolver)
}

fn run_pipeline(config: &PhaseSyncConfig, action: PipelineCommand) -> Result<()> {
    let mut coordinator = PipelineCoordinator::open(
        PipelineDefinition::standard(config.max_fix_attempts),
        SnapshotStore::new(&config.state_file),
    )
    .with_context(|| format!("failed to open {}", config.state_file.display()))?;

    match action {
        PipelineCommand::Create { name } => {
            coordinator.create(&name)?;
            show_pipeline(&coordinator, &name)?;
        }
        PipelineCommand::Status { name } => show_pipeline(&coordinator, &name)?,
        PipelineCommand::Advance {
            name,
            stage,
            reason,
        } => {
            coordinator.transition(&name, &stage, reason.as_deref())?;
            show_pipeline(&coordinator, &name)?;
        }
        PipelineCommand::Resume { name, stage } => {
            coordinator.resume(&name, &stage)?;
            show_pipeline(&coordinator, &name)?;
        }
        PipelineCommand::List => {
            for name in coordinator.names() {
                if let Some(machine) = coordinator.get(name) {
                    ui::print_pipeline_summary(name, machine);
                }
            }
        }
        PipelineCommand::Task { name, description } => {
            let id = coordinator.add_task(&name, &description)?;
            println!("Added task #{id} to {name}");
        }
        PipelineCommand::UpdateTask { name, id, status } => {
            coordinator.set_task_status(&name, id, status)?;
            show_pipeline(&coordinator, &name)?;
        }
    }

    Ok(())
}

fn show_pipeline(coordinator: &PipelineCoordinator, name: &str) -> Result<()> {
    let machine = coordinator
        .get(name)
        .with_context(|| format!("pipeline not found: {name}"))?;
    ui::print_pipeline(name, machine, coordinator.tasks(name).unwrap_or_default());
    Ok(())
}

async fn run_demo(config: &PhaseSyncConfig) -> Result<()> {
    let progress = ui::DemoProgress::start("Setting up in-memory engines");

    let product = Arc::new(InMemoryEngine::new());
    let engineering = Arc::new(InMemoryEngine::new());
    product
        .insert(WorkflowInstance::new("PRD-1", "product", "draft"))
        .await;
    for id in ["ENG-1", "ENG-2"] {
        engineering
            .insert(WorkflowInstance::new(id, "engineering", "backlog"))
            .await;
    }

    let mut resolver = PhaseResolver::new();
    resolver.register_rules(RuleSet::from_toml_str(DEMO_RULES)?)?;

    let executor = Arc::new(SyncExecutor::new(
        Arc::new(RwLock::new(resolver)),
        product.clone(),
        engineering.clone(),
        SyncSettings::from(config),
    ));
    executor
        .link_workflows("PRD-1", "ENG-1", LinkOptions::default())
        .await?;
    let mut urgent = Context::new();
    urgent.insert("priority".into(), "high".into());
    executor
        .link_workflows("PRD-1", "ENG-2", LinkOptions::default().context(urgent))
        .await?;

    let mut events = executor.subscribe();
    let mut controller = AutoSyncController::new(executor.clone());
    controller.start();

    for phase in ["review", "approved"] {
        progress.step(&format!("PRD-1 moved to {phase}"));
        product.set_phase("PRD-1", phase).await;
        await_records(&mut events, 2, &progress).await?;
    }
    controller.stop().await;

    progress.step("Running bounded fix loop");
    let mut machine = PhaseStateMachine::new(PipelineDefinition::standard(config.max_fix_attempts));
    for stage in ["implement", "verify"] {
        progress.transition(&machine.transition(stage, None)?);
    }
    while machine.is_active() {
        progress.transition(&machine.transition("fix", Some("verification failed"))?);
        if machine.is_active() {
            progress.transition(&machine.transition("verify", None)?);
        }
    }

    progress.finish();
    ui::print_stats(&executor.stats().await);
    Ok(())
}

async fn await_records(
    events: &mut broadcast::Receiver<SyncEvent>,
    count: usize,
    progress: &ui::DemoProgress,
) -> Result<()> {
    let mut seen = 0;
    while seen < count {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .context("timed out waiting for sync")??;
        match event {
            SyncEvent::SyncCompleted(record) | SyncEvent::SyncFailed(record) => {
                progress.sync_record(&record);
                seen += 1;
            }
            _ => {}
        }
    }
    Ok(())
}
