//! Pipeline state commands: `pipewright status`, `gate` and `prompt`.

use anyhow::Result;
use std::path::Path;

use pipewright::config::PipelineConfig;
use pipewright::gates::{GuidanceDecision, facade_prompt, gate};
use pipewright::history::{HistoryStore, StageKind};
use pipewright::orchestrator::{PipelineState, PipelineStatus, StageStatus};

fn load_state(histories: &Path) -> Result<(HistoryStore, PipelineState)> {
    let store = HistoryStore::load(histories)?;
    let state = PipelineState::replay(store.entries());
    Ok((store, state))
}

fn describe_status(status: PipelineStatus) -> String {
    match status {
        PipelineStatus::Idle => "idle".to_string(),
        PipelineStatus::AnalyzeDone(step) => format!("analyze done (step {})", step),
        PipelineStatus::PrismaDone(step) => format!("prisma done (step {})", step),
        PipelineStatus::InterfaceDone(step) => format!("interface done (step {})", step),
        PipelineStatus::TestDone(step) => format!("test done (step {})", step),
        PipelineStatus::RealizeDone(step) => format!("realize done (step {})", step),
    }
}

pub fn cmd_status(histories: &Path) -> Result<()> {
    let (store, state) = load_state(histories)?;

    println!();
    println!("Histories: {} ({} records)", histories.display(), store.len());
    println!();
    println!("{:<12} Status", "Stage");
    println!("{:<12} ------", "-----------");
    for stage in StageKind::all() {
        let status = state.stage_status(*stage);
        let styled = match status {
            StageStatus::UpToDate { .. } => console::style(status.to_string()).green(),
            StageStatus::Absent => console::style(status.to_string()).dim(),
            StageStatus::Outdated { .. } => console::style(status.to_string()).yellow(),
            StageStatus::CompileFailed { .. } => console::style(status.to_string()).red(),
        };
        println!("{:<12} {}", stage.as_str(), styled);
    }
    println!();

    let status = state.status();
    println!("Pipeline: {}", describe_status(status));
    match status.next_stage() {
        Some(next) => println!("Next stage: {}", next),
        None => println!("Next stage: none (complete)"),
    }
    println!();
    Ok(())
}

pub fn cmd_gate(stage: &str, histories: &Path) -> Result<()> {
    let stage: StageKind = stage.parse()?;
    let (_, state) = load_state(histories)?;

    println!();
    match gate(&state, stage) {
        GuidanceDecision::Block {
            blocker,
            reason,
            directive,
            ..
        } => {
            println!(
                "{} {} (blocked by {}: {})",
                console::style("BLOCK").red().bold(),
                stage,
                blocker,
                reason
            );
            println!();
            println!("{}", directive);
        }
        GuidanceDecision::Proceed {
            step, grounding, ..
        } => {
            println!(
                "{} {} at step {}",
                console::style("PROCEED").green().bold(),
                stage,
                step
            );
            if !grounding.is_empty() {
                println!();
                println!("Grounding:");
                for title in grounding.titles() {
                    println!("  - {}", title);
                }
            }
        }
    }
    println!();
    Ok(())
}

pub fn cmd_prompt(project_dir: &Path, histories: &Path) -> Result<()> {
    let config = PipelineConfig::load_or_default(project_dir)?;
    let (_, state) = load_state(histories)?;
    println!("{}", facade_prompt(&state, &config));
    Ok(())
}
