//! Facade system prompt, rebuilt from the current state on every engine call.

use crate::config::PipelineConfig;
use crate::history::StageKind;
use crate::orchestrator::state::PipelineState;

const ROLE: &str = "You are the facade of a backend generation pipeline. \
Talk with the user about their requirements and call the stage functions \
in order: analyze, prisma, interface, test, realize. Never call a stage \
whose predecessors are not up to date; explain what must be done first.";

pub fn facade_prompt(state: &PipelineState, config: &PipelineConfig) -> String {
    let mut lines = vec![ROLE.to_string(), String::new(), "## Current State".to_string()];
    lines.push(String::new());
    for stage in StageKind::all() {
        lines.push(format!(
            "- {} ({}): {}",
            stage.title(),
            stage.as_str(),
            state.stage_status(*stage)
        ));
    }
    lines.push(String::new());
    match state.status().next_stage() {
        Some(next) => lines.push(format!("Next stage: {}", next.as_str())),
        None => lines.push("Every stage is up to date.".to_string()),
    }
    lines.push(String::new());
    lines.push("## Locale".to_string());
    lines.push(String::new());
    lines.push(format!("- locale: {}", config.project.locale));
    lines.push(format!("- timezone: {}", config.project.timezone));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{AnalyzeArtifact, CompileOutcome, FileMap, PrismaArtifact, StageArtifact};
    use chrono::Utc;

    #[test]
    fn test_prompt_on_empty_state() {
        let prompt = facade_prompt(&PipelineState::default(), &PipelineConfig::default());
        assert!(prompt.contains("- Requirement analysis (analyze): none"));
        assert!(prompt.contains("Next stage: analyze"));
        assert!(prompt.contains("- timezone: UTC"));
    }

    #[test]
    fn test_prompt_reports_outdated_stage() {
        let now = Utc::now();
        let state = PipelineState::replay(&[
            StageArtifact::Prisma(PrismaArtifact {
                reason: "r".into(),
                schemas: FileMap::new(),
                compiled: CompileOutcome::success(),
            })
            .into_history(1, now, now),
            StageArtifact::Analyze(AnalyzeArtifact {
                reason: "r".into(),
                files: FileMap::new(),
            })
            .into_history(2, now, now),
        ]);
        let prompt = facade_prompt(&state, &PipelineConfig::default());
        assert!(prompt.contains("(analyze): up-to-date (step 2)"));
        assert!(prompt.contains("(prisma): outdated (step 1, analysis at 2)"));
        assert!(prompt.contains("Next stage: prisma"));
    }
}
