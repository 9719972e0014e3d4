//! Stage gatekeeper.
//!
//! Before a stage operation runs, every ancestor stage must be present,
//! compiled successfully, and stamped with the current analysis step.
//! The first ancestor that fails a check blocks the stage:
//!
//! | Ancestor state          | Decision                          |
//! |-------------------------|-----------------------------------|
//! | absent                  | `Block` / `BlockReason::Missing`  |
//! | step ≠ analysis step    | `Block` / `BlockReason::Outdated` |
//! | compile failed          | `Block` / `BlockReason::CompileFailed` |
//! | all valid               | `Proceed` with grounding          |
//!
//! Blocking is never an error. The directive text is handed back to the
//! generation engine, which relays it to the user instead of calling tools.

pub mod prompt;

pub use prompt::facade_prompt;

use crate::history::StageKind;
use crate::orchestrator::state::{PipelineState, StageStatus};
use serde::Serialize;

/// Why a stage was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockReason {
    Missing,
    Outdated,
    CompileFailed,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::Missing => write!(f, "missing"),
            BlockReason::Outdated => write!(f, "outdated"),
            BlockReason::CompileFailed => write!(f, "compile failed"),
        }
    }
}

/// One titled block of predecessor context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundingSection {
    pub title: String,
    /// Markdown body, already fenced where it holds JSON.
    pub body: String,
}

/// Serialized predecessor artifacts injected into a stage's generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grounding {
    pub preamble: String,
    pub sections: Vec<GroundingSection>,
}

impl Grounding {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn titles(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.title.as_str()).collect()
    }

    /// Render as a single markdown message.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.preamble.is_empty() {
            out.push_str(&self.preamble);
            out.push_str("\n\n");
        }
        for section in &self.sections {
            out.push_str("## ");
            out.push_str(&section.title);
            out.push_str("\n\n");
            out.push_str(&section.body);
            out.push_str("\n\n");
        }
        out.truncate(out.trim_end().len());
        out
    }

    fn push_json(&mut self, title: &str, value: &impl Serialize) {
        // FileMap and serde_json::Value always serialize.
        let json = serde_json::to_string_pretty(value).unwrap_or_default();
        self.sections.push(GroundingSection {
            title: title.to_string(),
            body: format!("```json\n{}\n```", json),
        });
    }

    fn push_text(&mut self, title: &str, text: &str) {
        self.sections.push(GroundingSection {
            title: title.to_string(),
            body: text.to_string(),
        });
    }
}

/// Outcome of gating one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum GuidanceDecision {
    Block {
        stage: StageKind,
        blocker: StageKind,
        reason: BlockReason,
        directive: String,
    },
    Proceed {
        stage: StageKind,
        /// Step the stage's artifact will be stamped with.
        step: u32,
        grounding: Grounding,
    },
}

impl GuidanceDecision {
    pub fn stage(&self) -> StageKind {
        match self {
            GuidanceDecision::Block { stage, .. } | GuidanceDecision::Proceed { stage, .. } => {
                *stage
            }
        }
    }

    pub fn is_proceed(&self) -> bool {
        matches!(self, GuidanceDecision::Proceed { .. })
    }

    pub fn directive(&self) -> Option<&str> {
        match self {
            GuidanceDecision::Block { directive, .. } => Some(directive),
            GuidanceDecision::Proceed { .. } => None,
        }
    }
}

/// Directive telling the engine to stop and ask for `blocker` to be redone.
fn directive(blocker: StageKind, reason: BlockReason) -> String {
    let title = blocker.title();
    let state = match reason {
        BlockReason::Missing => format!("{} is not yet completed.", title),
        BlockReason::Outdated => format!(
            "{} has not been updated for the latest requirement analysis.",
            title
        ),
        BlockReason::CompileFailed => format!("{} did not pass compilation.", title),
    };
    let verb = match reason {
        BlockReason::Missing => "process",
        BlockReason::Outdated | BlockReason::CompileFailed => "re-process",
    };
    format!(
        "{} Don't call any tool function, but say to {} the {}.",
        state,
        verb,
        title.to_lowercase()
    )
}

fn grounding_for(state: &PipelineState, ancestors: &[StageKind]) -> Grounding {
    let mut grounding = Grounding::default();
    for ancestor in ancestors {
        match ancestor {
            StageKind::Analyze => {
                if let Some(analyze) = &state.analyze {
                    grounding.push_text("User Request", &analyze.artifact.reason);
                    grounding.push_json("Requirement Analysis Report", &analyze.artifact.files);
                }
            }
            StageKind::Prisma => {
                if let Some(prisma) = &state.prisma {
                    grounding.push_json("Prisma DB Schema", &prisma.artifact.schemas);
                    let diagrams = prisma.artifact.compiled.outputs().filter(|o| !o.is_empty());
                    if let Some(outputs) = diagrams {
                        grounding.push_json("Entity Relationship Diagrams", outputs);
                    }
                }
            }
            StageKind::Interface => {
                if let Some(interface) = &state.interface {
                    grounding.push_json("OpenAPI Document", &interface.artifact.document);
                }
            }
            StageKind::Test => {
                if let Some(test) = &state.test {
                    grounding.push_json("E2E Test Functions", &test.artifact.files);
                }
            }
            StageKind::Realize => {}
        }
    }

    if !ancestors.is_empty() {
        let titles: Vec<&str> = ancestors.iter().map(|s| s.title()).collect();
        let verb = if titles.len() == 1 { "is" } else { "are" };
        grounding.preamble = format!(
            "{} {} ready. Call the provided tool function referencing the context below.",
            titles.join(", "),
            verb
        );
    }
    grounding
}

/// Decide whether `stage` may run against `state`.
pub fn gate(state: &PipelineState, stage: StageKind) -> GuidanceDecision {
    let ancestors = stage.ancestors();
    for ancestor in &ancestors {
        let reason = match state.stage_status(*ancestor) {
            StageStatus::UpToDate { .. } => continue,
            StageStatus::Absent => BlockReason::Missing,
            StageStatus::Outdated { .. } => BlockReason::Outdated,
            StageStatus::CompileFailed { .. } => BlockReason::CompileFailed,
        };
        return GuidanceDecision::Block {
            stage,
            blocker: *ancestor,
            reason,
            directive: directive(*ancestor, reason),
        };
    }

    let step = match stage {
        StageKind::Analyze => state.next_analysis_step(),
        _ => state.analysis_step().unwrap_or(0),
    };
    GuidanceDecision::Proceed {
        stage,
        step,
        grounding: grounding_for(state, &ancestors),
    }
}

/// Gate the first stage that is not yet up to date; `None` once the whole
/// chain is valid.
pub fn gate_next(state: &PipelineState) -> Option<GuidanceDecision> {
    state
        .status()
        .next_stage()
        .map(|stage| gate(state, stage))
}
