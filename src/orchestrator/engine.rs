//! Seams between the driver, the generation engine and stage logic.
//!
//! ```text
//!   PipelineAgent::conversate
//!        │
//!        ▼
//!   GenerationEngine::converse ──► TurnHost::invoke(stage) ──► gate ──► StageOperation::execute
//!        │                                                              (PipelineContext only)
//!        ▼
//!   TurnHost::assistant_message
//! ```

use crate::context::PipelineContext;
use crate::errors::PipelineError;
use crate::gates::Grounding;
use crate::history::{History, StageArtifact, StageKind, UserInput};
use crate::usage::UsageMeter;
use async_trait::async_trait;

/// Input for one engine turn.
#[derive(Debug, Clone)]
pub struct EngineTurn {
    pub input: UserInput,
    /// Full log, including the user message that opened this turn.
    pub histories: Vec<History>,
}

/// A callable stage operation as advertised to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInfo {
    pub stage: StageKind,
    pub name: &'static str,
    pub description: &'static str,
}

/// Result of asking the driver to run a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutcome {
    Completed(History),
    /// The gate refused the stage. The engine must relay `directive`
    /// instead of calling further tools.
    Blocked { directive: String },
}

impl InvokeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, InvokeOutcome::Completed(_))
    }
}

/// What the driver exposes to the engine during a turn.
#[async_trait]
pub trait TurnHost: Send + Sync {
    /// Rebuilt from the current state on every call.
    fn system_prompt(&self) -> String;

    fn operations(&self) -> Vec<OperationInfo>;

    /// Gate, run and record one stage.
    async fn invoke(&self, stage: StageKind, reason: &str) -> Result<InvokeOutcome, PipelineError>;

    /// Record the engine's reply. Appended before this returns.
    fn assistant_message(&self, text: &str) -> History;

    fn usage(&self) -> &UsageMeter;
}

/// The tool-calling conversational engine.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn converse(&self, turn: EngineTurn, host: &dyn TurnHost) -> anyhow::Result<()>;
}

/// Arguments the driver passes to a stage operation.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub reason: String,
    /// Step the resulting artifact will be stamped with.
    pub step: u32,
    pub grounding: Grounding,
}

/// Generation logic for one stage. Returns the artifact; the driver stamps
/// and appends it.
#[async_trait]
pub trait StageOperation: Send + Sync {
    fn stage(&self) -> StageKind;

    async fn execute(
        &self,
        ctx: &PipelineContext,
        request: StageRequest,
    ) -> anyhow::Result<StageArtifact>;
}

/// Name and description the engine advertises for a stage's tool.
pub fn operation_info(stage: StageKind) -> OperationInfo {
    let (name, description) = match stage {
        StageKind::Analyze => (
            "analyze",
            "Analyze the user's requirements and write the requirement documents.",
        ),
        StageKind::Prisma => (
            "prisma",
            "Design the database schema from the requirement analysis.",
        ),
        StageKind::Interface => (
            "interface",
            "Design the API interface from the analysis and database schema.",
        ),
        StageKind::Test => ("test", "Write E2E tests for every API operation."),
        StageKind::Realize => ("realize", "Implement the API operations."),
    };
    OperationInfo {
        stage,
        name,
        description,
    }
}
