//! History records: the immutable entries of a pipeline's log.
//!
//! Every externally visible fact about a pipeline is a `History`. Stage
//! records (`Analyze` through `Realize`) share the `StageRecord` envelope
//! (id, step, timestamps) around a stage-specific artifact; conversational
//! records (`UserMessage`, `AssistantMessage`) carry text only.
//!
//! The serialized form is a JSON object tagged by `type` in camelCase:
//!
//! ```json
//! { "type": "prisma", "id": "…", "step": 2, "reason": "…",
//!   "schemas": { "main.prisma": "…" },
//!   "compiled": { "type": "success", "outputs": {} },
//!   "created_at": "…", "completed_at": "…" }
//! ```

pub mod store;

pub use store::HistoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Logical path → file content.
pub type FileMap = BTreeMap<String, String>;

/// One phase of the generation pipeline, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageKind {
    Analyze,
    Prisma,
    Interface,
    Test,
    Realize,
}

impl StageKind {
    /// All stages in pipeline order.
    pub fn all() -> &'static [StageKind] {
        &[
            StageKind::Analyze,
            StageKind::Prisma,
            StageKind::Interface,
            StageKind::Test,
            StageKind::Realize,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Analyze => "analyze",
            StageKind::Prisma => "prisma",
            StageKind::Interface => "interface",
            StageKind::Test => "test",
            StageKind::Realize => "realize",
        }
    }

    /// Human-readable name used in guidance text.
    pub fn title(&self) -> &'static str {
        match self {
            StageKind::Analyze => "Requirement analysis",
            StageKind::Prisma => "Prisma DB schema generation",
            StageKind::Interface => "API interface generation",
            StageKind::Test => "E2E test generation",
            StageKind::Realize => "Implementation realization",
        }
    }

    /// The stage this one directly depends on.
    pub fn predecessor(&self) -> Option<StageKind> {
        match self {
            StageKind::Analyze => None,
            StageKind::Prisma => Some(StageKind::Analyze),
            StageKind::Interface => Some(StageKind::Prisma),
            StageKind::Test => Some(StageKind::Interface),
            StageKind::Realize => Some(StageKind::Test),
        }
    }

    pub fn successor(&self) -> Option<StageKind> {
        match self {
            StageKind::Analyze => Some(StageKind::Prisma),
            StageKind::Prisma => Some(StageKind::Interface),
            StageKind::Interface => Some(StageKind::Test),
            StageKind::Test => Some(StageKind::Realize),
            StageKind::Realize => None,
        }
    }

    /// Every stage this one transitively depends on, root first.
    pub fn ancestors(&self) -> Vec<StageKind> {
        let mut chain = Vec::new();
        let mut cursor = self.predecessor();
        while let Some(stage) = cursor {
            chain.push(stage);
            cursor = stage.predecessor();
        }
        chain.reverse();
        chain
    }

    /// Whether artifacts of this stage are validated by an external compiler.
    pub fn has_compile_step(&self) -> bool {
        !matches!(self, StageKind::Analyze)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "analyze" | "analysis" => Ok(StageKind::Analyze),
            "prisma" | "schema" => Ok(StageKind::Prisma),
            "interface" => Ok(StageKind::Interface),
            "test" => Ok(StageKind::Test),
            "realize" => Ok(StageKind::Realize),
            _ => anyhow::bail!(
                "Invalid stage '{}'. Valid values: analyze, prisma, interface, test, realize",
                s
            ),
        }
    }
}

/// Result of running an external compiler over a stage's files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CompileOutcome {
    /// Compilation passed. `outputs` holds files the compiler derived
    /// (e.g. ERD documents) that belong in the output projection.
    Success {
        #[serde(default)]
        outputs: FileMap,
    },
    /// The compiler rejected the input.
    Failure { reason: String },
    /// The compiler itself crashed.
    Exception { error: String },
}

impl CompileOutcome {
    pub fn success() -> Self {
        CompileOutcome::Success {
            outputs: FileMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CompileOutcome::Success { .. })
    }

    /// Compiler-derived files on success, empty otherwise.
    pub fn outputs(&self) -> Option<&FileMap> {
        match self {
            CompileOutcome::Success { outputs } => Some(outputs),
            _ => None,
        }
    }

    /// One-line description of a non-success outcome.
    pub fn describe(&self) -> String {
        match self {
            CompileOutcome::Success { .. } => "success".to_string(),
            CompileOutcome::Failure { reason } => format!("failure: {}", reason),
            CompileOutcome::Exception { error } => format!("exception: {}", error),
        }
    }
}

/// Requirement-analysis documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeArtifact {
    /// The user request that triggered analysis.
    pub reason: String,
    pub files: FileMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrismaArtifact {
    pub reason: String,
    pub schemas: FileMap,
    pub compiled: CompileOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceArtifact {
    pub reason: String,
    /// The OpenAPI document the interface files were rendered from.
    pub document: serde_json::Value,
    pub files: FileMap,
    pub compiled: CompileOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestArtifact {
    pub reason: String,
    pub files: FileMap,
    pub compiled: CompileOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizeArtifact {
    pub reason: String,
    pub files: FileMap,
    pub compiled: CompileOutcome,
}

/// The product of one stage operation, before the driver stamps it.
#[derive(Debug, Clone, PartialEq)]
pub enum StageArtifact {
    Analyze(AnalyzeArtifact),
    Prisma(PrismaArtifact),
    Interface(InterfaceArtifact),
    Test(TestArtifact),
    Realize(RealizeArtifact),
}

impl StageArtifact {
    pub fn stage(&self) -> StageKind {
        match self {
            StageArtifact::Analyze(_) => StageKind::Analyze,
            StageArtifact::Prisma(_) => StageKind::Prisma,
            StageArtifact::Interface(_) => StageKind::Interface,
            StageArtifact::Test(_) => StageKind::Test,
            StageArtifact::Realize(_) => StageKind::Realize,
        }
    }

    /// Wrap this artifact into a stage history record.
    pub fn into_history(
        self,
        step: u32,
        created_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> History {
        match self {
            StageArtifact::Analyze(a) => {
                History::Analyze(StageRecord::new(step, created_at, completed_at, a))
            }
            StageArtifact::Prisma(a) => {
                History::Prisma(StageRecord::new(step, created_at, completed_at, a))
            }
            StageArtifact::Interface(a) => {
                History::Interface(StageRecord::new(step, created_at, completed_at, a))
            }
            StageArtifact::Test(a) => {
                History::Test(StageRecord::new(step, created_at, completed_at, a))
            }
            StageArtifact::Realize(a) => {
                History::Realize(StageRecord::new(step, created_at, completed_at, a))
            }
        }
    }
}

/// Envelope shared by every stage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord<A> {
    pub id: Uuid,
    /// Analysis step this record belongs to.
    pub step: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub artifact: A,
}

impl<A> StageRecord<A> {
    pub fn new(
        step: u32,
        created_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        artifact: A,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            step,
            created_at,
            completed_at,
            artifact,
        }
    }
}

/// A piece of user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UserMessageContent {
    Text { text: String },
    Image { url: String },
    File { name: String, data: String },
}

impl UserMessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        UserMessageContent::Text { text: text.into() }
    }
}

/// Input accepted by `conversate`: a string, one content item, or several.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInput(pub Vec<UserMessageContent>);

impl UserInput {
    /// Concatenated text parts, ignoring non-text content.
    pub fn text(&self) -> String {
        self.0
            .iter()
            .filter_map(|c| match c {
                UserMessageContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        UserInput(vec![UserMessageContent::text(text)])
    }
}

impl From<String> for UserInput {
    fn from(text: String) -> Self {
        UserInput(vec![UserMessageContent::Text { text }])
    }
}

impl From<UserMessageContent> for UserInput {
    fn from(content: UserMessageContent) -> Self {
        UserInput(vec![content])
    }
}

impl From<Vec<UserMessageContent>> for UserInput {
    fn from(contents: Vec<UserMessageContent>) -> Self {
        UserInput(contents)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageHistory {
    pub id: Uuid,
    pub contents: Vec<UserMessageContent>,
    pub created_at: DateTime<Utc>,
}

impl UserMessageHistory {
    pub fn new(input: UserInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            contents: input.0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessageHistory {
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// One immutable entry of the pipeline log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum History {
    UserMessage(UserMessageHistory),
    AssistantMessage(AssistantMessageHistory),
    Analyze(StageRecord<AnalyzeArtifact>),
    Prisma(StageRecord<PrismaArtifact>),
    Interface(StageRecord<InterfaceArtifact>),
    Test(StageRecord<TestArtifact>),
    Realize(StageRecord<RealizeArtifact>),
}

impl History {
    pub fn id(&self) -> Uuid {
        match self {
            History::UserMessage(h) => h.id,
            History::AssistantMessage(h) => h.id,
            History::Analyze(r) => r.id,
            History::Prisma(r) => r.id,
            History::Interface(r) => r.id,
            History::Test(r) => r.id,
            History::Realize(r) => r.id,
        }
    }

    /// The `type` tag as serialized.
    pub fn type_name(&self) -> &'static str {
        match self {
            History::UserMessage(_) => "userMessage",
            History::AssistantMessage(_) => "assistantMessage",
            History::Analyze(_) => "analyze",
            History::Prisma(_) => "prisma",
            History::Interface(_) => "interface",
            History::Test(_) => "test",
            History::Realize(_) => "realize",
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            History::UserMessage(h) => h.created_at,
            History::AssistantMessage(h) => h.created_at,
            History::Analyze(r) => r.created_at,
            History::Prisma(r) => r.created_at,
            History::Interface(r) => r.created_at,
            History::Test(r) => r.created_at,
            History::Realize(r) => r.created_at,
        }
    }

    /// Completion timestamp; user messages have none.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            History::UserMessage(_) => None,
            History::AssistantMessage(h) => Some(h.completed_at),
            History::Analyze(r) => Some(r.completed_at),
            History::Prisma(r) => Some(r.completed_at),
            History::Interface(r) => Some(r.completed_at),
            History::Test(r) => Some(r.completed_at),
            History::Realize(r) => Some(r.completed_at),
        }
    }

    /// The stage this record belongs to, if it is a stage record.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            History::UserMessage(_) | History::AssistantMessage(_) => None,
            History::Analyze(_) => Some(StageKind::Analyze),
            History::Prisma(_) => Some(StageKind::Prisma),
            History::Interface(_) => Some(StageKind::Interface),
            History::Test(_) => Some(StageKind::Test),
            History::Realize(_) => Some(StageKind::Realize),
        }
    }

    pub fn step(&self) -> Option<u32> {
        match self {
            History::UserMessage(_) | History::AssistantMessage(_) => None,
            History::Analyze(r) => Some(r.step),
            History::Prisma(r) => Some(r.step),
            History::Interface(r) => Some(r.step),
            History::Test(r) => Some(r.step),
            History::Realize(r) => Some(r.step),
        }
    }

    /// Text of a user or assistant message.
    pub fn text(&self) -> Option<String> {
        match self {
            History::UserMessage(h) => Some(UserInput(h.contents.clone()).text()),
            History::AssistantMessage(h) => Some(h.text.clone()),
            _ => None,
        }
    }
}
