//! Pipeline events and the bus that delivers them.
//!
//! Events are dispatch-only progress notifications. Apart from the user and
//! assistant messages (which mirror a History append), nothing here is
//! persisted.

pub mod bus;

pub use bus::{EventBus, EventListener, listener_fn};

use crate::history::{CompileOutcome, FileMap, History, StageKind, UserMessageContent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Event payload helpers ────────────────────────────────────────────

/// One schema file's planned models, emitted before schemas are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrismaComponent {
    pub filename: String,
    pub namespace: String,
    pub tables: Vec<String>,
}

/// An API endpoint identified by path and HTTP method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub path: String,
    pub method: String,
}

// ── Event types ──────────────────────────────────────────────────────

/// Discriminant of `PipelineEvent`; the key listeners subscribe under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    AssistantMessage,
    UserMessage,
    AnalyzeStart,
    AnalyzeWriteDocument,
    AnalyzeReview,
    AnalyzeComplete,
    PrismaStart,
    PrismaComponents,
    PrismaSchemas,
    PrismaValidate,
    PrismaCorrect,
    PrismaComplete,
    InterfaceStart,
    InterfaceEndpoints,
    InterfaceOperations,
    InterfaceComponents,
    InterfaceComplement,
    InterfaceComplete,
    TestStart,
    TestProgress,
    TestValidate,
    TestComplete,
    RealizeStart,
    RealizeProgress,
    RealizeValidate,
    RealizeComplete,
}

impl EventType {
    pub fn all() -> &'static [EventType] {
        use EventType::*;
        &[
            AssistantMessage,
            UserMessage,
            AnalyzeStart,
            AnalyzeWriteDocument,
            AnalyzeReview,
            AnalyzeComplete,
            PrismaStart,
            PrismaComponents,
            PrismaSchemas,
            PrismaValidate,
            PrismaCorrect,
            PrismaComplete,
            InterfaceStart,
            InterfaceEndpoints,
            InterfaceOperations,
            InterfaceComponents,
            InterfaceComplement,
            InterfaceComplete,
            TestStart,
            TestProgress,
            TestValidate,
            TestComplete,
            RealizeStart,
            RealizeProgress,
            RealizeValidate,
            RealizeComplete,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AssistantMessage => "assistantMessage",
            EventType::UserMessage => "userMessage",
            EventType::AnalyzeStart => "analyzeStart",
            EventType::AnalyzeWriteDocument => "analyzeWriteDocument",
            EventType::AnalyzeReview => "analyzeReview",
            EventType::AnalyzeComplete => "analyzeComplete",
            EventType::PrismaStart => "prismaStart",
            EventType::PrismaComponents => "prismaComponents",
            EventType::PrismaSchemas => "prismaSchemas",
            EventType::PrismaValidate => "prismaValidate",
            EventType::PrismaCorrect => "prismaCorrect",
            EventType::PrismaComplete => "prismaComplete",
            EventType::InterfaceStart => "interfaceStart",
            EventType::InterfaceEndpoints => "interfaceEndpoints",
            EventType::InterfaceOperations => "interfaceOperations",
            EventType::InterfaceComponents => "interfaceComponents",
            EventType::InterfaceComplement => "interfaceComplement",
            EventType::InterfaceComplete => "interfaceComplete",
            EventType::TestStart => "testStart",
            EventType::TestProgress => "testProgress",
            EventType::TestValidate => "testValidate",
            EventType::TestComplete => "testComplete",
            EventType::RealizeStart => "realizeStart",
            EventType::RealizeProgress => "realizeProgress",
            EventType::RealizeValidate => "realizeValidate",
            EventType::RealizeComplete => "realizeComplete",
        }
    }

    /// The stage an event reports on, `None` for conversational events.
    pub fn stage(&self) -> Option<StageKind> {
        use EventType::*;
        match self {
            AssistantMessage | UserMessage => None,
            AnalyzeStart | AnalyzeWriteDocument | AnalyzeReview | AnalyzeComplete => {
                Some(StageKind::Analyze)
            }
            PrismaStart | PrismaComponents | PrismaSchemas | PrismaValidate | PrismaCorrect
            | PrismaComplete => Some(StageKind::Prisma),
            InterfaceStart | InterfaceEndpoints | InterfaceOperations | InterfaceComponents
            | InterfaceComplement | InterfaceComplete => Some(StageKind::Interface),
            TestStart | TestProgress | TestValidate | TestComplete => Some(StageKind::Test),
            RealizeStart | RealizeProgress | RealizeValidate | RealizeComplete => {
                Some(StageKind::Realize)
            }
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::all()
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Invalid event type '{}'", s))
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// A pipeline milestone, tagged by `type` in the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    AssistantMessage {
        text: String,
        created_at: DateTime<Utc>,
    },
    UserMessage {
        contents: Vec<UserMessageContent>,
        created_at: DateTime<Utc>,
    },

    // Requirement analysis
    AnalyzeStart {
        reason: String,
        step: u32,
        created_at: DateTime<Utc>,
    },
    AnalyzeWriteDocument {
        filename: String,
        content: String,
        completed: usize,
        total: usize,
        step: u32,
        created_at: DateTime<Utc>,
    },
    AnalyzeReview {
        review: String,
        step: u32,
        created_at: DateTime<Utc>,
    },
    AnalyzeComplete {
        files: FileMap,
        step: u32,
        created_at: DateTime<Utc>,
    },

    // Schema generation
    PrismaStart {
        reason: String,
        step: u32,
        created_at: DateTime<Utc>,
    },
    PrismaComponents {
        components: Vec<PrismaComponent>,
        step: u32,
        created_at: DateTime<Utc>,
    },
    PrismaSchemas {
        filename: String,
        content: String,
        completed: usize,
        total: usize,
        step: u32,
        created_at: DateTime<Utc>,
    },
    PrismaValidate {
        schemas: FileMap,
        result: CompileOutcome,
        step: u32,
        created_at: DateTime<Utc>,
    },
    PrismaCorrect {
        schemas: FileMap,
        failure: String,
        step: u32,
        created_at: DateTime<Utc>,
    },
    PrismaComplete {
        schemas: FileMap,
        compiled: CompileOutcome,
        step: u32,
        created_at: DateTime<Utc>,
    },

    // API interface generation
    InterfaceStart {
        reason: String,
        step: u32,
        created_at: DateTime<Utc>,
    },
    InterfaceEndpoints {
        endpoints: Vec<Endpoint>,
        step: u32,
        created_at: DateTime<Utc>,
    },
    InterfaceOperations {
        operations: Vec<Endpoint>,
        completed: usize,
        total: usize,
        step: u32,
        created_at: DateTime<Utc>,
    },
    InterfaceComponents {
        schemas: Vec<String>,
        completed: usize,
        total: usize,
        step: u32,
        created_at: DateTime<Utc>,
    },
    InterfaceComplement {
        missed: Vec<String>,
        schemas: Vec<String>,
        step: u32,
        created_at: DateTime<Utc>,
    },
    InterfaceComplete {
        files: FileMap,
        compiled: CompileOutcome,
        step: u32,
        created_at: DateTime<Utc>,
    },

    // Test generation
    TestStart {
        reason: String,
        step: u32,
        created_at: DateTime<Utc>,
    },
    TestProgress {
        filename: String,
        content: String,
        completed: usize,
        total: usize,
        step: u32,
        created_at: DateTime<Utc>,
    },
    TestValidate {
        files: FileMap,
        result: CompileOutcome,
        step: u32,
        created_at: DateTime<Utc>,
    },
    TestComplete {
        files: FileMap,
        compiled: CompileOutcome,
        step: u32,
        created_at: DateTime<Utc>,
    },

    // Realization
    RealizeStart {
        reason: String,
        step: u32,
        created_at: DateTime<Utc>,
    },
    RealizeProgress {
        filename: String,
        content: String,
        completed: usize,
        total: usize,
        step: u32,
        created_at: DateTime<Utc>,
    },
    RealizeValidate {
        files: FileMap,
        result: CompileOutcome,
        step: u32,
        created_at: DateTime<Utc>,
    },
    RealizeComplete {
        files: FileMap,
        compiled: CompileOutcome,
        step: u32,
        created_at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            PipelineEvent::AssistantMessage { .. } => EventType::AssistantMessage,
            PipelineEvent::UserMessage { .. } => EventType::UserMessage,
            PipelineEvent::AnalyzeStart { .. } => EventType::AnalyzeStart,
            PipelineEvent::AnalyzeWriteDocument { .. } => EventType::AnalyzeWriteDocument,
            PipelineEvent::AnalyzeReview { .. } => EventType::AnalyzeReview,
            PipelineEvent::AnalyzeComplete { .. } => EventType::AnalyzeComplete,
            PipelineEvent::PrismaStart { .. } => EventType::PrismaStart,
            PipelineEvent::PrismaComponents { .. } => EventType::PrismaComponents,
            PipelineEvent::PrismaSchemas { .. } => EventType::PrismaSchemas,
            PipelineEvent::PrismaValidate { .. } => EventType::PrismaValidate,
            PipelineEvent::PrismaCorrect { .. } => EventType::PrismaCorrect,
            PipelineEvent::PrismaComplete { .. } => EventType::PrismaComplete,
            PipelineEvent::InterfaceStart { .. } => EventType::InterfaceStart,
            PipelineEvent::InterfaceEndpoints { .. } => EventType::InterfaceEndpoints,
            PipelineEvent::InterfaceOperations { .. } => EventType::InterfaceOperations,
            PipelineEvent::InterfaceComponents { .. } => EventType::InterfaceComponents,
            PipelineEvent::InterfaceComplement { .. } => EventType::InterfaceComplement,
            PipelineEvent::InterfaceComplete { .. } => EventType::InterfaceComplete,
            PipelineEvent::TestStart { .. } => EventType::TestStart,
            PipelineEvent::TestProgress { .. } => EventType::TestProgress,
            PipelineEvent::TestValidate { .. } => EventType::TestValidate,
            PipelineEvent::TestComplete { .. } => EventType::TestComplete,
            PipelineEvent::RealizeStart { .. } => EventType::RealizeStart,
            PipelineEvent::RealizeProgress { .. } => EventType::RealizeProgress,
            PipelineEvent::RealizeValidate { .. } => EventType::RealizeValidate,
            PipelineEvent::RealizeComplete { .. } => EventType::RealizeComplete,
        }
    }

    /// The `<stage>Start` event for a stage run.
    pub fn stage_start(stage: StageKind, reason: impl Into<String>, step: u32) -> Self {
        let reason = reason.into();
        let created_at = Utc::now();
        match stage {
            StageKind::Analyze => PipelineEvent::AnalyzeStart {
                reason,
                step,
                created_at,
            },
            StageKind::Prisma => PipelineEvent::PrismaStart {
                reason,
                step,
                created_at,
            },
            StageKind::Interface => PipelineEvent::InterfaceStart {
                reason,
                step,
                created_at,
            },
            StageKind::Test => PipelineEvent::TestStart {
                reason,
                step,
                created_at,
            },
            StageKind::Realize => PipelineEvent::RealizeStart {
                reason,
                step,
                created_at,
            },
        }
    }

    /// The `<stage>Complete` event mirroring a stage history; `None` for
    /// conversational records.
    pub fn stage_complete(history: &History) -> Option<Self> {
        let created_at = Utc::now();
        match history {
            History::UserMessage(_) | History::AssistantMessage(_) => None,
            History::Analyze(r) => Some(PipelineEvent::AnalyzeComplete {
                files: r.artifact.files.clone(),
                step: r.step,
                created_at,
            }),
            History::Prisma(r) => Some(PipelineEvent::PrismaComplete {
                schemas: r.artifact.schemas.clone(),
                compiled: r.artifact.compiled.clone(),
                step: r.step,
                created_at,
            }),
            History::Interface(r) => Some(PipelineEvent::InterfaceComplete {
                files: r.artifact.files.clone(),
                compiled: r.artifact.compiled.clone(),
                step: r.step,
                created_at,
            }),
            History::Test(r) => Some(PipelineEvent::TestComplete {
                files: r.artifact.files.clone(),
                compiled: r.artifact.compiled.clone(),
                step: r.step,
                created_at,
            }),
            History::Realize(r) => Some(PipelineEvent::RealizeComplete {
                files: r.artifact.files.clone(),
                compiled: r.artifact.compiled.clone(),
                step: r.step,
                created_at,
            }),
        }
    }

    /// The `<stage>Validate` event for a compile attempt. The interface and
    /// analysis stages have no validate event.
    pub fn stage_validate(
        stage: StageKind,
        files: FileMap,
        result: CompileOutcome,
        step: u32,
    ) -> Option<Self> {
        let created_at = Utc::now();
        match stage {
            StageKind::Prisma => Some(PipelineEvent::PrismaValidate {
                schemas: files,
                result,
                step,
                created_at,
            }),
            StageKind::Test => Some(PipelineEvent::TestValidate {
                files,
                result,
                step,
                created_at,
            }),
            StageKind::Realize => Some(PipelineEvent::RealizeValidate {
                files,
                result,
                step,
                created_at,
            }),
            StageKind::Analyze | StageKind::Interface => None,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            PipelineEvent::AssistantMessage { created_at, .. }
            | PipelineEvent::UserMessage { created_at, .. }
            | PipelineEvent::AnalyzeStart { created_at, .. }
            | PipelineEvent::AnalyzeWriteDocument { created_at, .. }
            | PipelineEvent::AnalyzeReview { created_at, .. }
            | PipelineEvent::AnalyzeComplete { created_at, .. }
            | PipelineEvent::PrismaStart { created_at, .. }
            | PipelineEvent::PrismaComponents { created_at, .. }
            | PipelineEvent::PrismaSchemas { created_at, .. }
            | PipelineEvent::PrismaValidate { created_at, .. }
            | PipelineEvent::PrismaCorrect { created_at, .. }
            | PipelineEvent::PrismaComplete { created_at, .. }
            | PipelineEvent::InterfaceStart { created_at, .. }
            | PipelineEvent::InterfaceEndpoints { created_at, .. }
            | PipelineEvent::InterfaceOperations { created_at, .. }
            | PipelineEvent::InterfaceComponents { created_at, .. }
            | PipelineEvent::InterfaceComplement { created_at, .. }
            | PipelineEvent::InterfaceComplete { created_at, .. }
            | PipelineEvent::TestStart { created_at, .. }
            | PipelineEvent::TestProgress { created_at, .. }
            | PipelineEvent::TestValidate { created_at, .. }
            | PipelineEvent::TestComplete { created_at, .. }
            | PipelineEvent::RealizeStart { created_at, .. }
            | PipelineEvent::RealizeProgress { created_at, .. }
            | PipelineEvent::RealizeValidate { created_at, .. }
            | PipelineEvent::RealizeComplete { created_at, .. } => *created_at,
        }
    }

    /// Analysis step the event belongs to; conversational events have none.
    pub fn step(&self) -> Option<u32> {
        match self {
            PipelineEvent::AssistantMessage { .. } | PipelineEvent::UserMessage { .. } => None,
            PipelineEvent::AnalyzeStart { step, .. }
            | PipelineEvent::AnalyzeWriteDocument { step, .. }
            | PipelineEvent::AnalyzeReview { step, .. }
            | PipelineEvent::AnalyzeComplete { step, .. }
            | PipelineEvent::PrismaStart { step, .. }
            | PipelineEvent::PrismaComponents { step, .. }
            | PipelineEvent::PrismaSchemas { step, .. }
            | PipelineEvent::PrismaValidate { step, .. }
            | PipelineEvent::PrismaCorrect { step, .. }
            | PipelineEvent::PrismaComplete { step, .. }
            | PipelineEvent::InterfaceStart { step, .. }
            | PipelineEvent::InterfaceEndpoints { step, .. }
            | PipelineEvent::InterfaceOperations { step, .. }
            | PipelineEvent::InterfaceComponents { step, .. }
            | PipelineEvent::InterfaceComplement { step, .. }
            | PipelineEvent::InterfaceComplete { step, .. }
            | PipelineEvent::TestStart { step, .. }
            | PipelineEvent::TestProgress { step, .. }
            | PipelineEvent::TestValidate { step, .. }
            | PipelineEvent::TestComplete { step, .. }
            | PipelineEvent::RealizeStart { step, .. }
            | PipelineEvent::RealizeProgress { step, .. }
            | PipelineEvent::RealizeValidate { step, .. }
            | PipelineEvent::RealizeComplete { step, .. } => Some(*step),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names_match_serialized_tags() {
        let event = PipelineEvent::PrismaValidate {
            schemas: FileMap::new(),
            result: CompileOutcome::Failure {
                reason: "x".into(),
            },
            step: 1,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type().as_str());
        assert_eq!(json["result"]["type"], "failure");
    }

    #[test]
    fn test_all_event_types_are_distinct() {
        let mut names: Vec<_> = EventType::all().iter().map(|t| t.as_str()).collect();
        let count = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), count);
        assert_eq!(count, 26);
    }

    #[test]
    fn test_event_type_parse_is_case_insensitive() {
        assert_eq!(
            "PRISMAVALIDATE".parse::<EventType>().unwrap(),
            EventType::PrismaValidate
        );
        assert!("prismaExplode".parse::<EventType>().is_err());
    }

    #[test]
    fn test_stage_start_matches_stage() {
        for stage in StageKind::all() {
            let event = PipelineEvent::stage_start(*stage, "go", 4);
            assert_eq!(event.event_type().stage(), Some(*stage));
            assert_eq!(event.step(), Some(4));
        }
    }

    #[test]
    fn test_validate_only_for_compiled_stages_with_validate_events() {
        let files = FileMap::new();
        let ok = CompileOutcome::success();
        assert!(
            PipelineEvent::stage_validate(StageKind::Analyze, files.clone(), ok.clone(), 1)
                .is_none()
        );
        assert!(
            PipelineEvent::stage_validate(StageKind::Interface, files.clone(), ok.clone(), 1)
                .is_none()
        );
        let event = PipelineEvent::stage_validate(StageKind::Test, files, ok, 1).unwrap();
        assert_eq!(event.event_type(), EventType::TestValidate);
    }

    #[test]
    fn test_complete_events_carry_compile_outcome() {
        use crate::history::{InterfaceArtifact, StageArtifact, TestArtifact};

        let failed = CompileOutcome::Failure {
            reason: "TS2322".into(),
        };
        let now = Utc::now();
        let interface = StageArtifact::Interface(InterfaceArtifact {
            reason: "api".into(),
            document: serde_json::Value::Null,
            files: FileMap::new(),
            compiled: failed.clone(),
        })
        .into_history(2, now, now);
        let test = StageArtifact::Test(TestArtifact {
            reason: "e2e".into(),
            files: FileMap::new(),
            compiled: failed.clone(),
        })
        .into_history(2, now, now);

        let Some(PipelineEvent::InterfaceComplete { compiled, step, .. }) =
            PipelineEvent::stage_complete(&interface)
        else {
            panic!("expected interfaceComplete");
        };
        assert_eq!((compiled, step), (failed.clone(), 2));

        let event = PipelineEvent::stage_complete(&test).unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "testComplete");
        assert_eq!(json["compiled"]["type"], "failure");
    }

    #[test]
    fn test_message_events_have_no_step() {
        let event = PipelineEvent::AssistantMessage {
            text: "hi".into(),
            created_at: Utc::now(),
        };
        assert_eq!(event.step(), None);
        assert_eq!(event.event_type().stage(), None);
    }
}
