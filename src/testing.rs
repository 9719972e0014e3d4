//! Test doubles for the pipeline's external collaborators.
//!
//! Used by the unit tests and by anything that wants to drive a pipeline
//! without a model vendor or real compilers.

use crate::compiler::ArtifactCompiler;
use crate::context::PipelineContext;
use crate::events::{EventListener, PipelineEvent, listener_fn};
use crate::history::{
    AnalyzeArtifact, CompileOutcome, FileMap, InterfaceArtifact, PrismaArtifact, RealizeArtifact,
    StageArtifact, StageKind, TestArtifact,
};
use crate::orchestrator::engine::{
    EngineTurn, GenerationEngine, InvokeOutcome, StageOperation, StageRequest, TurnHost,
};
use crate::usage::{ComponentUsage, UsageSource};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Engine ───────────────────────────────────────────────────────────

/// One action of a scripted engine turn.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Invoke { stage: StageKind, reason: String },
    Say(String),
    /// Relay the directive of the most recent blocked invocation.
    SayLastDirective,
    Usage(UsageSource, ComponentUsage),
    /// Hand control back to the scheduler once.
    Yield,
}

impl ScriptStep {
    pub fn invoke(stage: StageKind, reason: &str) -> Self {
        ScriptStep::Invoke {
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn say(text: &str) -> Self {
        ScriptStep::Say(text.to_string())
    }

    pub fn say_last_directive() -> Self {
        ScriptStep::SayLastDirective
    }
}

/// Engine that plays back one script per turn. Once the scripts run out
/// it echoes the user's text.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    turns: Mutex<VecDeque<Vec<ScriptStep>>>,
    outcomes: Mutex<Vec<InvokeOutcome>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new(turns: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            ..Self::default()
        }
    }

    pub fn echo() -> Self {
        Self::default()
    }

    /// Every invocation outcome seen so far, in order.
    pub fn outcomes(&self) -> Vec<InvokeOutcome> {
        lock(&self.outcomes).clone()
    }

    /// The system prompt as it stood at the start of each turn.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    async fn converse(&self, turn: EngineTurn, host: &dyn TurnHost) -> anyhow::Result<()> {
        lock(&self.prompts).push(host.system_prompt());
        let script = lock(&self.turns).pop_front();
        let Some(script) = script else {
            host.assistant_message(&turn.input.text());
            return Ok(());
        };

        let mut last_directive = String::new();
        for step in script {
            match step {
                ScriptStep::Invoke { stage, reason } => {
                    let outcome = host.invoke(stage, &reason).await?;
                    if let InvokeOutcome::Blocked { directive } = &outcome {
                        last_directive = directive.clone();
                    }
                    lock(&self.outcomes).push(outcome);
                }
                ScriptStep::Say(text) => {
                    host.assistant_message(&text);
                }
                ScriptStep::SayLastDirective => {
                    host.assistant_message(&last_directive);
                }
                ScriptStep::Usage(source, usage) => host.usage().record(source, usage),
                ScriptStep::Yield => tokio::task::yield_now().await,
            }
        }
        Ok(())
    }
}

// ── Compilers ────────────────────────────────────────────────────────

/// Compiler returning scripted outcomes. The last outcome repeats.
#[derive(Debug)]
pub struct FixedCompiler {
    outcomes: Mutex<VecDeque<CompileOutcome>>,
    calls: Mutex<usize>,
}

impl FixedCompiler {
    pub fn sequence(outcomes: Vec<CompileOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn success() -> Self {
        Self::sequence(vec![CompileOutcome::success()])
    }

    pub fn with_outputs(outputs: FileMap) -> Self {
        Self::sequence(vec![CompileOutcome::Success { outputs }])
    }

    pub fn failure(reason: &str) -> Self {
        Self::sequence(vec![CompileOutcome::Failure {
            reason: reason.to_string(),
        }])
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl ArtifactCompiler for FixedCompiler {
    async fn compile(&self, _files: &FileMap) -> CompileOutcome {
        *lock(&self.calls) += 1;
        let mut outcomes = lock(&self.outcomes);
        if outcomes.len() > 1 {
            outcomes.pop_front().unwrap_or_else(CompileOutcome::success)
        } else {
            outcomes.front().cloned().unwrap_or_else(CompileOutcome::success)
        }
    }
}

// ── Stage operations ─────────────────────────────────────────────────

/// Stage operation producing a small canned artifact. Compiled stages run
/// the context's compiler over their files.
#[derive(Debug)]
pub struct StaticOperation {
    stage: StageKind,
    fail: bool,
    requests: Mutex<Vec<StageRequest>>,
}

impl StaticOperation {
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// An operation whose every run fails.
    pub fn failing(stage: StageKind) -> Self {
        Self {
            fail: true,
            ..Self::new(stage)
        }
    }

    pub fn requests(&self) -> Vec<StageRequest> {
        lock(&self.requests).clone()
    }
}

fn one_file(path: &str, content: &str) -> FileMap {
    FileMap::from([(path.to_string(), content.to_string())])
}

#[async_trait]
impl StageOperation for StaticOperation {
    fn stage(&self) -> StageKind {
        self.stage
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        request: StageRequest,
    ) -> anyhow::Result<StageArtifact> {
        lock(&self.requests).push(request.clone());
        if self.fail {
            anyhow::bail!("{} operation failed", self.stage);
        }

        let reason = request.reason;
        let artifact = match self.stage {
            StageKind::Analyze => StageArtifact::Analyze(AnalyzeArtifact {
                files: one_file("00-overview.md", &format!("# {}", reason)),
                reason,
            }),
            StageKind::Prisma => {
                let schemas = one_file("main.prisma", "model Article { id String @id }");
                let compiled = ctx.compiler().compile(StageKind::Prisma, &schemas).await?;
                StageArtifact::Prisma(PrismaArtifact {
                    reason,
                    schemas,
                    compiled,
                })
            }
            StageKind::Interface => {
                let files = one_file("src/api/structures/IArticle.ts", "export interface IArticle {}");
                let compiled = ctx.compiler().compile(StageKind::Interface, &files).await?;
                StageArtifact::Interface(InterfaceArtifact {
                    reason,
                    document: serde_json::json!({ "operations": [{ "path": "/articles", "method": "get" }] }),
                    files,
                    compiled,
                })
            }
            StageKind::Test => {
                let files = one_file("test/features/api/test_api_article_index.ts", "export {}");
                let compiled = ctx.compiler().compile(StageKind::Test, &files).await?;
                StageArtifact::Test(TestArtifact {
                    reason,
                    files,
                    compiled,
                })
            }
            StageKind::Realize => {
                let files = one_file("src/providers/getArticles.ts", "export {}");
                let compiled = ctx.compiler().compile(StageKind::Realize, &files).await?;
                StageArtifact::Realize(RealizeArtifact {
                    reason,
                    files,
                    compiled,
                })
            }
        };
        Ok(artifact)
    }
}

/// One `StaticOperation` per stage.
pub fn default_operations() -> Vec<Arc<dyn StageOperation>> {
    StageKind::all()
        .iter()
        .map(|stage| Arc::new(StaticOperation::new(*stage)) as Arc<dyn StageOperation>)
        .collect()
}

// ── Listeners ────────────────────────────────────────────────────────

/// Collects every event it receives.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new listener handle feeding this recorder.
    pub fn listener(&self) -> Arc<dyn EventListener> {
        let events = Arc::clone(&self.events);
        listener_fn(move |event| {
            let events = Arc::clone(&events);
            async move {
                lock(&events).push(event);
                Ok::<(), anyhow::Error>(())
            }
        })
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        lock(&self.events).clone()
    }
}

struct FailingListener;

#[async_trait]
impl EventListener for FailingListener {
    async fn on_event(&self, event: PipelineEvent) -> anyhow::Result<()> {
        anyhow::bail!("listener rejected {}", event.event_type())
    }
}

struct PanickingListener;

#[async_trait]
impl EventListener for PanickingListener {
    async fn on_event(&self, event: PipelineEvent) -> anyhow::Result<()> {
        panic!("listener panicked on {}", event.event_type())
    }
}

/// Listener that returns an error for every event.
pub fn failing_listener() -> Arc<dyn EventListener> {
    Arc::new(FailingListener)
}

/// Listener that panics on every event.
pub fn panicking_listener() -> Arc<dyn EventListener> {
    Arc::new(PanickingListener)
}
