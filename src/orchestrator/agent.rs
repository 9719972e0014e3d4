//! The pipeline driver.
//!
//! `PipelineAgent` is the single writer of its history log. Every record
//! is appended here and then published; stage logic only ever sees a
//! `PipelineContext`.

use super::engine::{
    EngineTurn, GenerationEngine, InvokeOutcome, OperationInfo, StageOperation, StageRequest,
    TurnHost, operation_info,
};
use super::state::SharedLedger;
use crate::compiler::CompilerSet;
use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::errors::PipelineError;
use crate::events::{EventBus, EventListener, EventType, PipelineEvent};
use crate::files::project_files;
use crate::gates::{self, GuidanceDecision};
use crate::history::{
    AssistantMessageHistory, FileMap, History, StageKind, UserInput, UserMessageHistory,
};
use crate::usage::{TokenUsage, UsageMeter};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Construction arguments for `PipelineAgent`.
pub struct AgentProps {
    pub config: PipelineConfig,
    pub engine: Arc<dyn GenerationEngine>,
    pub compilers: CompilerSet,
    /// Exactly one operation per stage.
    pub operations: Vec<Arc<dyn StageOperation>>,
    /// Log to resume from.
    pub histories: Vec<History>,
}

pub struct PipelineAgent {
    engine: Arc<dyn GenerationEngine>,
    operations: Arc<BTreeMap<StageKind, Arc<dyn StageOperation>>>,
    ledger: SharedLedger,
    context: PipelineContext,
    turn: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for PipelineAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineAgent")
            .field("histories", &self.ledger.len())
            .field("stages", &self.operations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl PipelineAgent {
    pub fn new(props: AgentProps) -> Result<Self, PipelineError> {
        props.config.ensure_usable()?;

        let mut operations = BTreeMap::new();
        for operation in props.operations {
            let stage = operation.stage();
            if operations.insert(stage, operation).is_some() {
                return Err(PipelineError::DuplicateOperation { stage });
            }
        }
        if let Some(stage) = StageKind::all()
            .iter()
            .find(|stage| !operations.contains_key(*stage))
        {
            return Err(PipelineError::MissingOperation { stage: *stage });
        }

        let ledger = SharedLedger::new(props.histories);
        let context = PipelineContext::new(
            Arc::new(props.config),
            props.compilers,
            ledger.clone(),
            UsageMeter::new(),
            EventBus::new(),
        );
        Ok(Self {
            engine: props.engine,
            operations: Arc::new(operations),
            ledger,
            context,
            turn: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Run one conversational turn and return the records it appended,
    /// starting with the user message.
    ///
    /// Overlapping calls on one instance wait for each other.
    pub async fn conversate(
        &self,
        content: impl Into<UserInput>,
    ) -> Result<Vec<History>, PipelineError> {
        let _turn = self.turn.lock().await;
        let start = self.ledger.len();
        let input = content.into();
        info!(histories = start, "Turn started");

        let message = UserMessageHistory::new(input.clone());
        let event = PipelineEvent::UserMessage {
            contents: message.contents.clone(),
            created_at: message.created_at,
        };
        self.append(History::UserMessage(message));
        self.context.dispatch(event);

        let turn = EngineTurn {
            input,
            histories: self.ledger.histories(),
        };
        let driver = TurnDriver { agent: self };
        self.engine
            .converse(turn, &driver)
            .await
            .map_err(PipelineError::Engine)?;

        let appended = self.ledger.slice_from(start);
        info!(appended = appended.len(), "Turn finished");
        Ok(appended)
    }

    pub fn get_files(&self) -> FileMap {
        project_files(&self.ledger.state())
    }

    pub fn get_histories(&self) -> Vec<History> {
        self.ledger.histories()
    }

    pub fn get_token_usage(&self) -> TokenUsage {
        self.context.usage()
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Subscribe `listener` to one event type. Returns `false` if it was
    /// already subscribed. May be called before any runtime is running.
    pub fn on(&self, event_type: EventType, listener: Arc<dyn EventListener>) -> bool {
        self.context.bus().subscribe(event_type, listener)
    }

    pub fn off(&self, event_type: EventType, listener: &Arc<dyn EventListener>) -> bool {
        self.context.bus().unsubscribe(event_type, listener)
    }

    /// Wait until every event published so far has reached its listeners.
    pub async fn flush_events(&self) {
        self.context.bus().flush().await;
    }

    fn append(&self, history: History) {
        debug!(kind = history.type_name(), id = %history.id(), "History appended");
        self.ledger.append(history);
    }

    async fn run_stage(
        &self,
        stage: StageKind,
        reason: &str,
    ) -> Result<InvokeOutcome, PipelineError> {
        let state = self.ledger.state();
        let (step, grounding) = match gates::gate(&state, stage) {
            GuidanceDecision::Block {
                blocker,
                reason: why,
                directive,
                ..
            } => {
                debug!(%stage, %blocker, reason = %why, "Stage blocked");
                return Ok(InvokeOutcome::Blocked { directive });
            }
            GuidanceDecision::Proceed {
                step, grounding, ..
            } => (step, grounding),
        };

        let operation = self
            .operations
            .get(&stage)
            .ok_or(PipelineError::MissingOperation { stage })?;

        let created_at = Utc::now();
        self.context
            .dispatch(PipelineEvent::stage_start(stage, reason, step));

        let request = StageRequest {
            reason: reason.to_string(),
            step,
            grounding,
        };
        let artifact = operation
            .execute(&self.context, request)
            .await
            .map_err(|source| PipelineError::StageFailed { stage, source })?;
        if artifact.stage() != stage {
            return Err(PipelineError::ArtifactMismatch {
                expected: stage,
                actual: artifact.stage(),
            });
        }

        let history = artifact.into_history(step, created_at, Utc::now());
        self.append(history.clone());
        if let Some(event) = PipelineEvent::stage_complete(&history) {
            self.context.dispatch(event);
        }
        info!(%stage, step, "Stage completed");
        Ok(InvokeOutcome::Completed(history))
    }

    fn record_assistant(&self, text: &str) -> History {
        let created_at = Utc::now();
        let history = History::AssistantMessage(AssistantMessageHistory {
            id: Uuid::new_v4(),
            text: text.to_string(),
            created_at,
            completed_at: Utc::now(),
        });
        self.append(history.clone());
        self.context.dispatch(PipelineEvent::AssistantMessage {
            text: text.to_string(),
            created_at,
        });
        history
    }
}

/// An independent instance: the log and usage counters are copied, the
/// event bus starts empty, and nothing mutable is shared afterwards.
impl Clone for PipelineAgent {
    fn clone(&self) -> Self {
        let ledger = self.ledger.deep_copy();
        let context = PipelineContext::new(
            Arc::new(self.context.config().clone()),
            self.context.compiler().clone(),
            ledger.clone(),
            self.context.usage_meter().fork(),
            EventBus::new(),
        );
        Self {
            engine: Arc::clone(&self.engine),
            operations: Arc::clone(&self.operations),
            ledger,
            context,
            turn: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

/// Host handed to the engine for the duration of one turn.
struct TurnDriver<'a> {
    agent: &'a PipelineAgent,
}

#[async_trait]
impl<'a> TurnHost for TurnDriver<'a> {
    fn system_prompt(&self) -> String {
        gates::facade_prompt(&self.agent.ledger.state(), self.agent.context.config())
    }

    fn operations(&self) -> Vec<OperationInfo> {
        self.agent
            .operations
            .keys()
            .map(|stage| operation_info(*stage))
            .collect()
    }

    async fn invoke(&self, stage: StageKind, reason: &str) -> Result<InvokeOutcome, PipelineError> {
        self.agent.run_stage(stage, reason).await
    }

    fn assistant_message(&self, text: &str) -> History {
        self.agent.record_assistant(text)
    }

    fn usage(&self) -> &UsageMeter {
        self.agent.context.usage_meter()
    }
}
