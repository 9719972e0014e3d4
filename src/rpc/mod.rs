//! Remote-facing service contract.
//!
//! Pull side: `RpcService`, implemented by `PipelineAgent`.
//! Push side: `RpcListenerSet`, one handler per event type with
//! `assistantMessage` required. Event types without a handler are simply
//! never subscribed.

use crate::errors::PipelineError;
use crate::events::{EventListener, EventType};
use crate::history::{FileMap, History, UserInput};
use crate::orchestrator::PipelineAgent;
use crate::usage::TokenUsage;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

#[async_trait]
pub trait RpcService: Send + Sync {
    async fn conversate(&self, content: UserInput) -> Result<Vec<History>, PipelineError>;
    async fn get_files(&self) -> FileMap;
    async fn get_histories(&self) -> Vec<History>;
    async fn get_token_usage(&self) -> TokenUsage;
}

#[async_trait]
impl RpcService for PipelineAgent {
    async fn conversate(&self, content: UserInput) -> Result<Vec<History>, PipelineError> {
        PipelineAgent::conversate(self, content).await
    }

    async fn get_files(&self) -> FileMap {
        PipelineAgent::get_files(self)
    }

    async fn get_histories(&self) -> Vec<History> {
        PipelineAgent::get_histories(self)
    }

    async fn get_token_usage(&self) -> TokenUsage {
        PipelineAgent::get_token_usage(self)
    }
}

/// Handlers a remote observer registered.
#[derive(Clone)]
pub struct RpcListenerSet {
    handlers: BTreeMap<EventType, Arc<dyn EventListener>>,
}

impl std::fmt::Debug for RpcListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcListenerSet")
            .field("event_types", &self.event_types())
            .finish()
    }
}

impl RpcListenerSet {
    pub fn new(assistant_message: Arc<dyn EventListener>) -> Self {
        Self {
            handlers: BTreeMap::from([(EventType::AssistantMessage, assistant_message)]),
        }
    }

    /// Register the handler for `event_type`, replacing any earlier one.
    pub fn on(mut self, event_type: EventType, handler: Arc<dyn EventListener>) -> Self {
        self.handlers.insert(event_type, handler);
        self
    }

    pub fn event_types(&self) -> Vec<EventType> {
        self.handlers.keys().copied().collect()
    }

    /// Subscribe every handler to `agent`. Returns how many were new.
    pub fn bind(&self, agent: &PipelineAgent) -> usize {
        self.handlers
            .iter()
            .filter(|(event_type, handler)| agent.on(**event_type, Arc::clone(handler)))
            .count()
    }

    /// Remove every handler from `agent`. Returns how many were removed.
    pub fn unbind(&self, agent: &PipelineAgent) -> usize {
        self.handlers
            .iter()
            .filter(|(event_type, handler)| agent.off(**event_type, handler))
            .count()
    }
}
