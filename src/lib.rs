pub mod compiler;
pub mod config;
pub mod context;
pub mod correction;
pub mod errors;
pub mod events;
pub mod files;
pub mod gates;
pub mod history;
pub mod orchestrator;
pub mod rpc;
pub mod testing;
pub mod usage;

pub use context::PipelineContext;
pub use errors::{ConfigError, PipelineError};
pub use events::{EventBus, EventListener, EventType, PipelineEvent};
pub use history::{History, StageKind, UserInput};
pub use orchestrator::{AgentProps, PipelineAgent};
pub use rpc::{RpcListenerSet, RpcService};
