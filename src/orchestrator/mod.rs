//! Pipeline driver, engine seams and the history/state ledger.

pub mod agent;
pub mod engine;
pub mod state;

pub use agent::{AgentProps, PipelineAgent};
pub use engine::{
    EngineTurn, GenerationEngine, InvokeOutcome, OperationInfo, StageOperation, StageRequest,
    TurnHost,
};
pub use state::{Ledger, PipelineState, PipelineStatus, SharedLedger, StageStatus};
