//! Typed error hierarchy for the pipeline core.
//!
//! Two enums cover the failure surfaces:
//! - `PipelineError`: construction, engine and stage-operation failures
//! - `ConfigError`: reading and parsing `pipewright.toml`
//!
//! Compiler rejections and gate blocks are not errors: they are
//! values (`CompileOutcome`, `InvokeOutcome::Blocked`).

use crate::history::StageKind;
use thiserror::Error;

/// Errors from the pipeline driver and its collaborators.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("No operation registered for the {stage} stage")]
    MissingOperation { stage: StageKind },

    #[error("Operation for the {stage} stage is registered more than once")]
    DuplicateOperation { stage: StageKind },

    #[error("Operation for the {expected} stage produced a {actual} artifact")]
    ArtifactMismatch {
        expected: StageKind,
        actual: StageKind,
    },

    #[error("The {stage} stage has no compiler")]
    NoCompiler { stage: StageKind },

    #[error("Generation engine failed: {0:#}")]
    Engine(#[source] anyhow::Error),

    #[error("Operation for the {stage} stage failed: {source:#}")]
    StageFailed {
        stage: StageKind,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
