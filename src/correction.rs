//! Compile-and-correct loop shared by the compiled stages.
//!
//! A failed compile is reported with the stage's validate event and handed
//! to a corrector for another attempt, up to `correction.max_retries`
//! corrections. The final outcome is returned whether or not it passed.

use crate::context::PipelineContext;
use crate::events::PipelineEvent;
use crate::history::{CompileOutcome, FileMap, StageKind};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

/// Produces a revised file set from a failed compile.
#[async_trait]
pub trait Corrector: Send + Sync {
    async fn correct(&self, files: &FileMap, failure: &CompileOutcome) -> Result<FileMap>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionReport {
    /// The files the final outcome was computed for.
    pub files: FileMap,
    pub outcome: CompileOutcome,
    /// Compiles run, including the first.
    pub attempts: u32,
}

pub async fn compile_with_correction(
    ctx: &PipelineContext,
    stage: StageKind,
    step: u32,
    mut files: FileMap,
    corrector: &dyn Corrector,
) -> Result<CorrectionReport> {
    let max_retries = ctx.config().correction.max_retries;
    let mut attempts = 0;
    loop {
        let outcome = ctx.compiler().compile(stage, &files).await?;
        attempts += 1;
        if outcome.is_success() || attempts > max_retries {
            return Ok(CorrectionReport {
                files,
                outcome,
                attempts,
            });
        }

        debug!(%stage, attempts, outcome = %outcome.describe(), "Compile failed, correcting");
        if let Some(event) =
            PipelineEvent::stage_validate(stage, files.clone(), outcome.clone(), step)
        {
            ctx.dispatch(event);
        }
        files = corrector.correct(&files, &outcome).await?;
        if stage == StageKind::Prisma {
            ctx.dispatch(PipelineEvent::PrismaCorrect {
                schemas: files.clone(),
                failure: outcome.describe(),
                step,
                created_at: Utc::now(),
            });
        }
    }
}
