//! External artifact compilers.
//!
//! Each compiled stage has one compiler. A compiler reports through
//! `CompileOutcome`; it never returns an error.

use crate::errors::PipelineError;
use crate::history::{CompileOutcome, FileMap, StageKind};
use async_trait::async_trait;
use std::sync::Arc;

/// Validates the files produced by one stage.
#[async_trait]
pub trait ArtifactCompiler: Send + Sync {
    async fn compile(&self, files: &FileMap) -> CompileOutcome;
}

/// One compiler per compiled stage.
#[derive(Clone)]
pub struct CompilerSet {
    pub prisma: Arc<dyn ArtifactCompiler>,
    pub interface: Arc<dyn ArtifactCompiler>,
    pub test: Arc<dyn ArtifactCompiler>,
    pub realize: Arc<dyn ArtifactCompiler>,
}

impl std::fmt::Debug for CompilerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerSet").finish_non_exhaustive()
    }
}

impl CompilerSet {
    /// The same compiler for every stage.
    pub fn uniform(compiler: Arc<dyn ArtifactCompiler>) -> Self {
        Self {
            prisma: Arc::clone(&compiler),
            interface: Arc::clone(&compiler),
            test: Arc::clone(&compiler),
            realize: compiler,
        }
    }

    /// The compiler for `stage`; analysis has none.
    pub fn for_stage(&self, stage: StageKind) -> Option<&Arc<dyn ArtifactCompiler>> {
        match stage {
            StageKind::Analyze => None,
            StageKind::Prisma => Some(&self.prisma),
            StageKind::Interface => Some(&self.interface),
            StageKind::Test => Some(&self.test),
            StageKind::Realize => Some(&self.realize),
        }
    }

    pub async fn compile(
        &self,
        stage: StageKind,
        files: &FileMap,
    ) -> Result<CompileOutcome, PipelineError> {
        let compiler = self
            .for_stage(stage)
            .ok_or(PipelineError::NoCompiler { stage })?;
        Ok(compiler.compile(files).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedCompiler;

    #[tokio::test]
    async fn test_compile_routes_to_stage_compiler() {
        let mut set = CompilerSet::uniform(Arc::new(FixedCompiler::success()));
        set.test = Arc::new(FixedCompiler::failure("type error"));

        let files = FileMap::new();
        assert!(
            set.compile(StageKind::Prisma, &files)
                .await
                .unwrap()
                .is_success()
        );
        assert_eq!(
            set.compile(StageKind::Test, &files).await.unwrap(),
            CompileOutcome::Failure {
                reason: "type error".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_analysis_has_no_compiler() {
        let set = CompilerSet::uniform(Arc::new(FixedCompiler::success()));
        assert!(set.for_stage(StageKind::Analyze).is_none());
        let err = set
            .compile(StageKind::Analyze, &FileMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoCompiler { .. }));
    }
}
