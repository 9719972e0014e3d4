//! Output file projection.
//!
//! Recomputed from a `PipelineState` on every call. Stages merge in
//! pipeline order so a later stage wins a path collision; stages whose
//! compiler rejected them contribute nothing.

use crate::history::FileMap;
use crate::orchestrator::state::PipelineState;

/// Strip every leading path separator from a logical path.
pub fn normalize_path(path: &str) -> &str {
    path.trim_start_matches(['/', '\\'])
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn insert(files: &mut FileMap, path: &str, content: &str) {
    files.insert(normalize_path(path).to_string(), content.to_string());
}

fn merge(files: &mut FileMap, stage_files: &FileMap) {
    for (path, content) in stage_files {
        insert(files, path, content);
    }
}

/// Derive the output files for the current state.
pub fn project_files(state: &PipelineState) -> FileMap {
    let mut files = FileMap::new();

    if let Some(analyze) = &state.analyze {
        for (path, content) in &analyze.artifact.files {
            insert(&mut files, &format!("docs/analysis/{}", basename(path)), content);
        }
    }

    if let Some(prisma) = &state.prisma {
        if let Some(outputs) = prisma.artifact.compiled.outputs() {
            for (path, content) in &prisma.artifact.schemas {
                insert(&mut files, &format!("prisma/schema/{}", basename(path)), content);
            }
            merge(&mut files, outputs);
        }
    }

    if let Some(interface) = &state.interface {
        if interface.artifact.compiled.is_success() {
            merge(&mut files, &interface.artifact.files);
        }
    }

    if let Some(test) = &state.test {
        if test.artifact.compiled.is_success() {
            merge(&mut files, &test.artifact.files);
        }
    }

    if let Some(realize) = &state.realize {
        if realize.artifact.compiled.is_success() {
            merge(&mut files, &realize.artifact.files);
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{
        AnalyzeArtifact, CompileOutcome, History, PrismaArtifact, RealizeArtifact, StageArtifact,
        TestArtifact,
    };
    use chrono::Utc;

    fn files(pairs: &[(&str, &str)]) -> FileMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn stamp(artifact: StageArtifact, step: u32) -> History {
        let now = Utc::now();
        artifact.into_history(step, now, now)
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/src/main.ts"), "src/main.ts");
        assert_eq!(normalize_path("//x"), "x");
        assert_eq!(normalize_path("\\win\\path"), "win\\path");
        assert_eq!(normalize_path("plain"), "plain");
    }

    #[test]
    fn test_empty_state_has_no_files() {
        assert!(project_files(&PipelineState::default()).is_empty());
    }

    #[test]
    fn test_analysis_files_are_relocated_by_basename() {
        let state = PipelineState::replay(&[stamp(
            StageArtifact::Analyze(AnalyzeArtifact {
                reason: "r".into(),
                files: files(&[("nested/dir/01-overview.md", "# Overview")]),
            }),
            1,
        )]);
        let out = project_files(&state);
        assert_eq!(out.get("docs/analysis/01-overview.md").unwrap(), "# Overview");
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_failed_schema_contributes_nothing() {
        let state = PipelineState::replay(&[stamp(
            StageArtifact::Prisma(PrismaArtifact {
                reason: "r".into(),
                schemas: files(&[("main.prisma", "model X {}")]),
                compiled: CompileOutcome::Failure {
                    reason: "bad".into(),
                },
            }),
            1,
        )]);
        assert!(project_files(&state).is_empty());
    }

    #[test]
    fn test_schema_success_includes_compiler_outputs() {
        let state = PipelineState::replay(&[stamp(
            StageArtifact::Prisma(PrismaArtifact {
                reason: "r".into(),
                schemas: files(&[("/schema/main.prisma", "model X {}")]),
                compiled: CompileOutcome::Success {
                    outputs: files(&[("docs/ERD.md", "erDiagram")]),
                },
            }),
            1,
        )]);
        let out = project_files(&state);
        assert_eq!(out.get("prisma/schema/main.prisma").unwrap(), "model X {}");
        assert_eq!(out.get("docs/ERD.md").unwrap(), "erDiagram");
    }

    #[test]
    fn test_later_stage_wins_collision_and_keys_are_normalized() {
        let state = PipelineState::replay(&[
            stamp(
                StageArtifact::Test(TestArtifact {
                    reason: "r".into(),
                    files: files(&[("/src/app.ts", "test"), ("test/a.ts", "a")]),
                    compiled: CompileOutcome::success(),
                }),
                1,
            ),
            stamp(
                StageArtifact::Realize(RealizeArtifact {
                    reason: "r".into(),
                    files: files(&[("src/app.ts", "realize")]),
                    compiled: CompileOutcome::success(),
                }),
                1,
            ),
        ]);
        let out = project_files(&state);
        assert_eq!(out.get("src/app.ts").unwrap(), "realize");
        assert_eq!(out.get("test/a.ts").unwrap(), "a");
        assert!(out.keys().all(|k| !k.starts_with('/') && !k.starts_with('\\')));
    }
}
