//! Output file projection: `pipewright files`.

use anyhow::{Context, Result};
use std::path::{Component, Path};

use pipewright::files::project_files;
use pipewright::history::HistoryStore;
use pipewright::orchestrator::PipelineState;

pub fn cmd_files(histories: &Path, out: Option<&Path>) -> Result<()> {
    let store = HistoryStore::load(histories)?;
    let files = project_files(&PipelineState::replay(store.entries()));

    let Some(out) = out else {
        if files.is_empty() {
            println!("No output files.");
            return Ok(());
        }
        for (path, content) in &files {
            println!("{:<60} {:>8} bytes", path, content.len());
        }
        return Ok(());
    };

    let mut written = 0;
    for (path, content) in &files {
        if !is_contained(path) {
            eprintln!(
                "{} skipped path outside the output directory: {}",
                console::style("warning:").yellow().bold(),
                path
            );
            continue;
        }
        let target = out.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&target, content)
            .with_context(|| format!("Failed to write file: {}", target.display()))?;
        written += 1;
    }
    println!("Wrote {} files to {}", written, out.display());
    Ok(())
}

/// True when `path` only descends: no root, drive prefix or `..`.
fn is_contained(path: &str) -> bool {
    let path = Path::new(path);
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_contained() {
        assert!(is_contained("src/index.ts"));
        assert!(is_contained("./docs/ERD.md"));
        assert!(!is_contained("../escaped.txt"));
        assert!(!is_contained("src/../../escaped.txt"));
        assert!(!is_contained("/etc/passwd"));
        assert!(!is_contained(""));
    }
}
