//! Consolidation of the generated trees into one folder.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use glob::Pattern;
use tracing::{debug, error, info, warn};

use opnflow_core::{Statistics, Task};

use crate::executor::{StageOutcome, StageUnit};

/// File types carried into the merged folder.
pub const MERGEABLE_EXTENSIONS: &[&str] = &["xls", "xlsx", "doc", "docx", "pdf"];

/// Upper bound on `_N` suffixes tried for one name.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Merges the group and notice trees into the merged output folder.
#[derive(Debug, Default, Clone)]
pub struct MergeStage;

impl MergeStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageUnit for MergeStage {
    fn name(&self) -> &str {
        "merger"
    }

    async fn execute(&self, mut task: Task) -> StageOutcome {
        if let Err(e) = task.mark_in_progress() {
            return StageOutcome::Fatal(task, e.to_string());
        }

        let (Some(groups), Some(notices), Some(merged)) = (
            task.input_str("output_group_folder"),
            task.input_str("output_notice_folder"),
            task.input_str("merged_output_folder"),
        ) else {
            return StageOutcome::Fatal(task, "Missing output folders for merge".to_string());
        };
        let sources = vec![PathBuf::from(groups), PathBuf::from(notices)];
        let dest = PathBuf::from(merged);
        info!(task_id = %task.id, dest = %dest.display(), "Merging outputs");

        let started = Instant::now();
        let joined = tokio::task::spawn_blocking(move || merge_trees(&sources, &dest)).await;
        let mut stats = match joined {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                error!(task_id = %task.id, error = %e, "Merge failed");
                return StageOutcome::Fatal(task, e.to_string());
            }
            Err(e) => return StageOutcome::Fatal(task, format!("merge task panicked: {e}")),
        };
        stats.duration = started.elapsed();

        let result = if stats.failed == 0 {
            info!(task_id = %task.id, files = stats.successful, "Merge completed");
            task.mark_completed(Some(&stats))
        } else {
            warn!(task_id = %task.id, failed = stats.failed, "Some files were not merged");
            task.mark_partial_failure(
                format!("{} files failed to merge", stats.failed),
                Some(&stats),
            )
        };

        match result {
            Ok(()) => StageOutcome::Ok(task),
            Err(e) => StageOutcome::Fatal(task, e.to_string()),
        }
    }
}

/// Copy every mergeable file under `sources` into `dest`, keeping each
/// file's path relative to its source root.
///
/// Sources are walked in order and their entries in sorted order, so name
/// collisions resolve the same way on every run. Missing sources are
/// skipped; per-file copy errors are counted as failures.
pub fn merge_trees(sources: &[PathBuf], dest: &Path) -> io::Result<Statistics> {
    fs::create_dir_all(dest)?;
    let mut stats = Statistics::default();

    for source in sources {
        if !source.is_dir() {
            warn!(source = %source.display(), "Merge source missing, skipping");
            continue;
        }

        let pattern = format!("{}/**/*", Pattern::escape(&source.to_string_lossy()));
        let entries = glob::glob(&pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    stats.total_records += 1;
                    stats.add_failure(e.to_string());
                    continue;
                }
            };
            if !path.is_file() || !is_mergeable(&path) {
                continue;
            }

            stats.total_records += 1;
            let relative_dir = path
                .parent()
                .and_then(|p| p.strip_prefix(source).ok())
                .unwrap_or_else(|| Path::new(""));
            let target_dir = dest.join(relative_dir);

            let copied = fs::create_dir_all(&target_dir).and_then(|_| safe_copy(&path, &target_dir));
            match copied {
                Ok(target) => {
                    debug!(from = %path.display(), to = %target.display(), "Merged file");
                    stats.add_success(Some(target.display().to_string()));
                }
                Err(e) => {
                    stats.add_failure(format!("Failed to copy {}: {}", path.display(), e));
                }
            }
        }
    }

    Ok(stats)
}

/// Copy `src` into `dest_dir` without overwriting anything.
///
/// A taken name becomes `name_1.ext`, `name_2.ext`, ... The name is claimed
/// with an exclusive create before the copy, so concurrent mergers into the
/// same folder never pick the same target.
pub fn safe_copy(src: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = src.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 0..=MAX_COLLISION_SUFFIX {
        let name = match (n, &ext) {
            (0, Some(ext)) => format!("{stem}.{ext}"),
            (0, None) => stem.clone(),
            (n, Some(ext)) => format!("{stem}_{n}.{ext}"),
            (n, None) => format!("{stem}_{n}"),
        };
        let target = dest_dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(_) => {
                fs::copy(src, &target)?;
                return Ok(target);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {} in {}", src.display(), dest_dir.display()),
    ))
}

fn is_mergeable(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| MERGEABLE_EXTENSIONS.contains(&e.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use opnflow_core::{TaskId, TaskStatus, TaskType};
    use serde_json::{Map, Value};
    use tempfile::TempDir;

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_safe_copy_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("notice.docx");
        write(&src, "new");
        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("notice.docx"), "old").unwrap();

        let first = safe_copy(&src, &dest).unwrap();
        let second = safe_copy(&src, &dest).unwrap();

        assert_eq!(first, dest.join("notice_1.docx"));
        assert_eq!(second, dest.join("notice_2.docx"));
        assert_eq!(fs::read_to_string(dest.join("notice.docx")).unwrap(), "old");
        assert_eq!(fs::read_to_string(&first).unwrap(), "new");
    }

    #[test]
    fn test_merge_renames_collisions_and_filters() {
        let dir = TempDir::new().unwrap();
        let groups = dir.path().join("groups");
        let notices = dir.path().join("notices");
        write(&groups.join("sub/x.docx"), "group");
        write(&notices.join("sub/x.docx"), "notice");
        write(&notices.join("sub/notes.txt"), "skip me");
        let dest = dir.path().join("merged");

        let stats = merge_trees(&[groups, notices], &dest).unwrap();

        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(fs::read_to_string(dest.join("sub/x.docx")).unwrap(), "group");
        assert_eq!(fs::read_to_string(dest.join("sub/x_1.docx")).unwrap(), "notice");
        assert!(!dest.join("sub/notes.txt").exists());
    }

    #[test]
    fn test_missing_source_skipped() {
        let dir = TempDir::new().unwrap();
        let groups = dir.path().join("groups");
        write(&groups.join("A.xlsx"), "a");

        let stats = merge_trees(
            &[groups, dir.path().join("never-created")],
            &dir.path().join("merged"),
        )
        .unwrap();
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.total_records, 1);
    }

    #[tokio::test]
    async fn test_stage_completes_with_stats() {
        let dir = TempDir::new().unwrap();
        let groups = dir.path().join("groups");
        let notices = dir.path().join("notices");
        write(&groups.join("G1.xlsx"), "g");
        write(&notices.join("N1.docx"), "n");

        let mut input = Map::new();
        for (key, path) in [
            ("output_group_folder", &groups),
            ("output_notice_folder", &notices),
            ("merged_output_folder", &dir.path().join("merged")),
        ] {
            input.insert(key.into(), Value::String(path.display().to_string()));
        }
        let task = Task::new(TaskId::new("mrg_1"), TaskType::MergedOutput, input);

        let result = MergeStage::new().execute(task).await.into_task();
        assert_eq!(result.status(), TaskStatus::Completed);
        assert_eq!(result.stats().unwrap().output_files.len(), 2);
    }
}
