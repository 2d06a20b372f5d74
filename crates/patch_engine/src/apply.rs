use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::Builder;

use crate::error::PatchError;
use crate::parser::{Hunk, HunkLine, PatchChange, PatchOp};

/// Outcome of one applied change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchResult {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub created: bool,
}

/// A verified patch, ready to commit. Holds resolved targets, the fully
/// computed new contents, and the prior contents needed for rollback.
#[derive(Debug)]
pub struct ApplyPlan {
    steps: Vec<PlannedChange>,
}

#[derive(Debug)]
struct PlannedChange {
    op: PatchOp,
    target: PathBuf,
    new_content: Option<String>,
    prior: Prior,
}

#[derive(Debug)]
enum Prior {
    Missing,
    Contents(String),
}

/// Verifies every change against the current filesystem state without
/// touching disk: paths resolve through `resolve`, update/delete targets
/// exist, add targets do not, and update hunks match byte-for-byte.
pub fn verify_changes(
    changes: &[PatchChange],
    resolve: &dyn Fn(&Path) -> Result<PathBuf, String>,
) -> Result<ApplyPlan, PatchError> {
    let mut steps = Vec::with_capacity(changes.len());

    for change in changes {
        let target = resolve(&change.path)
            .map_err(|reason| PatchError::verify(&change.path, reason))?;

        let step = match change.op {
            PatchOp::Add => {
                if target.exists() {
                    return Err(PatchError::verify(&target, "add target already exists"));
                }
                PlannedChange {
                    op: PatchOp::Add,
                    target,
                    new_content: change.content.clone(),
                    prior: Prior::Missing,
                }
            }
            PatchOp::Update => {
                let original = read_target(&target)?;
                let new_content = apply_hunks(&target, &original, &change.hunks)?;
                PlannedChange {
                    op: PatchOp::Update,
                    target,
                    new_content: Some(new_content),
                    prior: Prior::Contents(original),
                }
            }
            PatchOp::Delete => {
                let original = read_target(&target)?;
                PlannedChange {
                    op: PatchOp::Delete,
                    target,
                    new_content: None,
                    prior: Prior::Contents(original),
                }
            }
        };
        steps.push(step);
    }

    Ok(ApplyPlan { steps })
}

/// Commits a verified plan atomically: every change lands, or none does.
pub fn apply_changes(plan: ApplyPlan) -> Result<Vec<PatchResult>, PatchError> {
    apply_with(&RealFs, plan)
}

/// Filesystem commit operations, separable so tests can inject failures at
/// the rename boundary.
trait CommitFs {
    fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()>;
    fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

struct RealFs;

impl CommitFs for RealFs {
    fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }
}

fn apply_with(fs: &dyn CommitFs, plan: ApplyPlan) -> Result<Vec<PatchResult>, PatchError> {
    // Stage phase: write every new content to a tempfile sibling. Nothing on
    // disk is mutated yet, so a staging failure needs only temp cleanup.
    let mut staged: Vec<Option<PathBuf>> = Vec::with_capacity(plan.steps.len());
    for step in &plan.steps {
        match &step.new_content {
            Some(content) => match stage_tempfile(&step.target, content) {
                Ok(tmp) => staged.push(Some(tmp)),
                Err(error) => {
                    remove_staged(&staged);
                    return Err(error);
                }
            },
            None => staged.push(None),
        }
    }

    // Commit phase: rename temps over targets and unlink deletions, keeping a
    // rollback journal of everything completed.
    let mut completed: Vec<(usize, &PlannedChange)> = Vec::new();
    for (index, step) in plan.steps.iter().enumerate() {
        let outcome = match step.op {
            PatchOp::Add | PatchOp::Update => {
                // Staging already created the parent directory.
                let tmp = staged[index]
                    .as_ref()
                    .expect("add/update steps always stage a tempfile");
                fs.rename(tmp, &step.target).map_err(|source| {
                    PatchError::apply(&step.target, format!("rename failed: {source}"))
                })
            }
            PatchOp::Delete => fs.remove_file(&step.target).map_err(|source| {
                PatchError::apply(&step.target, format!("unlink failed: {source}"))
            }),
        };

        match outcome {
            Ok(()) => {
                if staged[index].is_some() && step.op != PatchOp::Delete {
                    staged[index] = None;
                }
                completed.push((index, step));
            }
            Err(error) => {
                rollback(&completed);
                remove_staged(&staged);
                return Err(error);
            }
        }
    }

    Ok(plan
        .steps
        .iter()
        .map(|step| PatchResult {
            path: step.target.clone(),
            bytes_written: step
                .new_content
                .as_ref()
                .map_or(0, |content| content.len() as u64),
            created: matches!(step.op, PatchOp::Add),
        })
        .collect())
}

fn stage_tempfile(target: &Path, content: &str) -> Result<PathBuf, PatchError> {
    let parent = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&parent).map_err(|source| {
        PatchError::apply(target, format!("creating parent directory: {source}"))
    })?;

    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PatchError::apply(target, "target has no file name"))?;

    let mut tmp = Builder::new()
        .prefix(&format!("{file_name}.lincona-tmp-"))
        .tempfile_in(&parent)
        .map_err(|source| PatchError::apply(target, format!("creating tempfile: {source}")))?;
    tmp.write_all(content.as_bytes())
        .and_then(|()| tmp.as_file().sync_data())
        .map_err(|source| PatchError::apply(target, format!("writing tempfile: {source}")))?;

    let (_, tmp_path) = tmp
        .keep()
        .map_err(|source| PatchError::apply(target, format!("persisting tempfile: {source}")))?;
    Ok(tmp_path)
}

fn remove_staged(staged: &[Option<PathBuf>]) {
    for tmp in staged.iter().flatten() {
        let _ = std::fs::remove_file(tmp);
    }
}

/// Best-effort undo of completed commits, newest first.
fn rollback(completed: &[(usize, &PlannedChange)]) {
    for (_, step) in completed.iter().rev() {
        match (&step.op, &step.prior) {
            (PatchOp::Add, Prior::Missing) => {
                let _ = std::fs::remove_file(&step.target);
            }
            (PatchOp::Update, Prior::Contents(prior))
            | (PatchOp::Delete, Prior::Contents(prior)) => {
                let _ = std::fs::write(&step.target, prior);
            }
            _ => {}
        }
    }
}

fn read_target(target: &Path) -> Result<String, PatchError> {
    let metadata = std::fs::metadata(target)
        .map_err(|_| PatchError::verify(target, "target does not exist"))?;
    if metadata.is_dir() {
        return Err(PatchError::verify(target, "target is a directory"));
    }
    std::fs::read_to_string(target)
        .map_err(|source| PatchError::verify(target, format!("target is not valid UTF-8 text: {source}")))
}

/// Applies hunks to `original`, requiring byte-exact context matches.
fn apply_hunks(target: &Path, original: &str, hunks: &[Hunk]) -> Result<String, PatchError> {
    let had_trailing_newline = original.ends_with('\n');
    let mut current: Vec<String> = original.lines().map(ToOwned::to_owned).collect();
    let mut cursor = 0usize;

    for hunk in hunks {
        let expected: Vec<&str> = hunk
            .lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(text) | HunkLine::Remove(text) => Some(text.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect();

        let start = match hunk.start_old {
            Some(start_old) => {
                let start = start_old.saturating_sub(1);
                if !matches_at(&current, start, &expected) {
                    return Err(PatchError::verify(
                        target,
                        format!("context mismatch at line {start_old}"),
                    ));
                }
                start
            }
            None => find_match(&current, cursor, &expected).ok_or_else(|| {
                PatchError::verify(
                    target,
                    format!("failed to find expected lines: {}", expected.join("\\n")),
                )
            })?,
        };

        let mut replacement = Vec::new();
        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) | HunkLine::Add(text) => replacement.push(text.clone()),
                HunkLine::Remove(_) => {}
            }
        }

        let end = start + expected.len();
        current.splice(start..end, replacement.iter().cloned());
        cursor = start + replacement.len();
    }

    let mut result = current.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

fn matches_at(lines: &[String], start: usize, expected: &[&str]) -> bool {
    if start + expected.len() > lines.len() {
        return false;
    }
    expected
        .iter()
        .zip(&lines[start..])
        .all(|(expected, actual)| *expected == actual)
}

fn find_match(lines: &[String], from: usize, expected: &[&str]) -> Option<usize> {
    if expected.is_empty() {
        return Some(from.min(lines.len()));
    }
    (from..=lines.len().saturating_sub(expected.len()))
        .find(|start| matches_at(lines, *start, expected))
}
