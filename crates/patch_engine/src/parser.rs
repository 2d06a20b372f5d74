use std::path::{Path, PathBuf};

use crate::error::PatchError;

pub const FREEFORM_BEGIN: &str = "*** Begin Patch";
pub const FREEFORM_END: &str = "*** End Patch";

const ADD_DIRECTIVE: &str = "*** Add File:";
const UPDATE_DIRECTIVE: &str = "*** Update File:";
const DELETE_DIRECTIVE: &str = "*** Delete File:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// One hunk of an update. `start_old` is the 1-based line position from a
/// unified-diff header; freeform hunks carry no position and are located by
/// matching their context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub start_old: Option<usize>,
    pub lines: Vec<HunkLine>,
}

/// One parsed file operation, in patch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchChange {
    pub op: PatchOp,
    pub path: PathBuf,
    /// Full new contents for `Add`.
    pub content: Option<String>,
    /// Hunks for `Update`.
    pub hunks: Vec<Hunk>,
}

/// Parses a freeform `*** Begin Patch` envelope into ordered changes.
pub fn parse_freeform(text: &str) -> Result<Vec<PatchChange>, PatchError> {
    let lines: Vec<&str> = text.lines().collect();
    let begin = lines
        .iter()
        .position(|line| line.trim_end() == FREEFORM_BEGIN)
        .ok_or_else(|| PatchError::parse("freeform patch markers not found"))?;
    let end = lines
        .iter()
        .position(|line| line.trim_end() == FREEFORM_END)
        .filter(|end| *end > begin)
        .ok_or_else(|| PatchError::parse("freeform patch markers not found"))?;

    let body = &lines[begin + 1..end];
    let mut changes = Vec::new();
    let mut idx = 0;

    while idx < body.len() {
        let line = body[idx];
        if let Some(raw_path) = line.strip_prefix(ADD_DIRECTIVE) {
            let path = directive_path(raw_path)?;
            idx += 1;
            let (content, next) = parse_add_body(body, idx)?;
            changes.push(PatchChange {
                op: PatchOp::Add,
                path,
                content: Some(content),
                hunks: Vec::new(),
            });
            idx = next;
        } else if let Some(raw_path) = line.strip_prefix(UPDATE_DIRECTIVE) {
            let path = directive_path(raw_path)?;
            idx += 1;
            let (hunks, next) = parse_hunks(body, idx, None)?;
            if hunks.is_empty() {
                return Err(PatchError::parse(format!(
                    "update for {} has no hunks",
                    path.display()
                )));
            }
            changes.push(PatchChange {
                op: PatchOp::Update,
                path,
                content: None,
                hunks,
            });
            idx = next;
        } else if let Some(raw_path) = line.strip_prefix(DELETE_DIRECTIVE) {
            let path = directive_path(raw_path)?;
            idx += 1;
            changes.push(PatchChange {
                op: PatchOp::Delete,
                path,
                content: None,
                hunks: Vec::new(),
            });
        } else if line.trim().is_empty() {
            idx += 1;
        } else {
            return Err(PatchError::parse(format!("unexpected line in envelope: {line}")));
        }
    }

    if changes.is_empty() {
        return Err(PatchError::parse("no file changes found"));
    }
    Ok(changes)
}

/// Parses a conventional unified diff into ordered changes.
pub fn parse_unified_diff(text: &str) -> Result<Vec<PatchChange>, PatchError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut changes = Vec::new();
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx];
        let Some(old_header) = line.strip_prefix("--- ") else {
            idx += 1;
            continue;
        };
        let new_header = lines
            .get(idx + 1)
            .and_then(|next| next.strip_prefix("+++ "))
            .ok_or_else(|| PatchError::parse("missing +++ header"))?;

        let old_path = header_path(old_header);
        let new_path = header_path(new_header);
        idx += 2;

        match (old_path, new_path) {
            (None, None) => {
                return Err(PatchError::parse("both diff headers are /dev/null"));
            }
            (None, Some(path)) => {
                // File creation: the single hunk must be pure additions.
                let (hunks, next) = parse_hunks(&lines, idx, Some('@'))?;
                let content = added_content(&path, &hunks)?;
                changes.push(PatchChange {
                    op: PatchOp::Add,
                    path,
                    content: Some(content),
                    hunks: Vec::new(),
                });
                idx = next;
            }
            (Some(path), None) => {
                // File deletion: body lines are informational only.
                let (_, next) = parse_hunks(&lines, idx, Some('@'))?;
                changes.push(PatchChange {
                    op: PatchOp::Delete,
                    path,
                    content: None,
                    hunks: Vec::new(),
                });
                idx = next;
            }
            (Some(_), Some(path)) => {
                let (hunks, next) = parse_hunks(&lines, idx, Some('@'))?;
                if hunks.is_empty() {
                    return Err(PatchError::parse(format!(
                        "update for {} has no hunks",
                        path.display()
                    )));
                }
                changes.push(PatchChange {
                    op: PatchOp::Update,
                    path,
                    content: None,
                    hunks,
                });
                idx = next;
            }
        }
    }

    if changes.is_empty() {
        return Err(PatchError::parse("no file changes found"));
    }
    Ok(changes)
}

fn directive_path(raw: &str) -> Result<PathBuf, PatchError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PatchError::parse("file directive is missing a path"));
    }
    Ok(PathBuf::from(trimmed))
}

/// `--- a/foo` → `foo`; `--- /dev/null` → `None`. Trailing tab metadata is
/// dropped, as git emits it.
fn header_path(raw: &str) -> Option<PathBuf> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" {
        return None;
    }
    let path = Path::new(raw);
    let mut components = path.components();
    if let Some(first) = components.next() {
        if matches!(first.as_os_str().to_str(), Some("a") | Some("b")) {
            let stripped: PathBuf = components.collect();
            if !stripped.as_os_str().is_empty() {
                return Some(stripped);
            }
        }
    }
    Some(path.to_path_buf())
}

fn parse_add_body(lines: &[&str], mut idx: usize) -> Result<(String, usize), PatchError> {
    let mut added = Vec::new();
    while idx < lines.len() && !lines[idx].starts_with("***") {
        let line = lines[idx];
        match line.strip_prefix('+') {
            Some(content) => added.push(content),
            None => {
                return Err(PatchError::parse(format!(
                    "add body must contain only additions, got: {line}"
                )));
            }
        }
        idx += 1;
    }
    if added.is_empty() {
        return Err(PatchError::parse("add body is empty"));
    }
    let mut content = added.join("\n");
    content.push('\n');
    Ok((content, idx))
}

/// Parses consecutive hunks starting at `idx`. When `required_marker` is
/// `Some('@')`, hunks must open with an `@@` header; freeform callers accept
/// a bare `@@` as well.
fn parse_hunks(
    lines: &[&str],
    mut idx: usize,
    required_marker: Option<char>,
) -> Result<(Vec<Hunk>, usize), PatchError> {
    let mut hunks = Vec::new();

    while idx < lines.len() {
        let line = lines[idx];
        if !line.starts_with("@@") {
            break;
        }
        // Freeform hunks may carry a bare `@@` or an `@@ <anchor>` marker with
        // no positions; unified hunks must have a well-formed header.
        let start_old = match parse_hunk_header(line) {
            Ok(start_old) => start_old,
            Err(error) if required_marker.is_some() => return Err(error),
            Err(_) => None,
        };
        idx += 1;

        let mut hunk_lines = Vec::new();
        while idx < lines.len() {
            let body_line = lines[idx];
            if body_line.starts_with("@@")
                || body_line.starts_with("*** ")
                || body_line.starts_with("--- ")
            {
                break;
            }
            if body_line.starts_with('\\') {
                // "\ No newline at end of file" markers carry no content.
                idx += 1;
                continue;
            }
            let parsed = match body_line.chars().next() {
                Some(' ') => HunkLine::Context(body_line[1..].to_string()),
                Some('-') => HunkLine::Remove(body_line[1..].to_string()),
                Some('+') => HunkLine::Add(body_line[1..].to_string()),
                None => HunkLine::Context(String::new()),
                Some(_) => {
                    return Err(PatchError::parse(format!("invalid hunk line: {body_line}")));
                }
            };
            hunk_lines.push(parsed);
            idx += 1;
        }

        if hunk_lines.is_empty() {
            return Err(PatchError::parse("hunk has no body"));
        }
        hunks.push(Hunk {
            start_old,
            lines: hunk_lines,
        });
    }

    Ok((hunks, idx))
}

/// `@@ -a,b +c,d @@` → `Some(a)`; bare `@@` → `None`.
fn parse_hunk_header(line: &str) -> Result<Option<usize>, PatchError> {
    let trimmed = line.trim();
    if trimmed == "@@" {
        return Ok(None);
    }
    let inner = trimmed
        .strip_prefix("@@")
        .and_then(|rest| rest.split("@@").next())
        .map(str::trim)
        .unwrap_or_default();

    let old_part = inner
        .split_whitespace()
        .find(|part| part.starts_with('-'))
        .ok_or_else(|| PatchError::parse(format!("invalid hunk header: {line}")))?;
    let start_old = old_part[1..]
        .split(',')
        .next()
        .and_then(|value| value.parse::<usize>().ok())
        .ok_or_else(|| PatchError::parse(format!("invalid hunk header: {line}")))?;

    Ok(Some(start_old))
}

fn added_content(path: &Path, hunks: &[Hunk]) -> Result<String, PatchError> {
    let mut added = Vec::new();
    for hunk in hunks {
        for line in &hunk.lines {
            match line {
                HunkLine::Add(content) => added.push(content.as_str()),
                _ => {
                    return Err(PatchError::parse(format!(
                        "file creation for {} must contain only additions",
                        path.display()
                    )));
                }
            }
        }
    }
    if added.is_empty() {
        return Err(PatchError::parse(format!(
            "file creation for {} is empty",
            path.display()
        )));
    }
    let mut content = added.join("\n");
    content.push('\n');
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::{parse_freeform, parse_unified_diff, HunkLine, PatchOp};

    #[test]
    fn freeform_envelope_parses_all_three_operations_in_order() {
        let patch = "*** Begin Patch\n\
                     *** Add File: new.txt\n\
                     +hello\n\
                     *** Delete File: old.txt\n\
                     *** Update File: main.rs\n\
                     @@\n \
                     fn main() {\n\
                     -    old();\n\
                     +    new();\n\
                     *** End Patch";

        let changes = parse_freeform(patch).expect("envelope parses");
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].op, PatchOp::Add);
        assert_eq!(changes[0].content.as_deref(), Some("hello\n"));
        assert_eq!(changes[1].op, PatchOp::Delete);
        assert_eq!(changes[2].op, PatchOp::Update);
        assert_eq!(changes[2].hunks.len(), 1);
        assert_eq!(
            changes[2].hunks[0].lines,
            vec![
                HunkLine::Context("fn main() {".to_string()),
                HunkLine::Remove("    old();".to_string()),
                HunkLine::Add("    new();".to_string()),
            ]
        );
    }

    #[test]
    fn freeform_without_markers_fails_parse() {
        let error = parse_freeform("*** Add File: foo\n+bad").expect_err("parse should fail");
        assert!(error.to_string().contains("invalid patch"));
        assert!(error.to_string().contains("markers not found"));
    }

    #[test]
    fn freeform_add_body_rejects_non_addition_lines() {
        let patch = "*** Begin Patch\n*** Add File: foo.txt\n+ok\n-bad\n*** End Patch";
        let error = parse_freeform(patch).expect_err("parse should fail");
        assert!(error.to_string().contains("only additions"));
    }

    #[test]
    fn unified_diff_parses_update_with_positions() {
        let diff = "--- a/src/lib.rs\n\
                    +++ b/src/lib.rs\n\
                    @@ -3,3 +3,3 @@\n \
                    context\n\
                    -removed\n\
                    +added\n";

        let changes = parse_unified_diff(diff).expect("diff parses");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, PatchOp::Update);
        assert_eq!(changes[0].path.to_str(), Some("src/lib.rs"));
        assert_eq!(changes[0].hunks[0].start_old, Some(3));
    }

    #[test]
    fn unified_diff_maps_dev_null_headers_to_add_and_delete() {
        let diff = "--- /dev/null\n\
                    +++ b/created.txt\n\
                    @@ -0,0 +1,2 @@\n\
                    +first\n\
                    +second\n\
                    --- a/removed.txt\n\
                    +++ /dev/null\n\
                    @@ -1,1 +0,0 @@\n\
                    -gone\n";

        let changes = parse_unified_diff(diff).expect("diff parses");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].op, PatchOp::Add);
        assert_eq!(changes[0].content.as_deref(), Some("first\nsecond\n"));
        assert_eq!(changes[1].op, PatchOp::Delete);
        assert_eq!(changes[1].path.to_str(), Some("removed.txt"));
    }

    #[test]
    fn unified_diff_missing_new_header_fails() {
        let error = parse_unified_diff("--- a/x.txt\n@@ -1 +1 @@\n-x\n+y\n")
            .expect_err("parse should fail");
        assert!(error.to_string().contains("missing +++ header"));
    }
}
