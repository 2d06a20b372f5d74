use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::boundary::FsBoundary;
use crate::error::ToolError;
use crate::registry::{parse_args, ToolOutcome, ToolRegistration};

const TOOL_NAME: &str = "grep_files";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GrepFilesArgs {
    pattern: String,
    path: String,
    include: Vec<String>,
    limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineMatch {
    pub line_num: usize,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMatches {
    pub file: String,
    pub matches: Vec<LineMatch>,
}

/// Recursive regex search under `path`, filtered by `include` globs, capped
/// at `limit` total matches. Binary and non-UTF-8 files are skipped.
pub fn grep_files(
    boundary: &FsBoundary,
    pattern: &str,
    path: &str,
    include: &[String],
    limit: usize,
) -> Result<Vec<FileMatches>, ToolError> {
    let root = boundary.resolve(path)?;
    let regex = Regex::new(pattern)
        .map_err(|error| ToolError::invalid_arguments(TOOL_NAME, format!("field 'pattern': {error}")))?;
    let include = build_globset(include)?;

    let mut files = Vec::new();
    collect_files(&root, &mut files);
    files.sort();

    let mut results: Vec<FileMatches> = Vec::new();
    let mut total = 0usize;

    for file in files {
        let relative = file
            .strip_prefix(&root)
            .unwrap_or(&file)
            .to_path_buf();
        if let Some(include) = &include {
            if !include.is_match(&relative) {
                continue;
            }
        }

        // Non-UTF-8 (including binary) content is skipped, not errored.
        let Ok(contents) = std::fs::read_to_string(&file) else {
            continue;
        };

        let mut matches = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(LineMatch {
                    line_num: index + 1,
                    line: line.to_string(),
                });
                total += 1;
                if total >= limit {
                    break;
                }
            }
        }

        if !matches.is_empty() {
            results.push(FileMatches {
                file: relative.display().to_string(),
                matches,
            });
        }
        if total >= limit {
            break;
        }
    }

    Ok(results)
}

fn build_globset(include: &[String]) -> Result<Option<GlobSet>, ToolError> {
    if include.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in include {
        let glob = Glob::new(pattern).map_err(|error| {
            ToolError::invalid_arguments(TOOL_NAME, format!("field 'include': {error}"))
        })?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|error| ToolError::invalid_arguments(TOOL_NAME, format!("field 'include': {error}")))?;
    Ok(Some(set))
}

fn collect_files(root: &Path, files: &mut Vec<PathBuf>) {
    let Ok(read_dir) = std::fs::read_dir(root) else {
        if root.is_file() {
            files.push(root.to_path_buf());
        }
        return;
    };
    for entry in read_dir.filter_map(Result::ok) {
        let path = entry.path();
        let Ok(metadata) = path.symlink_metadata() else {
            continue;
        };
        if metadata.file_type().is_symlink() {
            continue;
        }
        if metadata.is_dir() {
            collect_files(&path, files);
        } else if metadata.is_file() {
            files.push(path);
        }
    }
}

pub(crate) fn registrations(boundary: &Arc<FsBoundary>) -> Vec<ToolRegistration> {
    let boundary = Arc::clone(boundary);
    vec![ToolRegistration::new(
        TOOL_NAME,
        "Recursive regex search with include globs",
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex pattern to search for." },
                "path": { "type": "string", "description": "Root directory to search under." },
                "include": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Glob filters; an empty array matches every file."
                },
                "limit": { "type": "integer", "minimum": 1, "description": "Maximum total matches to return." }
            },
            "required": ["pattern", "path", "include", "limit"],
            "additionalProperties": false
        }),
        false,
        Box::new(move |args: Value| {
            let args: GrepFilesArgs = parse_args(TOOL_NAME, args)?;
            if args.limit == 0 {
                return Err(ToolError::invalid_arguments(TOOL_NAME, "field 'limit' must be >= 1"));
            }
            let results = grep_files(&boundary, &args.pattern, &args.path, &args.include, args.limit)?;
            Ok(ToolOutcome::ok(json!(results)))
        }),
    )]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::boundary::FsBoundary;

    use super::grep_files;

    fn seed_tree() -> (tempfile::TempDir, Arc<FsBoundary>) {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("src")).expect("mkdir src");
        std::fs::write(dir.path().join("src/a.rs"), "fn alpha() {}\nfn beta() {}\n")
            .expect("seed a.rs");
        std::fs::write(dir.path().join("notes.txt"), "alpha notes\n").expect("seed notes");
        std::fs::write(dir.path().join("blob.bin"), [0u8, 159, 146, 150])
            .expect("seed binary");
        let boundary = Arc::new(FsBoundary::restricted(dir.path()).expect("boundary"));
        (dir, boundary)
    }

    #[test]
    fn matches_are_grouped_per_file_with_line_numbers() {
        let (_dir, boundary) = seed_tree();

        let results = grep_files(&boundary, "alpha", ".", &[], 100).expect("grep succeeds");
        assert_eq!(results.len(), 2);

        let rust_file = results
            .iter()
            .find(|file| file.file == "src/a.rs")
            .expect("a.rs matched");
        assert_eq!(rust_file.matches.len(), 1);
        assert_eq!(rust_file.matches[0].line_num, 1);
        assert_eq!(rust_file.matches[0].line, "fn alpha() {}");
    }

    #[test]
    fn include_globs_filter_by_relative_path() {
        let (_dir, boundary) = seed_tree();

        let results = grep_files(&boundary, "alpha", ".", &["**/*.rs".to_string()], 100)
            .expect("grep succeeds");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file, "src/a.rs");
    }

    #[test]
    fn limit_caps_total_matches_across_files() {
        let (_dir, boundary) = seed_tree();

        let results = grep_files(&boundary, "alpha|beta", ".", &[], 1).expect("grep succeeds");
        let total: usize = results.iter().map(|file| file.matches.len()).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn binary_files_are_skipped_and_bad_patterns_rejected() {
        let (_dir, boundary) = seed_tree();

        let results = grep_files(&boundary, ".", ".", &["*.bin".to_string()], 100)
            .expect("grep succeeds");
        assert!(results.is_empty(), "binary file must be skipped");

        let error = grep_files(&boundary, "(unclosed", ".", &[], 100)
            .expect_err("invalid regex must fail");
        assert!(error.to_string().contains("pattern"));
    }
}
