use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::boundary::FsBoundary;
use crate::error::ToolError;
use crate::registry::{parse_args, ToolOutcome, ToolRegistration};

const TOOL_NAME: &str = "list_dir";

// Field set mirrors the advertised schema exactly; serde failures are the
// validation errors the model sees.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListDirArgs {
    path: String,
    depth: u32,
    offset: usize,
    limit: usize,
}

/// Breadth-first listing rooted at `path`, up to `depth` levels, with
/// `offset`/`limit` applied over the ordered result. Directories get a `/`
/// suffix, symlinks `@`.
pub fn list_dir(
    boundary: &FsBoundary,
    path: &str,
    depth: u32,
    offset: usize,
    limit: usize,
) -> Result<Vec<String>, ToolError> {
    let root = boundary.resolve(path)?;

    let mut entries = Vec::new();
    let mut queue: VecDeque<(PathBuf, u32)> = VecDeque::from([(root.clone(), 0)]);

    while let Some((current, level)) = queue.pop_front() {
        if entries.len() >= offset + limit {
            break;
        }

        let read_dir = match std::fs::read_dir(&current) {
            Ok(read_dir) => read_dir,
            Err(_) => continue,
        };
        let mut children: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect();
        children.sort_by_key(|child| {
            child
                .file_name()
                .map(|name| name.to_string_lossy().to_lowercase())
                .unwrap_or_default()
        });

        for child in children {
            let is_symlink = child
                .symlink_metadata()
                .map(|metadata| metadata.file_type().is_symlink())
                .unwrap_or(false);
            let marker = if is_symlink {
                "@"
            } else if child.is_dir() {
                "/"
            } else {
                ""
            };

            let relative = child.strip_prefix(&root).unwrap_or(&child);
            entries.push(format!("{}{marker}", relative.display()));

            if !is_symlink && child.is_dir() && level + 1 < depth {
                queue.push_back((child, level + 1));
            }
        }
    }

    Ok(entries
        .into_iter()
        .skip(offset)
        .take(limit)
        .collect())
}

pub(crate) fn registrations(boundary: &Arc<FsBoundary>) -> Vec<ToolRegistration> {
    let boundary = Arc::clone(boundary);
    vec![ToolRegistration::new(
        TOOL_NAME,
        "List directory entries breadth-first up to a depth",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Root directory to list from (default '.')." },
                "depth": { "type": "integer", "minimum": 0, "description": "Maximum depth to traverse (default 2)." },
                "offset": { "type": "integer", "minimum": 0, "description": "Entries to skip from the start (default 0)." },
                "limit": { "type": "integer", "minimum": 1, "description": "Maximum entries to return (default 200)." }
            },
            "required": ["path", "depth", "offset", "limit"],
            "additionalProperties": false
        }),
        false,
        Box::new(move |args: Value| {
            let args: ListDirArgs = parse_args(TOOL_NAME, args)?;
            if args.limit == 0 {
                return Err(ToolError::invalid_arguments(TOOL_NAME, "field 'limit' must be >= 1"));
            }
            let entries = list_dir(&boundary, &args.path, args.depth, args.offset, args.limit)?;
            Ok(ToolOutcome::ok(json!(entries)))
        }),
    )]
}
