use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::boundary::FsBoundary;
use crate::error::ToolError;
use crate::registry::{parse_args, ToolOutcome, ToolRegistration};

const TOOL_NAME: &str = "read_file";
const MAX_LINE_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadFileArgs {
    path: String,
    offset: usize,
    limit: usize,
    mode: ReadMode,
    indent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReadMode {
    Slice,
    Indentation,
}

/// Reads a window of `path`.
///
/// `slice` returns lines `[offset, offset + limit)`. `indentation` returns a
/// block starting at `offset` that continues while lines are blank or keep at
/// least the anchor line's indentation (`indent` is the anchor when the
/// anchor line itself is blank). Lines beyond 500 characters are clipped with
/// an ellipsis.
pub fn read_file(
    boundary: &FsBoundary,
    path: &str,
    offset: usize,
    limit: usize,
    indentation_mode: bool,
    indent: &str,
) -> Result<(String, bool), ToolError> {
    let file_path = boundary.resolve(path)?;
    if !file_path.is_file() {
        return Err(ToolError::io(
            format!("reading {}", file_path.display()),
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        ));
    }

    let contents = std::fs::read_to_string(&file_path)
        .map_err(|source| ToolError::io(format!("reading {}", file_path.display()), source))?;
    let lines: Vec<&str> = contents.lines().collect();

    let (selected, truncated) = if indentation_mode {
        indentation_block(&lines, offset, limit, indent)
    } else {
        let end = (offset + limit).min(lines.len());
        let selected = if offset < lines.len() {
            lines[offset..end].to_vec()
        } else {
            Vec::new()
        };
        (selected, lines.len() > offset + limit)
    };

    let clipped: Vec<String> = selected.iter().map(|line| clip_line(line)).collect();
    Ok((clipped.join("\n"), truncated))
}

/// Lines from `offset` while indentation holds, capped at `limit`.
fn indentation_block<'a>(
    lines: &[&'a str],
    offset: usize,
    limit: usize,
    fallback_indent: &str,
) -> (Vec<&'a str>, bool) {
    let Some(anchor) = lines.get(offset) else {
        return (Vec::new(), false);
    };

    let anchor_indent = if anchor.trim().is_empty() {
        fallback_indent.to_string()
    } else {
        leading_whitespace(anchor)
    };

    let mut block = vec![*anchor];
    for line in &lines[offset + 1..] {
        if block.len() >= limit {
            return (block, true);
        }
        if line.trim().is_empty() || leading_whitespace(line).starts_with(&anchor_indent) {
            block.push(line);
        } else {
            break;
        }
    }
    (block, false)
}

fn leading_whitespace(line: &str) -> String {
    line.chars().take_while(|c| c.is_whitespace()).collect()
}

fn clip_line(line: &str) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        return line.to_string();
    }
    let clipped: String = line.chars().take(MAX_LINE_CHARS).collect();
    format!("{clipped}…")
}

pub(crate) fn registrations(boundary: &Arc<FsBoundary>) -> Vec<ToolRegistration> {
    let boundary = Arc::clone(boundary);
    vec![ToolRegistration::new(
        TOOL_NAME,
        "Read a file slice, or an indentation-scoped block",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to read." },
                "offset": { "type": "integer", "minimum": 0, "description": "Starting line, 0-indexed." },
                "limit": { "type": "integer", "minimum": 1, "description": "Maximum number of lines to return." },
                "mode": { "type": "string", "enum": ["slice", "indentation"], "description": "Windowing mode." },
                "indent": { "type": "string", "description": "Anchor indentation used when the anchor line is blank." }
            },
            "required": ["path", "offset", "limit", "mode", "indent"],
            "additionalProperties": false
        }),
        false,
        Box::new(move |args: Value| {
            let args: ReadFileArgs = parse_args(TOOL_NAME, args)?;
            if args.limit == 0 {
                return Err(ToolError::invalid_arguments(TOOL_NAME, "field 'limit' must be >= 1"));
            }
            let (text, truncated) = read_file(
                &boundary,
                &args.path,
                args.offset,
                args.limit,
                args.mode == ReadMode::Indentation,
                &args.indent,
            )?;
            Ok(ToolOutcome::ok_truncated(
                json!({ "text": text, "truncated": truncated }),
                truncated,
            ))
        }),
    )]
}
