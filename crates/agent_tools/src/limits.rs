pub const DEFAULT_MAX_BYTES: usize = 8 * 1024;
pub const DEFAULT_MAX_LINES: usize = 200;

/// Truncates `text` to at most `max_lines` lines and `max_bytes` bytes
/// (line cap first, byte cut at a valid UTF-8 boundary).
///
/// When anything was dropped, exactly one sentinel line
/// `[truncated N bytes / M lines]` is appended and the flag is true;
/// otherwise the text is returned unchanged.
#[must_use]
pub fn truncate_output(text: &str, max_bytes: usize, max_lines: usize) -> (String, bool) {
    let total_lines = text.split_inclusive('\n').count();

    let mut kept_len = 0usize;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        if index >= max_lines {
            break;
        }
        kept_len += line.len();
    }

    if kept_len > max_bytes {
        kept_len = max_bytes;
        while kept_len > 0 && !text.is_char_boundary(kept_len) {
            kept_len -= 1;
        }
    }

    if kept_len >= text.len() {
        return (text.to_string(), false);
    }

    let kept = &text[..kept_len];
    let kept_lines = kept.split_inclusive('\n').count();
    let dropped_bytes = text.len() - kept_len;
    let dropped_lines = total_lines.saturating_sub(kept_lines);

    let mut result = kept.to_string();
    if !result.is_empty() && !result.ends_with('\n') {
        result.push('\n');
    }
    result.push_str(&format!("[truncated {dropped_bytes} bytes / {dropped_lines} lines]"));
    (result, true)
}
