pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Appends the `/responses` path to a base URL, tolerating trailing slashes
/// and callers that already supplied the full endpoint.
#[must_use]
pub fn normalize_responses_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/responses") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/responses")
    }
}
