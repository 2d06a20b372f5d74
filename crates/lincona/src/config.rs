use std::path::PathBuf;
use std::time::Duration;

use agent_tools::{ApprovalPolicy, FsMode};
use session_store::{lincona_home, LogLevel};

pub const DEFAULT_MODEL: &str = "gpt-5.1-codex-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Model reasoning effort advertised per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "minimal" => Self::Minimal,
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub const ALL: [Self; 5] = [Self::None, Self::Minimal, Self::Low, Self::Medium, Self::High];
}

/// Reply verbosity advertised per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

impl Verbosity {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Immutable configuration the driver consumes. Built once before startup;
/// slash commands derive a session-scoped overlay and never touch this.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub api_key: String,
    pub model: String,
    /// Model ids `/model` may switch to.
    pub allowed_models: Vec<String>,
    pub reasoning_effort: ReasoningEffort,
    pub verbosity: Verbosity,
    pub fs_mode: FsMode,
    pub approval_policy: ApprovalPolicy,
    pub log_level: LogLevel,
    pub data_root: PathBuf,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl ResolvedConfig {
    /// Configuration with every field at its documented default, keyed by
    /// `api_key`. The config-file front-end is an external collaborator;
    /// this shim only consumes already-resolved values.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            allowed_models: vec![DEFAULT_MODEL.to_string()],
            reasoning_effort: ReasoningEffort::None,
            verbosity: Verbosity::Medium,
            fs_mode: FsMode::Restricted,
            approval_policy: ApprovalPolicy::OnRequest,
            log_level: LogLevel::Info,
            data_root: lincona_home(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !self.allowed_models.contains(&model) {
            self.allowed_models.push(model.clone());
        }
        self.model = model;
        self
    }

    #[must_use]
    pub fn with_allowed_models(mut self, models: Vec<String>) -> Self {
        self.allowed_models = models;
        if !self.allowed_models.contains(&self.model) {
            self.allowed_models.push(self.model.clone());
        }
        self
    }

    #[must_use]
    pub fn with_data_root(mut self, data_root: impl Into<PathBuf>) -> Self {
        self.data_root = data_root.into();
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{ReasoningEffort, ResolvedConfig, Verbosity, DEFAULT_MODEL};

    #[test]
    fn defaults_match_the_documented_contract() {
        let config = ResolvedConfig::new("sk-test");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.reasoning_effort, ReasoningEffort::None);
        assert_eq!(config.verbosity, Verbosity::Medium);
        assert!(config.allowed_models.contains(&DEFAULT_MODEL.to_string()));
    }

    #[test]
    fn overriding_the_model_keeps_it_in_the_allowed_set() {
        let config = ResolvedConfig::new("sk-test").with_model("gpt-5.2-codex");
        assert_eq!(config.model, "gpt-5.2-codex");
        assert!(config.allowed_models.contains(&"gpt-5.2-codex".to_string()));
    }

    #[test]
    fn effort_and_verbosity_parse_their_documented_tags() {
        assert_eq!(ReasoningEffort::parse("HIGH"), Some(ReasoningEffort::High));
        assert_eq!(ReasoningEffort::parse("bogus"), None);
        assert_eq!(Verbosity::parse("low"), Some(Verbosity::Low));
        assert_eq!(Verbosity::parse(""), None);
    }
}
