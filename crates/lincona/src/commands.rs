/// Runtime control commands typed at the prompt. Unknown commands are
/// user-visible errors and never reach the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    NewSession,
    Model(String),
    Reasoning(String),
    Approvals(String),
    FsMode(String),
    Help,
    Quit,
    Unknown(String),
}

pub const HELP_TEXT: &str = "Commands:\n  /newsession                          start a fresh session\n  /model <id>                          switch models (validated)\n  /reasoning <none|minimal|low|medium|high>\n  /approvals <never|on-request|always>\n  /fsmode <restricted|unrestricted>\n  /help\n  /quit";

/// Parses a slash command, or returns `None` for plain prompt text.
pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next().unwrap_or(trimmed);
    let argument = parts.next().map(ToOwned::to_owned);

    let parsed = match (command, argument) {
        ("/newsession", _) => SlashCommand::NewSession,
        ("/model", Some(id)) => SlashCommand::Model(id),
        ("/reasoning", Some(level)) => SlashCommand::Reasoning(level),
        ("/approvals", Some(policy)) => SlashCommand::Approvals(policy),
        ("/fsmode", Some(mode)) => SlashCommand::FsMode(mode),
        ("/help", _) => SlashCommand::Help,
        ("/quit", _) => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::{parse_slash_command, SlashCommand};

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_slash_command("hello world"), None);
        assert_eq!(parse_slash_command("  spaced"), None);
    }

    #[test]
    fn known_commands_parse_with_their_arguments() {
        assert_eq!(
            parse_slash_command("/model gpt-5.2-codex"),
            Some(SlashCommand::Model("gpt-5.2-codex".to_string()))
        );
        assert_eq!(
            parse_slash_command("/approvals never"),
            Some(SlashCommand::Approvals("never".to_string()))
        );
        assert_eq!(
            parse_slash_command("/fsmode unrestricted"),
            Some(SlashCommand::FsMode("unrestricted".to_string()))
        );
        assert_eq!(parse_slash_command("/quit"), Some(SlashCommand::Quit));
        assert_eq!(parse_slash_command("  /help  "), Some(SlashCommand::Help));
    }

    #[test]
    fn commands_missing_a_required_argument_are_unknown() {
        assert_eq!(
            parse_slash_command("/model"),
            Some(SlashCommand::Unknown("/model".to_string()))
        );
        assert_eq!(
            parse_slash_command("/frobnicate now"),
            Some(SlashCommand::Unknown("/frobnicate".to_string()))
        );
    }
}
