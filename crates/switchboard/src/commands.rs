//! Chat commands answered by the bot.

/// A recognized command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Help,
}

impl Command {
    /// Parse `content` as `<prefix><name>`, ignoring trailing arguments.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }
        let rest = content.trim_start().strip_prefix(prefix)?;
        if rest.starts_with(char::is_whitespace) {
            return None;
        }
        let name = rest.split_whitespace().next()?;

        match name {
            "ping" => Some(Command::Ping),
            "help" => Some(Command::Help),
            _ => None,
        }
    }

    /// Reply text for this command.
    pub fn reply(self, prefix: &str) -> String {
        match self {
            Command::Ping => "Pong!".to_string(),
            Command::Help => format!(
                "Available commands:\n{p}ping - check that the bot is online\n{p}help - show this message",
                p = prefix
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(Command::parse("!", "!ping"), Some(Command::Ping));
        assert_eq!(Command::parse("!", "  !help me"), Some(Command::Help));
        assert_eq!(Command::parse("?", "?ping"), Some(Command::Ping));
    }

    #[test]
    fn test_parse_ignores_other_content() {
        assert_eq!(Command::parse("!", "ping"), None);
        assert_eq!(Command::parse("!", "!pingpong"), None);
        assert_eq!(Command::parse("!", "!"), None);
        assert_eq!(Command::parse("!", "! ping"), None);
        assert_eq!(Command::parse("", "ping"), None);
    }

    #[test]
    fn test_help_lists_commands_with_prefix() {
        let help = Command::Help.reply("?");
        assert!(help.contains("?ping"));
        assert!(help.contains("?help"));
        assert_eq!(Command::Ping.reply("!"), "Pong!");
    }
}
