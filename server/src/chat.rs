//! Chat line commands.

use crate::color::trailing_hex_color;

pub const DEFAULT_BOT_COUNT: usize = 10;
pub const MAX_BOT_COUNT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Enter the author, optionally with a `#rgb` / `#rrggbb` color
    Marble { color: Option<String> },
    /// Force the running round to end
    End,
    /// Spawn this many bots; zero or garbage means the default
    LotsOfBots(usize),
}

impl ChatCommand {
    /// Parses a chat line. Anything that is not a command yields None.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let mut words = line.split_whitespace();
        let command = words.next()?.to_ascii_lowercase();
        match command.as_str() {
            "!marble" => Some(ChatCommand::Marble {
                color: trailing_hex_color(line),
            }),
            "!end" => Some(ChatCommand::End),
            "!lotsofbots" => {
                let count = words
                    .next()
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|&n| n > 0)
                    .unwrap_or(DEFAULT_BOT_COUNT)
                    .min(MAX_BOT_COUNT);
                Some(ChatCommand::LotsOfBots(count))
            }
            _ => None,
        }
    }

    pub fn developer_only(&self) -> bool {
        !matches!(self, ChatCommand::Marble { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marble_with_and_without_color() {
        assert_eq!(
            ChatCommand::parse("!marble"),
            Some(ChatCommand::Marble { color: None })
        );
        assert_eq!(
            ChatCommand::parse("!marble #f0a"),
            Some(ChatCommand::Marble {
                color: Some("#f0a".to_string())
            })
        );
        assert_eq!(
            ChatCommand::parse("  !MARBLE   #12ab9F "),
            Some(ChatCommand::Marble {
                color: Some("#12ab9F".to_string())
            })
        );
        assert_eq!(
            ChatCommand::parse("!marble #nothex"),
            Some(ChatCommand::Marble { color: None })
        );
    }

    #[test]
    fn bot_count_defaults_and_caps() {
        assert_eq!(
            ChatCommand::parse("!lotsofbots"),
            Some(ChatCommand::LotsOfBots(DEFAULT_BOT_COUNT))
        );
        assert_eq!(
            ChatCommand::parse("!lotsofbots 25"),
            Some(ChatCommand::LotsOfBots(25))
        );
        assert_eq!(
            ChatCommand::parse("!lotsofbots 5000"),
            Some(ChatCommand::LotsOfBots(MAX_BOT_COUNT))
        );
        assert_eq!(
            ChatCommand::parse("!lotsofbots 0"),
            Some(ChatCommand::LotsOfBots(DEFAULT_BOT_COUNT))
        );
        assert_eq!(
            ChatCommand::parse("!lotsofbots lots"),
            Some(ChatCommand::LotsOfBots(DEFAULT_BOT_COUNT))
        );
    }

    #[test]
    fn other_lines_ignored() {
        assert_eq!(ChatCommand::parse(""), None);
        assert_eq!(ChatCommand::parse("hello !marble"), None);
        assert_eq!(ChatCommand::parse("!marbles"), None);
    }

    #[test]
    fn admin_commands_are_developer_only() {
        assert!(ChatCommand::End.developer_only());
        assert!(ChatCommand::LotsOfBots(1).developer_only());
        assert!(!ChatCommand::Marble { color: None }.developer_only());
    }
}
