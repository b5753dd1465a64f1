//! Command line tokenization.

/// A tokenized command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lower-cased first token after the prefix.
    pub name: String,

    /// Remaining whitespace-separated tokens, case preserved.
    pub args: Vec<String>,
}

/// Classification of a message text against the active prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Text does not start with the prefix.
    Plain,

    /// Only the prefix (and whitespace) was sent.
    Empty,

    Command(ParsedCommand),
}

impl ParsedCommand {
    /// Classifies `text` against `prefix`.
    ///
    /// The prefix must be at the very start of the text; leading whitespace
    /// makes the message plain.
    #[must_use]
    pub fn parse(text: &str, prefix: &str) -> CommandLine {
        let Some(after_prefix) = text.strip_prefix(prefix) else {
            return CommandLine::Plain;
        };

        let mut tokens = after_prefix.split_whitespace();
        let Some(name) = tokens.next() else {
            return CommandLine::Empty;
        };

        CommandLine::Command(Self {
            name: name.to_lowercase(),
            args: tokens.map(str::to_owned).collect(),
        })
    }

    /// Arguments joined back with single spaces.
    #[must_use]
    pub fn rest(&self) -> String {
        self.args.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(text: &str, prefix: &str) -> ParsedCommand {
        match ParsedCommand::parse(text, prefix) {
            CommandLine::Command(cmd) => cmd,
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple() {
        let cmd = command(".ping", ".");
        assert_eq!(cmd.name, "ping");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_parse_with_args() {
        let cmd = command(".say hello   world", ".");
        assert_eq!(cmd.name, "say");
        assert_eq!(cmd.args, vec!["hello", "world"]);
        assert_eq!(cmd.rest(), "hello world");
    }

    #[test]
    fn test_name_lowercased_args_preserved() {
        let cmd = command(".WEATHER Paris", ".");
        assert_eq!(cmd.name, "weather");
        assert_eq!(cmd.args, vec!["Paris"]);
    }

    #[test]
    fn test_whitespace_after_prefix() {
        let cmd = command(".  ping  ", ".");
        assert_eq!(cmd.name, "ping");
        assert!(cmd.args.is_empty());

        let cmd = command(".echo\tone\ntwo", ".");
        assert_eq!(cmd.args, vec!["one", "two"]);
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(ParsedCommand::parse("hi", "."), CommandLine::Plain);
        assert_eq!(ParsedCommand::parse(" .ping", "."), CommandLine::Plain);
        assert_eq!(ParsedCommand::parse("!ping", "."), CommandLine::Plain);
    }

    #[test]
    fn test_empty_command() {
        assert_eq!(ParsedCommand::parse(".", "."), CommandLine::Empty);
        assert_eq!(ParsedCommand::parse(".   ", "."), CommandLine::Empty);
    }

    #[test]
    fn test_multichar_prefix() {
        let cmd = command("!!help plugin", "!!");
        assert_eq!(cmd.name, "help");
        assert_eq!(cmd.args, vec!["plugin"]);
        assert_eq!(ParsedCommand::parse("!help", "!!"), CommandLine::Plain);
    }
}
