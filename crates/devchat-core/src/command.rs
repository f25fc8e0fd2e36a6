//! Input line parsing.
//!
//! Lines starting with `/` are commands; everything else is chat. Parsing
//! never fails: malformed commands become [`Command::Usage`] or
//! [`Command::Unknown`] so the reader can answer privately.

/// Text of the `/help` reply.
pub const HELP_TEXT: &str = "commands: /whisper <name> <message> (aliases /w, /msg), /users, \
                             /bell, /clear, /help";

/// Usage reply for a malformed `/whisper`.
pub const WHISPER_USAGE: &str = "usage: /whisper <name> <message>";

/// One parsed input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Public chat line
    Chat(&'a str),
    /// Private message to one user
    Whisper {
        /// Display name of the recipient
        to: &'a str,
        /// Message body
        text: &'a str,
    },
    /// List connected users
    Users,
    /// Toggle audible bells
    Bell,
    /// Clear this session's scrollback
    Clear,
    /// Show available commands
    Help,
    /// Known command with bad arguments; carries the usage text
    Usage(&'static str),
    /// Unrecognized command; carries the command word
    Unknown(&'a str),
}

/// Parse one input line.
///
/// The caller has already truncated the line and trimmed trailing whitespace;
/// leading whitespace is significant for chat but not for commands.
pub fn parse(line: &str) -> Command<'_> {
    let Some(rest) = line.trim_start().strip_prefix('/') else {
        return Command::Chat(line);
    };

    let (word, args) = split_word(rest);
    match word {
        "whisper" | "w" | "msg" => {
            let (to, text) = split_word(args);
            if to.is_empty() || text.is_empty() {
                Command::Usage(WHISPER_USAGE)
            } else {
                Command::Whisper { to, text }
            }
        },
        "users" => Command::Users,
        "bell" => Command::Bell,
        "clear" => Command::Clear,
        "help" => Command::Help,
        _ => Command::Unknown(word),
    }
}

/// First whitespace-delimited word and the remainder with leading
/// whitespace removed.
fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(end) => (&input[..end], input[end..].trim_start()),
        None => (input, ""),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(parse("hello there"), Command::Chat("hello there"));
        assert_eq!(parse("  indented"), Command::Chat("  indented"));
    }

    #[test]
    fn whisper_and_aliases() {
        let expected = Command::Whisper { to: "bob", text: "hi there" };

        assert_eq!(parse("/whisper bob hi there"), expected);
        assert_eq!(parse("/w bob hi there"), expected);
        assert_eq!(parse("/msg   bob   hi there"), expected);
    }

    #[test]
    fn whisper_without_text_is_usage() {
        assert_eq!(parse("/whisper"), Command::Usage(WHISPER_USAGE));
        assert_eq!(parse("/whisper bob"), Command::Usage(WHISPER_USAGE));
        assert_eq!(parse("/w bob   "), Command::Usage(WHISPER_USAGE));
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("/users"), Command::Users);
        assert_eq!(parse("/bell"), Command::Bell);
        assert_eq!(parse("/clear"), Command::Clear);
        assert_eq!(parse("/help"), Command::Help);
        assert_eq!(parse("/help me"), Command::Help);
    }

    #[test]
    fn unknown_command_names_itself() {
        assert_eq!(parse("/nick bob"), Command::Unknown("nick"));
        assert_eq!(parse("/"), Command::Unknown(""));
    }

    proptest! {
        /// Property: lines not starting with '/' (after leading whitespace)
        /// are always chat and keep their text
        #[test]
        fn prop_non_commands_are_chat(line in "[^/\\s][^\\n]{0,64}") {
            prop_assert_eq!(parse(&line), Command::Chat(&line));
        }

        /// Property: a parsed whisper never has an empty recipient or body
        #[test]
        fn prop_whisper_fields_non_empty(line in "/(w|msg|whisper)[ a-z]{0,16}") {
            if let Command::Whisper { to, text } = parse(&line) {
                prop_assert!(!to.is_empty());
                prop_assert!(!text.is_empty());
                prop_assert!(!to.contains(char::is_whitespace));
            }
        }
    }
}
