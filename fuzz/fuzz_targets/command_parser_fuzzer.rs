//! Fuzz target for chat input parsing
//!
//! Every line a client submits goes through the command parser before it
//! becomes an event.
//!
//! # Invariants
//!
//! - NEVER panic on arbitrary input
//! - Parsed pieces are slices of the input
//! - Whisper recipients are a single non-empty token
//! - Lines not starting with '/' (after leading whitespace) are plain chat

#![no_main]

use devchat_core::{command, Command};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|line: &str| {
    match command::parse(line) {
        Command::Chat(text) => {
            assert!(!line.trim_start().starts_with('/'));
            assert_eq!(text, line);
        }
        Command::Whisper { to, text } => {
            assert!(!to.is_empty());
            assert!(!to.contains(char::is_whitespace));
            assert!(line.contains(to));
            assert!(line.contains(text));
        }
        Command::Unknown(word) => {
            assert!(line.contains(word));
        }
        Command::Users | Command::Bell | Command::Clear | Command::Help | Command::Usage(_) => {
            assert!(line.trim_start().starts_with('/'));
        }
    }
});
