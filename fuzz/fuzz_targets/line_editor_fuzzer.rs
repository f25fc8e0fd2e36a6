//! Fuzz target for the SSH line editor
//!
//! Raw keystrokes arrive in arbitrary chunks from untrusted clients.
//!
//! # Strategy
//!
//! - Random bytes split at random points (partial UTF-8, partial escapes)
//! - Small line limits so the length cap is exercised
//!
//! # Invariants
//!
//! - NEVER panic
//! - Pending input never exceeds the limit
//! - Completed lines never exceed the limit or contain control characters
//! - Nothing is produced after end of input

#![no_main]

use arbitrary::Arbitrary;
use devchat_server::ssh::LineEditor;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    max_len: u8,
    chunks: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let max_len = usize::from(input.max_len);
    let mut editor = LineEditor::new(max_len);
    editor.set_prompt("fuzz: ");
    let mut ended = false;

    for chunk in &input.chunks {
        let feed = editor.feed(chunk);

        if ended {
            assert!(feed.echo.is_empty() && feed.lines.is_empty() && !feed.eof);
        }
        for line in &feed.lines {
            assert!(line.len() <= max_len);
            assert!(!line.chars().any(char::is_control));
        }
        assert!(editor.buffer().len() <= max_len);
        ended |= feed.eof;
    }
});
