//! Line editing for raw SSH terminal input.
//!
//! A pty session delivers keystrokes, not lines. The editor owns the pending
//! input buffer and the prompt in front of it, turns bytes into completed
//! lines, and produces the echo the client needs to see what it typed.
//! Escape sequences (arrow keys, function keys) are consumed and ignored.

use unicode_width::UnicodeWidthChar;

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const CTRL_U: u8 = 0x15;
const ESC: u8 = 0x1b;
const DELETE: u8 = 0x7f;

/// Clear the current terminal line and return to column 0.
const CLEAR_LINE: &[u8] = b"\r\x1b[2K";

/// Output of feeding bytes to the editor.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Feed {
    /// Bytes to write back to the client
    pub echo: Vec<u8>,
    /// Lines completed by this input, in order
    pub lines: Vec<String>,
    /// Client asked to end its input
    pub eof: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    /// Saw ESC
    Start,
    /// Inside `ESC [` parameters
    Csi,
    /// After `ESC O`, one more byte
    Ss3,
}

/// Input buffer and prompt for one client.
#[derive(Debug)]
pub struct LineEditor {
    prompt: String,
    buffer: String,
    /// Bytes of an incomplete UTF-8 character
    partial: Vec<u8>,
    escape: Escape,
    /// Last byte was CR, so a following LF is part of the same Enter
    after_cr: bool,
    max_len: usize,
    closed: bool,
}

impl LineEditor {
    /// Create an editor accepting lines up to `max_len` bytes.
    pub fn new(max_len: usize) -> Self {
        Self {
            prompt: String::new(),
            buffer: String::new(),
            partial: Vec::new(),
            escape: Escape::None,
            after_cr: false,
            max_len,
            closed: false,
        }
    }

    /// Pending input.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Replace the prompt shown in front of the input.
    pub fn set_prompt(&mut self, prompt: &str) {
        prompt.clone_into(&mut self.prompt);
    }

    /// Prompt followed by the pending input, for drawing after a redraw.
    pub fn line(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.prompt.len() + self.buffer.len());
        line.extend_from_slice(self.prompt.as_bytes());
        line.extend_from_slice(self.buffer.as_bytes());
        line
    }

    /// Feed raw bytes from the client.
    ///
    /// Once the client has asked to end its input, further bytes are ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> Feed {
        let mut feed = Feed::default();
        for &byte in bytes {
            if self.closed {
                break;
            }
            self.byte(byte, &mut feed);
        }
        feed
    }

    fn byte(&mut self, byte: u8, feed: &mut Feed) {
        let after_cr = std::mem::take(&mut self.after_cr);

        match self.escape {
            Escape::Start => {
                self.escape = match byte {
                    b'[' => Escape::Csi,
                    b'O' => Escape::Ss3,
                    _ => Escape::None,
                };
                return;
            },
            Escape::Csi => {
                // Parameters and intermediates run until a final byte.
                if (0x40..=0x7e).contains(&byte) {
                    self.escape = Escape::None;
                }
                return;
            },
            Escape::Ss3 => {
                self.escape = Escape::None;
                return;
            },
            Escape::None => {},
        }

        match byte {
            b'\r' => {
                self.after_cr = true;
                self.submit(feed);
            },
            b'\n' if after_cr => {},
            b'\n' => self.submit(feed),
            BACKSPACE | DELETE => self.backspace(feed),
            CTRL_C => self.close(feed),
            CTRL_D if self.buffer.is_empty() => self.close(feed),
            CTRL_U => {
                self.buffer.clear();
                self.redraw(feed);
            },
            ESC => {
                self.partial.clear();
                self.escape = Escape::Start;
            },
            byte if byte < 0x20 => {},
            byte => self.push_byte(byte, feed),
        }
    }

    fn push_byte(&mut self, byte: u8, feed: &mut Feed) {
        self.partial.push(byte);
        match std::str::from_utf8(&self.partial) {
            Ok(text) => {
                if let Some(c) = text.chars().next() {
                    self.insert(c, feed);
                }
                self.partial.clear();
            },
            // Incomplete character, wait for the rest.
            Err(e) if e.error_len().is_none() => {},
            Err(_) => {
                let restart = self.partial.len() > 1;
                self.partial.clear();
                if restart {
                    self.push_byte(byte, feed);
                }
            },
        }
    }

    fn insert(&mut self, c: char, feed: &mut Feed) {
        if c.is_control() || self.buffer.len() + c.len_utf8() > self.max_len {
            return;
        }
        self.buffer.push(c);
        let mut encoded = [0u8; 4];
        feed.echo.extend_from_slice(c.encode_utf8(&mut encoded).as_bytes());
    }

    fn backspace(&mut self, feed: &mut Feed) {
        self.partial.clear();
        if let Some(c) = self.buffer.pop() {
            for _ in 0..c.width().unwrap_or(0) {
                feed.echo.extend_from_slice(b"\x08 \x08");
            }
        }
    }

    fn submit(&mut self, feed: &mut Feed) {
        self.partial.clear();
        feed.lines.push(std::mem::take(&mut self.buffer));
        self.redraw(feed);
    }

    fn close(&mut self, feed: &mut Feed) {
        self.closed = true;
        feed.eof = true;
        feed.echo.extend_from_slice(b"\r\n");
    }

    fn redraw(&self, feed: &mut Feed) {
        feed.echo.extend_from_slice(CLEAR_LINE);
        feed.echo.extend_from_slice(&self.line());
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn editor() -> LineEditor {
        let mut editor = LineEditor::new(64);
        editor.set_prompt("alice: ");
        editor
    }

    #[test]
    fn typed_characters_are_echoed() {
        let mut editor = editor();
        let feed = editor.feed(b"hi");

        assert_eq!(feed.echo, b"hi");
        assert!(feed.lines.is_empty());
        assert_eq!(editor.buffer(), "hi");
    }

    #[test]
    fn enter_completes_line_and_redraws_prompt() {
        let mut editor = editor();
        editor.feed(b"hello");
        let feed = editor.feed(b"\r");

        assert_eq!(feed.lines, vec!["hello".to_string()]);
        assert_eq!(feed.echo, b"\r\x1b[2Kalice: ");
        assert_eq!(editor.buffer(), "");
    }

    #[test]
    fn crlf_is_one_enter() {
        let mut editor = editor();
        let feed = editor.feed(b"one\r\ntwo\n");

        assert_eq!(feed.lines, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn backspace_erases_by_display_width() {
        let mut editor = editor();
        editor.feed("a界".as_bytes());

        let feed = editor.feed(&[DELETE]);
        assert_eq!(feed.echo, b"\x08 \x08\x08 \x08");
        assert_eq!(editor.buffer(), "a");

        let feed = editor.feed(&[BACKSPACE, BACKSPACE]);
        assert_eq!(feed.echo, b"\x08 \x08");
        assert_eq!(editor.buffer(), "");
    }

    #[test]
    fn arrow_keys_are_ignored() {
        let mut editor = editor();
        let feed = editor.feed(b"a\x1b[Ab\x1bOCc\x1b[1;5Dd");

        assert_eq!(editor.buffer(), "abcd");
        assert_eq!(feed.echo, b"abcd");
    }

    #[test]
    fn utf8_split_across_reads() {
        let mut editor = editor();
        let bytes = "é".as_bytes();

        assert!(editor.feed(&bytes[..1]).echo.is_empty());
        assert_eq!(editor.feed(&bytes[1..]).echo, bytes);
        assert_eq!(editor.buffer(), "é");
    }

    #[test]
    fn invalid_utf8_is_dropped() {
        let mut editor = editor();
        editor.feed(&[0xff, b'x', 0xc3, b'y']);

        assert_eq!(editor.buffer(), "xy");
    }

    #[test]
    fn ctrl_d_on_empty_line_ends_input() {
        let mut editor = editor();
        editor.feed(b"draft");
        assert!(!editor.feed(&[CTRL_D]).eof);

        editor.feed(&[CTRL_U]);
        let feed = editor.feed(&[CTRL_D]);
        assert!(feed.eof);

        assert_eq!(editor.feed(b"late\r"), Feed::default());
    }

    #[test]
    fn ctrl_c_ends_input() {
        let mut editor = editor();
        let feed = editor.feed(b"half\x03rest\r");

        assert!(feed.eof);
        assert!(feed.lines.is_empty());
    }

    #[test]
    fn ctrl_u_clears_line() {
        let mut editor = editor();
        editor.feed(b"oops");
        let feed = editor.feed(&[CTRL_U]);

        assert_eq!(editor.buffer(), "");
        assert_eq!(feed.echo, b"\r\x1b[2Kalice: ");
    }

    #[test]
    fn input_stops_at_max_len() {
        let mut editor = LineEditor::new(4);
        let feed = editor.feed(b"abcdef");

        assert_eq!(editor.buffer(), "abcd");
        assert_eq!(feed.echo, b"abcd");
    }

    #[test]
    fn line_is_prompt_then_buffer() {
        let mut editor = editor();
        editor.feed(b"typing");
        assert_eq!(editor.line(), b"alice: typing");

        editor.set_prompt("bob: ");
        assert_eq!(editor.line(), b"bob: typing");
    }

    proptest! {
        #[test]
        fn prop_buffer_is_bounded_and_free_of_controls(
            bytes in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let mut editor = LineEditor::new(32);
            let feed = editor.feed(&bytes);

            prop_assert!(editor.buffer().len() <= 32);
            for line in feed.lines.iter().map(String::as_str).chain([editor.buffer()]) {
                prop_assert!(!line.chars().any(char::is_control));
            }
        }
    }
}
