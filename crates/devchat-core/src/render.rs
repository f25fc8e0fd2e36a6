//! Screen rendering for one session.
//!
//! A redraw is a full repaint: clear, replay the session's private backlog as
//! `sender: message` lines with a right-aligned timestamp where the width
//! allows, then a separator. The prompt is handed to the transport
//! separately so it can keep the client's pending input beneath it.

use std::io;

use chrono::Local;
use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Color, Stylize},
    terminal::{Clear, ClearType},
};
use unicode_width::UnicodeWidthStr;

use crate::{
    event::{Event, SYSTEM_USERNAME, StampedEvent},
    session::View,
};

const TIME_FORMAT: &str = "%H:%M:%S";

/// Palette for display names, picked by hash so a name keeps its color.
const NAME_COLORS: [u8; 12] = [39, 45, 75, 81, 112, 148, 172, 178, 207, 213, 220, 141];

/// One full repaint of a session's terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Bytes that clear and redraw the screen
    pub screen: Vec<u8>,
    /// Prompt to show in front of the client's input
    pub prompt: String,
}

/// Render the session's view for the session named `name`.
pub fn frame(view: &View, name: &str) -> io::Result<Frame> {
    let width = view.window().width;
    let mut screen = Vec::new();
    queue!(screen, Clear(ClearType::All), MoveTo(0, 0))?;

    for event in view.backlog().iter() {
        if event.kind() == crate::EventKind::NoOp {
            continue;
        }
        screen.extend_from_slice(format_line(event, width, view.bell()).as_bytes());
        screen.extend_from_slice(b"\r\n");
    }
    screen.extend_from_slice(separator(width).as_bytes());
    screen.extend_from_slice(b"\r\n");

    Ok(Frame { screen, prompt: prompt(name) })
}

/// Input prompt for a display name.
pub fn prompt(name: &str) -> String {
    format!("{name}: ")
}

/// A single notice line written outside the normal redraw (rejections).
pub fn notice(text: &str) -> Vec<u8> {
    format!("{}: {}\r\n", SYSTEM_USERNAME.green(), text).into_bytes()
}

/// Format one event as a terminal line.
///
/// The timestamp is right-aligned when `width` leaves room for it. Bell
/// characters are removed when the session disabled bells.
pub fn format_line(event: &StampedEvent, width: u16, bell: bool) -> String {
    let label = match event.event() {
        Event::Chat { sender, .. } => paint_name(sender),
        Event::Whisper { sender, receiver, .. } => {
            format!("{} -> {}", paint_name(sender.name()), paint_name(receiver))
        },
        Event::Join { .. }
        | Event::Part { .. }
        | Event::SystemWhisper { .. }
        | Event::System { .. }
        | Event::Shutdown
        | Event::NoOp { .. } => SYSTEM_USERNAME.green().to_string(),
    };

    let mut line = format!("{label}: {}", event.message());
    if !bell {
        line.retain(|c| c != '\x07');
    }

    if line.contains('\n') {
        return line.replace("\r\n", "\n").replace('\n', "\r\n");
    }

    let stamp = event.received_at().with_timezone(&Local).format(TIME_FORMAT).to_string();
    let used = visible_width(&line);
    let room = usize::from(width);
    if used + 1 + stamp.len() <= room {
        let padding = room - used - stamp.len();
        line.push_str(&" ".repeat(padding));
        line.push_str(&stamp.dark_grey().to_string());
    }
    line
}

/// Display name in its stable color.
pub fn paint_name(name: &str) -> String {
    name.with(name_color(name)).to_string()
}

fn name_color(name: &str) -> Color {
    // FNV-1a; only needs to be stable, not strong.
    let hash = name.bytes().fold(0x811c_9dc5_u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
    Color::AnsiValue(NAME_COLORS[hash as usize % NAME_COLORS.len()])
}

fn separator(width: u16) -> String {
    "─".repeat(usize::from(width.max(1)))
}

/// Number of terminal columns `text` occupies once escape sequences are
/// removed.
pub fn visible_width(text: &str) -> usize {
    strip_ansi(text).width()
}

/// Remove ANSI escape sequences (CSI, OSC and two-byte escapes).
pub fn strip_ansi(text: &str) -> String {
    #[derive(Clone, Copy)]
    enum State {
        Text,
        Escape,
        Csi,
        Osc,
        OscEscape,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Text;
    for c in text.chars() {
        state = match (state, c) {
            (State::Text, '\x1b') => State::Escape,
            (State::Text, c) => {
                out.push(c);
                State::Text
            },
            (State::Escape, '[') => State::Csi,
            (State::Escape, ']') => State::Osc,
            (State::Escape, _) => State::Text,
            (State::Csi, '\x40'..='\x7e') => State::Text,
            (State::Csi, _) => State::Csi,
            (State::Osc, '\x07') => State::Text,
            (State::Osc, '\x1b') => State::OscEscape,
            (State::Osc, _) => State::Osc,
            (State::OscEscape, '\\') => State::Text,
            (State::OscEscape, _) => State::Osc,
        };
    }
    out
}
