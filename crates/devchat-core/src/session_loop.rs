//! Per-session tasks.
//!
//! Each session runs three supervised tasks: a reader turning input lines
//! into events, a renderer draining the session's inbox into full redraws,
//! and a resize watcher. All three stop once the session is closed. A panic
//! in any of them is reported to the room and the session is removed
//! quietly; the dispatcher and other sessions carry on.

use std::{future::Future, io, sync::Arc};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error};

use crate::{
    command::{self, Command, HELP_TEXT},
    event::{Event, EventKind},
    fault::{self, Fault},
    render,
    roster::Roster,
    session::{Inbox, Session},
    transport::{LineReader, Terminal, WindowSize},
};

/// Part reason when the client ends its input stream.
pub const QUIT_REASON: &str = "quit";

/// The three tasks of one connected session.
pub(crate) struct SessionLoop<R, T> {
    pub(crate) session: Arc<Session>,
    pub(crate) inbox: Inbox,
    pub(crate) reader: R,
    pub(crate) terminal: T,
    pub(crate) resizes: mpsc::UnboundedReceiver<WindowSize>,
    pub(crate) events: mpsc::Sender<Event>,
    pub(crate) roster: Arc<Roster>,
    pub(crate) max_message_len: usize,
}

impl<R, T> SessionLoop<R, T>
where
    R: LineReader,
    T: Terminal,
{
    /// Spawn the session's tasks and wait for all of them to stop.
    pub(crate) async fn run(self) {
        let Self { session, inbox, reader, terminal, resizes, events, roster, max_message_len } = self;

        let reader = Reader {
            session: Arc::clone(&session),
            reader,
            events: events.clone(),
            roster: Arc::clone(&roster),
            max_message_len,
        };
        let renderer =
            Renderer { session: Arc::clone(&session), inbox, terminal, events: events.clone() };
        let resize = watch_resizes(Arc::clone(&session), resizes, events.clone());

        let tasks = [
            supervise(&session, &events, &roster, reader.run()),
            supervise(&session, &events, &roster, renderer.run()),
            supervise(&session, &events, &roster, resize),
        ];

        for task in tasks {
            if let Err(e) = task.await {
                error!(session = %session.id(), error = %e, "session task failed");
                session.close();
            }
        }
        debug!(session = %session.id(), name = %session.name(), "session finished");
    }
}

/// Spawn one session task inside a fault boundary.
fn supervise<F>(
    session: &Arc<Session>,
    events: &mpsc::Sender<Event>,
    roster: &Arc<Roster>,
    task: F,
) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let session = Arc::clone(session);
    let events = events.clone();
    let roster = Arc::clone(roster);
    tokio::spawn(async move {
        if let Err(fault) = fault::catch(task).await {
            report_fault(&events, &roster, Some(&session), &fault).await;
        }
    })
}

/// Tear down after a panic: drop the session quietly and tell the room.
pub(crate) async fn report_fault(
    events: &mpsc::Sender<Event>,
    roster: &Roster,
    session: Option<&Arc<Session>>,
    fault: &Fault,
) {
    match session {
        Some(session) => {
            error!(session = %session.id(), name = %session.name(), %fault, "recovered from panic");
            roster.remove_quietly(session);
        },
        None => error!(%fault, "recovered from panic"),
    }
    if events.send(Event::System { text: fault.report() }).await.is_err() {
        debug!("event queue closed, fault not reported");
    }
}

struct Reader<R> {
    session: Arc<Session>,
    reader: R,
    events: mpsc::Sender<Event>,
    roster: Arc<Roster>,
    max_message_len: usize,
}

impl<R: LineReader> Reader<R> {
    async fn run(mut self) {
        loop {
            let line = tokio::select! {
                biased;
                () = self.session.closed() => break,
                () = self.events.closed() => break,
                line = self.reader.read_line() => line,
            };

            let event = match line {
                Ok(Some(line)) => match self.interpret(&line) {
                    Some(event) => event,
                    None => continue,
                },
                Ok(None) => self.part(QUIT_REASON.to_string()),
                Err(e) => self.part(format!("error: {e}")),
            };

            let leaving = event.kind() == EventKind::Part;
            if self.events.send(event).await.is_err() || leaving {
                break;
            }
        }
        self.session.close();
    }

    fn part(&self, reason: String) -> Event {
        Event::Part { user: Arc::clone(&self.session), reason }
    }

    /// Turn one input line into an event, or `None` if there is nothing to
    /// send.
    fn interpret(&self, line: &str) -> Option<Event> {
        let line = clip(line, self.max_message_len);
        if line.is_empty() {
            return None;
        }

        let session = &self.session;
        let event = match command::parse(line) {
            Command::Chat(text) => {
                Event::Chat { sender: session.name().to_string(), text: text.to_string() }
            },
            Command::Whisper { to, text } => Event::Whisper {
                sender: Arc::clone(session),
                receiver: to.to_string(),
                text: text.to_string(),
            },
            Command::Users => {
                self.reply(format!("connected users: {}", self.roster.names().join(", ")))
            },
            Command::Bell => {
                let on = session.view().toggle_bell();
                self.reply(format!("bell {}", if on { "on" } else { "off" }))
            },
            Command::Clear => {
                session.view().clear();
                Event::NoOp { user: Arc::clone(session) }
            },
            Command::Help => self.reply(HELP_TEXT.to_string()),
            Command::Usage(usage) => self.reply(usage.to_string()),
            Command::Unknown(word) => self.reply(format!("unknown command: /{word}")),
        };
        Some(event)
    }

    fn reply(&self, text: String) -> Event {
        Event::SystemWhisper { receiver: Arc::clone(&self.session), text }
    }
}

/// Truncate to at most `max` bytes on a character boundary, then trim
/// trailing whitespace.
pub(crate) fn clip(line: &str, max: usize) -> &str {
    let mut end = line.len().min(max);
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    line[..end].trim_end()
}

struct Renderer<T> {
    session: Arc<Session>,
    inbox: Inbox,
    terminal: T,
    events: mpsc::Sender<Event>,
}

impl<T: Terminal> Renderer<T> {
    async fn run(mut self) {
        // Clear whatever the client had on screen before joining.
        if let Err(e) = self.draw().await {
            self.fail(&e).await;
            return;
        }

        loop {
            let first = tokio::select! {
                biased;
                () = self.session.closed() => return,
                event = self.inbox.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };

            // Coalesce everything already queued into one redraw.
            {
                let mut view = self.session.view();
                let queued = std::iter::from_fn(|| self.inbox.try_recv().ok());
                for event in std::iter::once(first).chain(queued) {
                    if event.kind() != EventKind::NoOp {
                        view.push(event);
                    }
                }
            }

            if let Err(e) = self.draw().await {
                self.fail(&e).await;
                return;
            }
        }
    }

    async fn draw(&mut self) -> io::Result<()> {
        let frame = {
            let view = self.session.view();
            render::frame(&view, self.session.name())?
        };
        self.terminal.set_prompt(&frame.prompt);
        self.terminal.write(&frame.screen).await
    }

    async fn fail(&mut self, e: &io::Error) {
        debug!(session = %self.session.id(), error = %e, "terminal write failed");
        let part = Event::Part { user: Arc::clone(&self.session), reason: format!("error: {e}") };
        let _ = self.events.send(part).await;
        self.session.close();
    }
}

async fn watch_resizes(
    session: Arc<Session>,
    mut resizes: mpsc::UnboundedReceiver<WindowSize>,
    events: mpsc::Sender<Event>,
) {
    loop {
        let window = tokio::select! {
            biased;
            () = session.closed() => return,
            window = resizes.recv() => match window {
                Some(window) => window,
                None => return,
            },
        };

        session.view().resize(window);
        if events.send(Event::NoOp { user: Arc::clone(&session) }).await.is_err() {
            return;
        }
    }
}
