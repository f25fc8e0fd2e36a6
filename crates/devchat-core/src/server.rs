//! Server lifecycle: accepting connections, admitting sessions, shutdown.
//!
//! [`ChatServer::start`] spawns the dispatcher and an accept loop and hands
//! back a [`ServerHandle`]. Each accepted connection is admitted on its own
//! task under a fault boundary: credential and ban checks, a name claim, the
//! Join, and then the session's own tasks until it closes.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    bans::BanStore,
    config::ChatConfig,
    dispatcher::Dispatcher,
    env::Environment,
    error::{ConfigError, Rejection},
    event::Event,
    fault, render,
    roster::Roster,
    session::{Identity, Session, SessionId},
    session_loop::{SessionLoop, report_fault},
    transport::{Closer, Connection, LineReader, Listener, Terminal},
};

/// Bound of the global event queue feeding the dispatcher.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Pause after a failed accept before trying again.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A configured chat server, not yet running.
pub struct ChatServer<L, B, E> {
    listener: L,
    bans: B,
    env: E,
    config: ChatConfig,
}

impl<L, B, E> ChatServer<L, B, E>
where
    L: Listener,
    B: BanStore,
    E: Environment,
{
    /// Create a server over a listener, ban list and environment.
    pub fn new(listener: L, bans: B, env: E, config: ChatConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { listener, bans, env, config })
    }

    /// Spawn the dispatcher and the accept loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> ServerHandle {
        let Self { listener, bans, env, config } = self;

        let roster = Arc::new(Roster::new());
        let (events, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let dispatcher =
            Dispatcher::new(env.clone(), config.clone(), Arc::clone(&roster), bans.clone());
        let accepting = dispatcher.accepting();
        let dispatcher = tokio::spawn(dispatcher.run(events_rx));

        let admission = Arc::new(Admission {
            roster: Arc::clone(&roster),
            bans,
            events: events.clone(),
            accepting: accepting.clone(),
            config,
        });
        let acceptor = tokio::spawn(accept_loop(listener, admission, env, accepting));

        info!("server started");
        ServerHandle { events, roster, dispatcher, acceptor }
    }
}

/// Running server.
pub struct ServerHandle {
    events: mpsc::Sender<Event>,
    roster: Arc<Roster>,
    dispatcher: JoinHandle<()>,
    acceptor: JoinHandle<()>,
}

impl ServerHandle {
    /// Live sessions.
    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    /// Broadcast a server notice to every session.
    ///
    /// Returns `false` if the event loop has already stopped.
    pub async fn announce(&self, text: impl Into<String>) -> bool {
        self.events.send(Event::System { text: text.into() }).await.is_ok()
    }

    /// Shut down and wait until the event loop has drained.
    ///
    /// Sessions get a Shutdown notice and the configured grace period, then
    /// are closed; the ban list is saved; the accept loop stops.
    pub async fn shutdown(self) {
        if self.events.send(Event::Shutdown).await.is_err() {
            debug!("event loop already stopped");
        }
        if let Err(e) = self.dispatcher.await {
            error!(error = %e, "event loop task failed");
        }
        if let Err(e) = self.acceptor.await {
            error!(error = %e, "accept task failed");
        }
        info!("server stopped");
    }
}

async fn accept_loop<L, B, E>(
    mut listener: L,
    admission: Arc<Admission<B>>,
    env: E,
    mut accepting: watch::Receiver<bool>,
) where
    L: Listener,
    B: BanStore,
    E: Environment,
{
    let mut next_id = 0u64;
    loop {
        let connection = tokio::select! {
            biased;
            () = stopped(&mut accepting) => break,
            accepted = listener.accept() => match accepted {
                Ok(Some(connection)) => connection,
                Ok(None) => {
                    info!("listener closed");
                    break;
                },
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    env.sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                },
            },
        };

        next_id += 1;
        let admission = Arc::clone(&admission);
        tokio::spawn(admission.serve(SessionId(next_id), connection));
    }
    debug!("stopped accepting");
}

/// Resolves once the dispatcher stops accepting or is gone.
async fn stopped(accepting: &mut watch::Receiver<bool>) {
    loop {
        let open = *accepting.borrow_and_update();
        if !open || accepting.changed().await.is_err() {
            return;
        }
    }
}

/// Shared state for admitting connections.
struct Admission<B> {
    roster: Arc<Roster>,
    bans: B,
    events: mpsc::Sender<Event>,
    accepting: watch::Receiver<bool>,
    config: ChatConfig,
}

impl<B: BanStore> Admission<B> {
    async fn serve<R, T>(self: Arc<Self>, id: SessionId, connection: Connection<R, T>)
    where
        R: LineReader,
        T: Terminal,
    {
        if let Err(fault) = fault::catch(self.admit(id, connection)).await {
            report_fault(&self.events, &self.roster, None, &fault).await;
        }
    }

    async fn admit<R, T>(&self, id: SessionId, connection: Connection<R, T>)
    where
        R: LineReader,
        T: Terminal,
    {
        let Connection {
            credential,
            remote_addr,
            requested_name,
            reader,
            mut terminal,
            window,
            resizes,
            closer,
        } = connection;

        let Some(credential) = credential else {
            reject(&mut terminal, closer.as_ref(), &Rejection::MissingCredential).await;
            return;
        };
        let identity = Identity::from_credential(&credential);
        info!(
            name = %requested_name,
            identity = identity.short(),
            addr = %remote_addr,
            "connection"
        );

        if self.bans.contains(identity.as_str()) {
            reject(&mut terminal, closer.as_ref(), &Rejection::Banned).await;
            return;
        }
        if !*self.accepting.borrow() {
            reject(&mut terminal, closer.as_ref(), &Rejection::Closed).await;
            return;
        }
        if let Err(rejection) = self.roster.claim(&requested_name) {
            reject(&mut terminal, closer.as_ref(), &rejection).await;
            return;
        }

        let (session, inbox) = Session::new(
            id,
            identity,
            requested_name,
            remote_addr,
            closer,
            self.config.scrollback,
            self.config.queue_capacity,
        );
        session.view().resize(window);
        debug!(
            id = session.id().0,
            name = session.name(),
            identity = session.identity().short(),
            addr = session.addr(),
            "session admitted"
        );

        if self.events.send(Event::Join { user: Arc::clone(&session) }).await.is_err() {
            self.roster.release(session.name());
            session.close();
            return;
        }

        SessionLoop {
            session,
            inbox,
            reader,
            terminal,
            resizes,
            events: self.events.clone(),
            roster: Arc::clone(&self.roster),
            max_message_len: self.config.max_message_len,
        }
        .run()
        .await;
    }
}

/// Tell the client why it was turned away and close the connection.
async fn reject<T: Terminal>(terminal: &mut T, closer: &dyn Closer, rejection: &Rejection) {
    info!(reason = %rejection, "rejected connection");
    if let Err(e) = terminal.write(&render::notice(&rejection.client_message())).await {
        debug!(error = %e, "could not deliver rejection");
    }
    closer.close();
}
