//! Panic capture for session tasks.
//!
//! A panic inside one session must not take the process down or stall the
//! dispatcher. [`catch`] runs a future and turns a panic into a [`Fault`]
//! carrying the panic message and the backtrace of the panicking thread.
//!
//! The backtrace is captured by a process-wide panic hook, installed once,
//! that only records while a guarded future is being polled on the current
//! thread. Panics outside a guarded future go to the previous hook untouched.

use std::{
    any::Any,
    backtrace::Backtrace,
    cell::{Cell, RefCell},
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::pin,
    sync::Once,
};

use futures::FutureExt;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// A panic recovered from a session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    message: String,
    backtrace: String,
}

impl Fault {
    /// Panic payload rendered as text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Backtrace of the panicking thread, empty if none was captured.
    pub fn backtrace(&self) -> &str {
        &self.backtrace
    }

    /// Notice broadcast to the room when a session faults.
    pub fn report(&self) -> String {
        format!("Recovered from panic: {}, stack: {}", self.message, self.backtrace)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl std::error::Error for Fault {}

/// Run `future`, converting a panic into a [`Fault`].
pub async fn catch<F>(future: F) -> Result<F::Output, Fault>
where
    F: Future,
{
    install_hook();

    let mut future = pin!(future);
    let guarded = std::future::poll_fn(move |cx| {
        let _capturing = CapturingScope::enter();
        future.as_mut().poll(cx)
    });

    match AssertUnwindSafe(guarded).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(payload) => Err(Fault {
            message: payload_message(payload.as_ref()),
            backtrace: LAST_BACKTRACE.with_borrow_mut(Option::take).unwrap_or_default(),
        }),
    }
}

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.get() {
                let backtrace = Backtrace::force_capture().to_string();
                LAST_BACKTRACE.with_borrow_mut(|slot| *slot = Some(backtrace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Marks the current thread as polling a guarded future. Restores the
/// previous state on drop, including during unwinding.
struct CapturingScope {
    previous: bool,
}

impl CapturingScope {
    fn enter() -> Self {
        Self { previous: CAPTURING.replace(true) }
    }
}

impl Drop for CapturingScope {
    fn drop(&mut self) {
        CAPTURING.set(self.previous);
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
