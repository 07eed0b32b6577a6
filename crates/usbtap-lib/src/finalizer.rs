//! Advisory last-chance cleanup for abrupt termination.
//!
//! The scoped close in [`crate::session::SessionManager::with_session`] is the
//! real guarantee. A [`Finalizer`] covers the case where the process is torn
//! down without unwinding (Ctrl+C, SIGTERM): the session manager arms it with
//! the open handle, and a signal handler calls [`Finalizer::run`], which hands
//! the last armed handle to the installed hook exactly once.
//!
//! Cloning shares state, so the signal handler can hold its own copy.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::native::NativeUsb;
use crate::record::SessionHandle;
use crate::transport::Transport;

type Hook = Box<dyn FnMut(Option<SessionHandle>) + Send>;

#[derive(Default)]
struct Inner {
    armed: Option<SessionHandle>,
    hook: Option<Hook>,
    fired: bool,
    /// Handle passed to the hook when it ran.
    released: Option<SessionHandle>,
}

#[derive(Clone, Default)]
pub struct Finalizer {
    inner: Arc<Mutex<Inner>>,
}

impl Finalizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the cleanup hook. Only the first registration takes effect;
    /// returns `false` if a hook was already installed.
    pub fn install(&self, hook: impl FnMut(Option<SessionHandle>) + Send + 'static) -> bool {
        let mut inner = self.lock();
        if inner.hook.is_some() || inner.fired {
            log::warn!("finalizer hook already installed, ignoring");
            return false;
        }
        inner.hook = Some(Box::new(hook));
        true
    }

    /// Install the usual exit hook for `transport`: close the armed session,
    /// then shut the transport down.
    pub fn install_transport<N>(&self, transport: Arc<Transport<N>>) -> bool
    where
        N: NativeUsb + Send + Sync + 'static,
    {
        self.install(move |armed| {
            if let Some(handle) = armed
                && let Err(kind) = transport.close(&handle)
            {
                log::warn!("closing {handle} on exit failed: {kind}");
            }
            transport.shutdown();
        })
    }

    /// Remember `handle` as the session to close if the process goes down.
    pub fn arm(&self, handle: SessionHandle) {
        self.lock().armed = Some(handle);
    }

    pub fn disarm(&self) {
        self.lock().armed = None;
    }

    pub fn armed(&self) -> Option<SessionHandle> {
        self.lock().armed
    }

    /// Run the hook with the armed handle (if any). Only the first call does
    /// anything; returns whether the hook ran.
    pub fn run(&self) -> bool {
        let (hook, armed) = {
            let mut inner = self.lock();
            if inner.fired {
                return false;
            }
            inner.fired = true;
            let hook = inner.hook.take();
            let armed = inner.armed.take();
            if hook.is_some() {
                inner.released = armed;
            }
            (hook, armed)
        };
        let Some(mut hook) = hook else {
            return false;
        };
        match armed {
            Some(handle) => log::warn!("finalizer: releasing {handle}"),
            None => log::debug!("finalizer: no session open"),
        }
        hook(armed);
        true
    }

    pub fn has_run(&self) -> bool {
        self.lock().fired
    }

    /// The session the hook was given to release, once it has run.
    pub fn released(&self) -> Option<SessionHandle> {
        self.lock().released
    }
}

impl fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Finalizer")
            .field("armed", &inner.armed)
            .field("installed", &inner.hook.is_some())
            .field("fired", &inner.fired)
            .field("released", &inner.released)
            .finish()
    }
}
