//! Central fan-out for call failures.
//!
//! An [`ErrorReporter`] logs every reported [`Error`] and hands it to each
//! registered handler. Attach it to a service with
//! `service.interceptors().response().on_error(reporter.observer())`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::Error;

type Handler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Identifies a registered handler for [`ErrorReporter::remove_handler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone, Default)]
pub struct ErrorReporter {
    handlers: Arc<RwLock<Vec<(HandlerId, Handler)>>>,
    next_id: Arc<AtomicU64>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reporter preloaded with warning handlers for authentication,
    /// network, server and client failures.
    pub fn with_default_handlers() -> Self {
        let reporter = Self::new();
        reporter.add_handler(|err| {
            if err.is_auth() {
                #[cfg(feature = "tracing")]
                tracing::warn!(status = ?err.status(), "authentication failed");
            }
        });
        reporter.add_handler(|err| {
            if err.is_network() {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "network unreachable");
            }
        });
        reporter.add_handler(|err| {
            if err.is_server_error() {
                #[cfg(feature = "tracing")]
                tracing::warn!(status = ?err.status(), "server error");
            }
        });
        reporter.add_handler(|err| {
            if err.is_client_error() && !err.is_auth() {
                #[cfg(feature = "tracing")]
                tracing::warn!(status = ?err.status(), "client error");
            }
        });
        reporter
    }

    pub fn add_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns whether a handler was removed.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logs `err` and runs every handler in registration order. A panicking
    /// handler is logged and skipped.
    pub fn report(&self, err: &Error) {
        #[cfg(feature = "tracing")]
        tracing::error!(
            error = %err,
            code = %err.code(),
            status = ?err.status(),
            url = err.config().map(|config| config.url.as_str()),
            method = err.config().map(|config| config.method.as_str()),
            "call failed"
        );

        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(err))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "error handler panicked");
            }
        }
    }

    /// Observer closure for the response-error interceptor list.
    pub fn observer(&self) -> impl Fn(&Error) + Send + Sync + 'static {
        let reporter = self.clone();
        move |err: &Error| reporter.report(err)
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::ErrorReporter;
    use crate::{AbortReason, Error};

    fn recorder(reporter: &ErrorReporter, label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> super::HandlerId {
        let log = Arc::clone(log);
        reporter.add_handler(move |err| log.lock().unwrap().push(format!("{label}:{}", err.code())))
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let reporter = ErrorReporter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&reporter, "first", &log);
        recorder(&reporter, "second", &log);

        reporter.report(&Error::timeout(5));

        assert_eq!(*log.lock().unwrap(), ["first:ERR_TIMEOUT", "second:ERR_TIMEOUT"]);
    }

    #[test]
    fn removed_handler_no_longer_runs() {
        let reporter = ErrorReporter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = recorder(&reporter, "first", &log);
        recorder(&reporter, "second", &log);

        assert!(reporter.remove_handler(first));
        assert!(!reporter.remove_handler(first));
        reporter.report(&Error::aborted(AbortReason::User));

        assert_eq!(reporter.len(), 1);
        assert_eq!(*log.lock().unwrap(), ["second:ERR_CANCELED"]);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_rest() {
        let reporter = ErrorReporter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        reporter.add_handler(|_| panic!("handler bug"));
        recorder(&reporter, "after", &log);

        reporter.report(&Error::network("reset"));

        assert_eq!(*log.lock().unwrap(), ["after:ERR_NETWORK"]);
    }

    #[test]
    fn clones_share_handlers_and_observer_forwards() {
        let reporter = ErrorReporter::with_default_handlers();
        assert_eq!(reporter.len(), 4);

        let log = Arc::new(Mutex::new(Vec::new()));
        let clone = reporter.clone();
        recorder(&clone, "shared", &log);

        let observer = reporter.observer();
        observer(&Error::build("bad header"));

        assert_eq!(reporter.len(), 5);
        assert_eq!(*log.lock().unwrap(), ["shared:ERR_BUILD"]);
    }
}
