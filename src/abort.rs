use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio_util::sync::CancellationToken;

/// Why a token was triggered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// The caller invoked `abort()` on its call handle.
    User,
    /// The local timer elapsed and the exchange was superseded by a fresh one.
    Timeout,
    /// A newer identical request replaced this one in the pending registry.
    Superseded,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::User => "cancelled by caller",
            Self::Timeout => "timed out",
            Self::Superseded => "superseded by a newer identical request",
        };
        f.write_str(text)
    }
}

/// Cancellation signal handed to the exchange primitive.
///
/// A token can be observed ([`AbortToken::aborted`]), triggered
/// ([`AbortToken::abort`]) and queried ([`AbortToken::is_aborted`]). Child
/// tokens fire when their parent fires and report the parent's reason.
#[derive(Clone)]
pub struct AbortToken {
    token: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
    parent_reason: Option<Arc<OnceLock<AbortReason>>>,
}

impl fmt::Debug for AbortToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortToken")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

impl Default for AbortToken {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortToken {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
            parent_reason: None,
        }
    }

    /// Creates a token that is triggered together with `self`.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            reason: Arc::new(OnceLock::new()),
            parent_reason: Some(Arc::clone(&self.reason)),
        }
    }

    /// Triggers the token. The first reason recorded wins.
    pub fn abort(&self, reason: AbortReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        if !self.is_aborted() {
            return None;
        }
        self.reason
            .get()
            .or_else(|| self.parent_reason.as_ref().and_then(|parent| parent.get()))
            .copied()
    }

    /// Resolves once the token has been triggered.
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }
}

/// Hands out one token per exchange, all parented by one call-level token.
///
/// Explicit cancellation and dedup supersession trigger the call token and
/// therefore whatever exchange is live; a timeout triggers only the
/// exchange token it belongs to.
#[derive(Debug)]
pub(crate) struct AbortCoordinator {
    call: AbortToken,
    current: Mutex<AbortToken>,
}

impl AbortCoordinator {
    pub(crate) fn new(call: AbortToken) -> Self {
        let current = call.child();
        Self {
            call,
            current: Mutex::new(current),
        }
    }

    pub(crate) fn call_token(&self) -> &AbortToken {
        &self.call
    }

    pub(crate) fn current(&self) -> AbortToken {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Triggers the live exchange token and installs a fresh one.
    pub(crate) fn supersede_current(&self, reason: AbortReason) -> AbortToken {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.abort(reason);
        *current = self.call.child();
        current.clone()
    }
}
