use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{AbortReason, AbortToken};

struct PendingEntry {
    owner: u64,
    token: AbortToken,
}

/// In-flight calls keyed by their dedup signature (`url+METHOD`).
///
/// Holds at most one live entry per signature: claiming a signature that is
/// already present aborts the previous holder before the new one is stored.
#[derive(Default)]
pub struct PendingRegistry {
    entries: Mutex<HashMap<String, PendingEntry>>,
    next_owner: AtomicU64,
}

impl std::fmt::Debug for PendingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.lock().contains_key(signature)
    }

    /// Registers `token` under `signature`, superseding any live holder.
    ///
    /// The returned guard removes the entry when dropped, but only while the
    /// entry still belongs to it.
    pub(crate) fn claim(&self, signature: impl Into<String>, token: AbortToken) -> PendingGuard<'_> {
        let signature = signature.into();
        let owner = self.next_owner.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        if let Some(previous) = entries.remove(&signature) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%signature, "superseding in-flight request");
            previous.token.abort(AbortReason::Superseded);
        }
        entries.insert(signature.clone(), PendingEntry { owner, token });
        PendingGuard {
            registry: self,
            signature,
            owner,
        }
    }

    fn release(&self, signature: &str, owner: u64) {
        let mut entries = self.lock();
        if entries
            .get(signature)
            .is_some_and(|entry| entry.owner == owner)
        {
            entries.remove(signature);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a registry entry alive for the duration of one call.
#[must_use]
pub(crate) struct PendingGuard<'a> {
    registry: &'a PendingRegistry,
    signature: String,
    owner: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.signature, self.owner);
    }
}
