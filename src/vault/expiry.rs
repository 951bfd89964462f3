// Keyvault — Expiry Registry
//
// One pending timer per key name. The registry lock is held by the vault
// across store writes, so replacing or deleting a key and cancelling its
// timer happen as one step with respect to a timer that is about to fire.
// Shutting the registry down stops every timer, including one that is
// already waiting for the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::AbortHandle;

use crate::store::DurableStore;

#[derive(Debug)]
pub(crate) struct Timer {
    id: u64,
    handle: AbortHandle,
}

pub(crate) type Timers = HashMap<String, Timer>;

#[derive(Debug, Clone)]
pub(crate) struct ExpiryRegistry {
    timers: Arc<Mutex<Timers>>,
    next_id: Arc<AtomicU64>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ExpiryRegistry {
    pub(crate) fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            timers: Arc::default(),
            next_id: Arc::default(),
            shutdown: Arc::new(shutdown),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().await
    }

    /// Abort the pending timer for `name`, if any. Returns whether one existed.
    pub(crate) fn cancel(timers: &mut Timers, name: &str) -> bool {
        match timers.remove(name) {
            Some(timer) => {
                timer.handle.abort();
                tracing::debug!(key = %name, timer = timer.id, "Expiry cancelled");
                true
            }
            None => false,
        }
    }

    /// Start a timer that removes `name` from `store` after `ttl`.
    ///
    /// The caller holds the registry lock (`timers`) and has already
    /// cancelled any previous timer for the name.
    pub(crate) fn schedule<S: DurableStore>(
        &self,
        timers: &mut Timers,
        name: &str,
        ttl: Duration,
        store: Arc<S>,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = self.clone();
        let key = name.to_string();
        let mut shutdown = self.shutdown.subscribe();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(ttl) => registry.fire(&key, id, store.as_ref()).await,
                _ = async { let _ = shutdown.wait_for(|stopped| *stopped).await; } => {
                    tracing::debug!(key = %key, timer = id, "Expiry stopped by shutdown");
                }
            }
        });

        if let Some(previous) = timers.insert(
            name.to_string(),
            Timer {
                id,
                handle: task.abort_handle(),
            },
        ) {
            previous.handle.abort();
        }
        tracing::debug!(key = %name, timer = id, ttl = ?ttl, "Expiry scheduled");
    }

    /// Stop every pending timer without waiting for the lock.
    ///
    /// Sleeping timers wake on the shutdown signal and exit. A timer already
    /// queued on the lock sees the signal once it gets the lock and does
    /// nothing. When the lock is free the timers are also aborted and the
    /// map is cleared right away.
    pub(crate) fn shutdown(&self) {
        self.shutdown.send_replace(true);

        if let Ok(mut timers) = self.timers.try_lock() {
            for (_, timer) in timers.drain() {
                timer.handle.abort();
            }
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn fire<S: DurableStore>(&self, name: &str, id: u64, store: &S) {
        let mut timers = self.timers.lock().await;
        if self.is_shut_down() {
            return;
        }

        // A timer that lost the race with cancel or reschedule must not act.
        match timers.get(name) {
            Some(timer) if timer.id == id => {
                timers.remove(name);
            }
            _ => {
                tracing::debug!(key = %name, timer = id, "Stale expiry ignored");
                return;
            }
        }

        match store.remove(name).await {
            Ok(Some(_)) => tracing::info!(key = %name, "Key expired"),
            Ok(None) => tracing::debug!(key = %name, "Expired key was already gone"),
            Err(e) => tracing::warn!(key = %name, error = %e, "Failed to remove expired key"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
