//! Debounced trigger: coalesce a burst of schedule calls into one delayed
//! action, cancelling superseded timers.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use {tokio_util::sync::CancellationToken, tracing::trace};

type Action = Arc<dyn Fn() + Send + Sync>;

/// One trigger class: at most one pending timer at any instant. Scheduling
/// supersedes the pending timer; cancellation always wins over a timer whose
/// deadline has not fired yet.
pub struct DebouncedTrigger {
    action: Action,
    pending: Mutex<Option<CancellationToken>>,
}

impl DebouncedTrigger {
    pub fn new(action: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            action: Arc::new(action),
            pending: Mutex::new(None),
        })
    }

    /// Arm (or re-arm) the timer. Any pending timer is cancelled first, so a
    /// burst of calls within the window fires the action exactly once.
    pub fn schedule(&self, delay: Duration) {
        let token = CancellationToken::new();
        let superseded = self
            .lock_pending()
            .replace(token.clone());
        if let Some(old) = superseded {
            old.cancel();
        }

        let action = Arc::clone(&self.action);
        tokio::spawn(async move {
            tokio::select! {
                // Biased so a cancellation requested before the deadline can
                // never race into a spurious invocation.
                biased;
                () = token.cancelled() => {
                    trace!("debounce timer superseded");
                },
                () = tokio::time::sleep(delay) => {
                    (action)();
                },
            }
        });
    }

    /// Cancel the pending timer, if any, without invoking the action.
    pub fn cancel_all(&self) {
        if let Some(token) = self.lock_pending().take() {
            token.cancel();
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
