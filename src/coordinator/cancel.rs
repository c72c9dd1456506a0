use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Holder for a sensor's current hold/decay cancellation token.
///
/// [`renew`](CancelSlot::renew) swaps in a fresh token and cancels the one
/// it replaces in the same critical section, so at most one live token
/// exists per slot.
#[derive(Debug, Default)]
pub struct CancelSlot {
    current: Mutex<Option<CancellationToken>>,
}

impl CancelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new token, cancelling its predecessor.
    pub fn renew(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let mut current = self.current.lock();
        if let Some(previous) = current.replace(fresh.clone()) {
            previous.cancel();
        }
        fresh
    }

    /// Cancel and drop the current token, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
    }

    /// True while an uncancelled token is held.
    pub fn is_armed(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}
