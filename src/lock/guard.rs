use super::DistributedLock;
use crate::core::Result;
use tracing::{Level, event};

/// Scoped ownership of the changelog lock.
///
/// Call [`release`](LockGuard::release) to give the lock back and observe the
/// result. A guard dropped without release (the owning future was cancelled,
/// or a caller bailed out early) schedules the delete on the current tokio
/// runtime instead; outside a runtime the lock stays held and a warning is
/// logged.
#[must_use = "dropping the guard releases the lock in the background"]
pub struct LockGuard {
    lock: Option<DistributedLock>,
}

impl LockGuard {
    pub(super) fn new(lock: DistributedLock) -> Self {
        Self { lock: Some(lock) }
    }

    /// Releases the lock now.
    pub async fn release(mut self) -> Result<()> {
        match self.lock.take() {
            Some(lock) => lock.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                event!(
                    Level::WARN,
                    table = %lock.table(),
                    "lock guard dropped without release; releasing in background"
                );
                handle.spawn(async move {
                    if let Err(err) = lock.release().await {
                        event!(Level::ERROR, error = %err, "background changelog lock release failed");
                    }
                });
            }
            Err(_) => {
                event!(
                    Level::ERROR,
                    table = %lock.table(),
                    "lock guard dropped outside a runtime; changelog lock left held"
                );
            }
        }
    }
}
