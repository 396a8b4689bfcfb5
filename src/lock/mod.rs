//! Changelog lock kept as a reserved record in the changelog table.
//!
//! Mutual exclusion rests entirely on the store's insert-if-absent: whoever
//! inserts the [`LOCK_ID`](crate::core::LOCK_ID) record holds the lock until
//! that record is deleted. There is no lease; a holder that dies without
//! releasing leaves the lock held until an operator releases it.

mod guard;
mod holder;

pub use guard::LockGuard;
pub use holder::default_holder;

use crate::core::{ChangeEntry, LOCK_ID, MigrationError, Result};
use crate::storage::{ChangelogStore, ConditionalPut};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, Level, event, info_span};

/// Lower bound on the pause between attempts, so a zero interval cannot spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How hard to try for the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    /// Poll until `max_wait` elapses instead of giving up after one attempt.
    pub wait_for_lock: bool,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    /// Fail with `LockUnobtainable` rather than returning `false`.
    pub fail_if_unobtainable: bool,
}

impl LockPolicy {
    /// Single attempt, no error when the lock is taken.
    pub fn no_wait() -> Self {
        Self {
            wait_for_lock: false,
            max_wait: Duration::ZERO,
            poll_interval: Duration::ZERO,
            fail_if_unobtainable: false,
        }
    }

    /// Poll every `poll_interval` for up to `max_wait`.
    pub fn waiting(max_wait: Duration, poll_interval: Duration) -> Self {
        Self {
            wait_for_lock: true,
            max_wait,
            poll_interval,
            fail_if_unobtainable: false,
        }
    }

    pub fn fail_if_unobtainable(mut self, fail: bool) -> Self {
        self.fail_if_unobtainable = fail;
        self
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        crate::config::MigratorConfig::default().lock_policy()
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn ChangelogStore>,
    table: String,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn ChangelogStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// One conditional insert of the lock record.
    ///
    /// `Ok(false)` means somebody else holds the lock. Store failures come back
    /// as errors and are never folded into `false`.
    pub async fn try_acquire(&self, holder: &str) -> Result<bool> {
        match self
            .store
            .put_if_absent(&self.table, ChangeEntry::lock(holder))
            .await?
        {
            ConditionalPut::Inserted => {
                event!(Level::INFO, table = %self.table, holder = %holder, "changelog lock acquired");
                Ok(true)
            }
            ConditionalPut::AlreadyExists => {
                event!(Level::WARN, table = %self.table, "the changelog lock has already been acquired");
                Ok(false)
            }
        }
    }

    /// Tries for the lock under `policy`.
    ///
    /// Waiters are not queued: every poll races every other poller, and the
    /// first conditional insert to land wins.
    pub async fn acquire_with_policy(&self, holder: &str, policy: &LockPolicy) -> Result<bool> {
        let span = info_span!(
            "changelog.lock.acquire",
            table = %self.table,
            holder = %holder,
            wait = policy.wait_for_lock
        );

        async move {
            let started = Instant::now();
            let mut acquired = self.try_acquire(holder).await?;
            let mut attempts: u32 = 1;

            if !acquired && policy.wait_for_lock {
                let poll_interval = policy.poll_interval.max(MIN_POLL_INTERVAL);
                while !acquired && started.elapsed() < policy.max_wait {
                    let remaining = policy.max_wait.saturating_sub(started.elapsed());
                    event!(Level::INFO, attempts, "waiting for changelog lock");
                    sleep(poll_interval.min(remaining)).await;
                    acquired = self.try_acquire(holder).await?;
                    attempts += 1;
                }
            }

            if acquired {
                return Ok(true);
            }

            if policy.fail_if_unobtainable {
                event!(Level::ERROR, attempts, "changelog lock not acquired, failing");
                return Err(MigrationError::LockUnobtainable(format!(
                    "Could not acquire process lock on table '{}' after {} attempt(s) in {:?}",
                    self.table,
                    attempts,
                    started.elapsed()
                )));
            }

            event!(Level::INFO, attempts, "changelog lock not acquired");
            Ok(false)
        }
        .instrument(span)
        .await
    }

    /// Like [`acquire_with_policy`](Self::acquire_with_policy), but hands back
    /// a guard that owns the release.
    pub async fn acquire_guard(&self, holder: &str, policy: &LockPolicy) -> Result<Option<LockGuard>> {
        if self.acquire_with_policy(holder, policy).await? {
            Ok(Some(LockGuard::new(self.clone())))
        } else {
            Ok(None)
        }
    }

    /// Deletes the lock record. Releasing a free lock is a no-op.
    pub async fn release(&self) -> Result<()> {
        self.store.delete(&self.table, LOCK_ID).await?;
        event!(Level::INFO, table = %self.table, "changelog lock released");
        Ok(())
    }

    /// Whether the lock record exists. Advisory only.
    pub async fn is_held(&self) -> Result<bool> {
        Ok(self.holder().await?.is_some())
    }

    /// The current lock record: who holds it and since when.
    pub async fn holder(&self) -> Result<Option<ChangeEntry>> {
        self.store.get(&self.table, LOCK_ID).await
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("table", &self.table)
            .finish()
    }
}
