//! Applies change sets in order under the changelog lock.

mod descriptor;
mod report;

pub use descriptor::{ChangeDescriptor, ChangeFn, ChangeFuture};
pub use report::{ExecutionReport, RunStatus};

use crate::core::{ChangeEntry, MigrationError, Result};
use crate::ledger::ChangeLedger;
use crate::lock::{DistributedLock, LockPolicy, default_holder};
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

pub struct ChangeRunner {
    ledger: ChangeLedger,
    lock: DistributedLock,
    policy: LockPolicy,
    holder: String,
}

impl ChangeRunner {
    pub fn new(ledger: ChangeLedger, lock: DistributedLock, policy: LockPolicy) -> Self {
        Self {
            ledger,
            lock,
            policy,
            holder: default_holder(),
        }
    }

    /// Overrides the identity written into the lock record.
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Runs `descriptors` in the given order.
    ///
    /// Change sets already in the ledger are skipped unless they are
    /// run-always. The first failing change set stops the run; everything
    /// before it stays recorded. The lock is released on every exit path.
    pub async fn execute(&self, descriptors: &[ChangeDescriptor]) -> Result<ExecutionReport> {
        let span = info_span!(
            "changelog.run",
            run_id = %Uuid::new_v4(),
            table = %self.ledger.table(),
            changes = descriptors.len()
        );

        async move {
            let Some(guard) = self.lock.acquire_guard(&self.holder, &self.policy).await? else {
                event!(Level::INFO, "changelog lock not obtained; skipping run");
                return Ok(ExecutionReport::lock_not_obtained());
            };

            let mut report = ExecutionReport::completed();
            let outcome = self.apply_all(descriptors, &mut report).await;
            let released = guard.release().await;

            match (outcome, released) {
                (Ok(()), Ok(())) => {
                    event!(
                        Level::INFO,
                        invoked = report.invoked.len(),
                        skipped = report.skipped.len(),
                        "changelog run completed"
                    );
                    Ok(report)
                }
                (Ok(()), Err(err)) | (Err(err), Ok(())) => Err(err),
                (Err(err), Err(release_err)) => {
                    event!(Level::ERROR, error = %release_err, "changelog lock release failed after run error");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn apply_all(
        &self,
        descriptors: &[ChangeDescriptor],
        report: &mut ExecutionReport,
    ) -> Result<()> {
        for descriptor in descriptors {
            if !descriptor.run_always && !self.ledger.is_new(&descriptor.id).await? {
                event!(Level::DEBUG, change_id = %descriptor.id, "change set already applied");
                report.skipped.push(descriptor.id.clone());
                continue;
            }

            let previous = if descriptor.run_always {
                self.ledger.find(&descriptor.id).await?
            } else {
                None
            };

            self.invoke(descriptor).await?;

            let entry = descriptor
                .to_entry()
                .with_timestamp(next_timestamp(previous.as_ref()));
            self.ledger.record(entry).await?;
            report.invoked.push(descriptor.id.clone());

            event!(
                Level::INFO,
                change_id = %descriptor.id,
                origin = %descriptor.origin,
                unit = %descriptor.unit,
                run_always = descriptor.run_always,
                "change set applied"
            );
        }
        Ok(())
    }

    async fn invoke(&self, descriptor: &ChangeDescriptor) -> Result<()> {
        // The call itself sits inside the future so a panicking constructor is caught too.
        let outcome = AssertUnwindSafe(async { descriptor.invoke().await })
            .catch_unwind()
            .await;

        let source = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => err,
            Err(panic) => anyhow::anyhow!("change set panicked: {}", panic_message(panic.as_ref())),
        };

        event!(Level::ERROR, change_id = %descriptor.id, error = %source, "change set failed");
        Err(MigrationError::ChangeExecutionFailed {
            id: descriptor.id.clone(),
            source,
        })
    }
}

/// Timestamp for a new entry, strictly after the entry it replaces.
fn next_timestamp(previous: Option<&ChangeEntry>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(previous) if now <= previous.timestamp => previous.timestamp + Duration::microseconds(1),
        _ => now,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl std::fmt::Debug for ChangeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeRunner")
            .field("table", &self.ledger.table())
            .field("policy", &self.policy)
            .field("holder", &self.holder)
            .finish()
    }
}
