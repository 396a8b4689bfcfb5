use serde::Serialize;
use std::fmt;

/// How a run ended, when it did not end in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Every change set was applied or skipped as already applied.
    Completed,
    /// Another process held the changelog lock and the policy allowed skipping.
    SkippedLockNotObtained,
    /// The migrator is switched off in its configuration.
    Disabled,
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Ids invoked and recorded, in execution order.
    pub invoked: Vec<String>,
    /// Ids skipped because the ledger already had them.
    pub skipped: Vec<String>,
    pub status: RunStatus,
}

impl ExecutionReport {
    pub(crate) fn completed() -> Self {
        Self::with_status(RunStatus::Completed)
    }

    pub(crate) fn lock_not_obtained() -> Self {
        Self::with_status(RunStatus::SkippedLockNotObtained)
    }

    pub(crate) fn disabled() -> Self {
        Self::with_status(RunStatus::Disabled)
    }

    fn with_status(status: RunStatus) -> Self {
        Self {
            invoked: Vec::new(),
            skipped: Vec::new(),
            status,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            RunStatus::Completed => write!(
                f,
                "Changelog run completed: {} invoked, {} already applied",
                self.invoked.len(),
                self.skipped.len()
            ),
            RunStatus::SkippedLockNotObtained => {
                write!(f, "Changelog run skipped: lock not obtained")
            }
            RunStatus::Disabled => write!(f, "Changelog run skipped: disabled"),
        }
    }
}
