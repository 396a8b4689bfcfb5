// ============================================================================
// runonce Library
// ============================================================================
//
// Applies change sets to a shared store exactly once each. Concurrent
// processes coordinate through a lock record kept in the same changelog
// table as the ledger, so no external lock service is involved.

pub mod config;
pub mod core;
pub mod discovery;
pub mod ledger;
pub mod lock;
pub mod migrator;
pub mod runner;
pub mod storage;

pub use config::MigratorConfig;
pub use crate::core::{ChangeEntry, LOCK_ID, MigrationError, Result};
pub use discovery::{ChangeLog, ChangeSet, Discovery, ProfileFilter};
pub use ledger::ChangeLedger;
pub use lock::{DistributedLock, LockGuard, LockPolicy, default_holder};
pub use migrator::Migrator;
pub use runner::{ChangeDescriptor, ChangeRunner, ExecutionReport, RunStatus};
pub use storage::{ChangelogStore, ConditionalPut, FileStore, InMemoryStore};
