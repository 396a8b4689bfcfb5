use crate::core::{ChangeEntry, Result};
use async_trait::async_trait;

/// Outcome of [`ChangelogStore::put_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalPut {
    /// No entry existed under the key; the new entry was written.
    Inserted,
    /// An entry already existed; nothing was written.
    AlreadyExists,
}

/// Storage contract for the changelog table.
///
/// Every operation is a point operation on the entry id, except `scan`, which
/// only diagnostics use. `put_if_absent` must be atomic with respect to every
/// other writer of the same table: the changelog lock is only as sound as
/// this operation.
///
/// Errors are reserved for infrastructure failures. A key collision on
/// `put_if_absent` is a normal outcome, and deleting a missing key succeeds.
#[async_trait]
pub trait ChangelogStore: Send + Sync {
    /// Point lookup by id.
    async fn get(&self, table: &str, id: &str) -> Result<Option<ChangeEntry>>;

    /// Unconditional upsert keyed by `entry.id`.
    async fn put(&self, table: &str, entry: ChangeEntry) -> Result<()>;

    /// Insert only if no entry exists under `entry.id`.
    async fn put_if_absent(&self, table: &str, entry: ChangeEntry) -> Result<ConditionalPut>;

    /// Idempotent point delete.
    async fn delete(&self, table: &str, id: &str) -> Result<()>;

    /// All entries of the table, in no particular order.
    async fn scan(&self, table: &str) -> Result<Vec<ChangeEntry>>;

    /// Check if a table exists
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Create a table; creating an existing table is a no-op.
    async fn create_table(&self, table: &str) -> Result<()>;
}
