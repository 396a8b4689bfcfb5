use crate::core::{ChangeEntry, MigrationError, Result};
use crate::storage::ChangelogStore;
use std::sync::Arc;

/// Record of applied change sets, kept in the changelog table.
///
/// Every read is a point lookup on the id; the lock record living in the same
/// table is invisible through this type.
#[derive(Clone)]
pub struct ChangeLedger {
    store: Arc<dyn ChangelogStore>,
    table: String,
}

impl ChangeLedger {
    pub fn new(store: Arc<dyn ChangelogStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns true when no entry with `id` has been recorded.
    pub async fn is_new(&self, id: &str) -> Result<bool> {
        Ok(self.store.get(&self.table, id).await?.is_none())
    }

    /// The recorded entry for `id`, if any.
    pub async fn find(&self, id: &str) -> Result<Option<ChangeEntry>> {
        self.store.get(&self.table, id).await
    }

    /// Upserts `entry`. Re-recording an id replaces the earlier entry.
    pub async fn record(&self, entry: ChangeEntry) -> Result<()> {
        if entry.is_lock() {
            return Err(MigrationError::ReservedChangeId(entry.id));
        }
        self.store.put(&self.table, entry).await
    }

    /// All recorded entries ordered by timestamp, then id. Diagnostics only.
    pub async fn entries(&self) -> Result<Vec<ChangeEntry>> {
        let mut entries: Vec<ChangeEntry> = self
            .store
            .scan(&self.table)
            .await?
            .into_iter()
            .filter(|entry| !entry.is_lock())
            .collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }
}

impl std::fmt::Debug for ChangeLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeLedger")
            .field("table", &self.table)
            .finish()
    }
}
