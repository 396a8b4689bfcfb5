use super::engine::{ChangelogStore, ConditionalPut};
use crate::core::{ChangeEntry, MigrationError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryTable {
    entries: HashMap<String, ChangeEntry>,
    /// Accepted writes, in order, when the store keeps history.
    history: Vec<ChangeEntry>,
}

impl MemoryTable {
    fn accept(&mut self, entry: ChangeEntry, keep_history: bool) {
        if keep_history {
            self.history.push(entry.clone());
        }
        self.entries.insert(entry.id.clone(), entry);
    }
}

/// Process-local changelog store.
///
/// Each table sits behind its own lock, so `put_if_absent` is atomic for all
/// tasks sharing one instance. Clones share the same tables.
///
/// Write history is off by default; [`with_history`](Self::with_history)
/// turns it on for tests that inspect every write. History is never trimmed.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<HashMap<String, Arc<RwLock<MemoryTable>>>>>,
    keep_history: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep every accepted write, including lock inserts, for [`history`](Self::history).
    pub fn with_history(mut self) -> Self {
        self.keep_history = true;
        self
    }

    /// A store with `table` already provisioned.
    pub async fn with_table(table: &str) -> Result<Self> {
        let store = Self::new();
        store.create_table(table).await?;
        Ok(store)
    }

    async fn get_table(&self, name: &str) -> Result<Arc<RwLock<MemoryTable>>> {
        self.tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| MigrationError::TableNotFound(name.to_string()))
    }

    /// Every write accepted by `table` so far, oldest first. Empty unless the
    /// store was built [`with_history`](Self::with_history).
    pub async fn history(&self, table: &str) -> Result<Vec<ChangeEntry>> {
        let table_handle = self.get_table(table).await?;
        let table = table_handle.read().await;
        Ok(table.history.clone())
    }

    /// Number of live entries in `table`.
    pub async fn entry_count(&self, table: &str) -> Result<usize> {
        let table_handle = self.get_table(table).await?;
        let table = table_handle.read().await;
        Ok(table.entries.len())
    }
}

#[async_trait]
impl ChangelogStore for InMemoryStore {
    async fn get(&self, table: &str, id: &str) -> Result<Option<ChangeEntry>> {
        let table_handle = self.get_table(table).await?;
        let table = table_handle.read().await;
        Ok(table.entries.get(id).cloned())
    }

    async fn put(&self, table: &str, entry: ChangeEntry) -> Result<()> {
        let table_handle = self.get_table(table).await?;
        let mut table = table_handle.write().await;
        table.accept(entry, self.keep_history);
        Ok(())
    }

    async fn put_if_absent(&self, table: &str, entry: ChangeEntry) -> Result<ConditionalPut> {
        let table_handle = self.get_table(table).await?;
        let mut table = table_handle.write().await;
        if table.entries.contains_key(&entry.id) {
            return Ok(ConditionalPut::AlreadyExists);
        }
        table.accept(entry, self.keep_history);
        Ok(ConditionalPut::Inserted)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let table_handle = self.get_table(table).await?;
        let mut table = table_handle.write().await;
        table.entries.remove(id);
        Ok(())
    }

    async fn scan(&self, table: &str) -> Result<Vec<ChangeEntry>> {
        let table_handle = self.get_table(table).await?;
        let table = table_handle.read().await;
        Ok(table.entries.values().cloned().collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.read().await.contains_key(table))
    }

    async fn create_table(&self, table: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default();
        Ok(())
    }
}
