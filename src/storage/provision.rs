use super::engine::ChangelogStore;
use crate::core::Result;
use log::info;

/// Makes sure the changelog table exists, creating it when missing.
///
/// Runs once at startup, before any lock or ledger traffic.
pub async fn find_or_create_table(store: &dyn ChangelogStore, table: &str) -> Result<()> {
    info!("Searching for an existing changelog table '{}'; please wait...", table);

    if store.table_exists(table).await? {
        info!("Changelog table '{}' found", table);
        return Ok(());
    }

    info!("Attempting to create changelog table '{}'; please wait...", table);
    store.create_table(table).await?;
    info!("Changelog table '{}' created", table);
    Ok(())
}
