//! Directory-backed changelog store shared between processes.
//!
//! Layout: `<root>/<table>/<hex(id)>.entry`, each file holding one
//! MessagePack-encoded [`ChangeEntry`]. Ids whose hex form would not fit in a
//! file name are stored as `sha256-<hex(digest)>.entry`; the id inside the
//! file is checked on every access, so a digest clash surfaces as an error.
//! Writers never expose a partially written file: content goes to a temp file
//! in the table directory first, then is renamed (upsert) or hard-linked
//! (insert-if-absent) into place.

use super::engine::{ChangelogStore, ConditionalPut};
use crate::core::{ChangeEntry, MigrationError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;

const ENTRY_EXTENSION: &str = "entry";

/// Longest hex-encoded id kept verbatim in a file name.
const MAX_HEX_NAME_LEN: usize = 200;

const DIGEST_NAME_PREFIX: &str = "sha256-";

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            MigrationError::StoreUnavailable(format!(
                "Failed to create store root '{}': {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `table`. The name must be a single plain path component,
    /// so no table can reach outside the store root.
    fn table_dir(&self, table: &str) -> Result<PathBuf> {
        let mut components = Path::new(table).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == OsStr::new(table) => {
                Ok(self.root.join(table))
            }
            _ => Err(MigrationError::Configuration(format!(
                "Invalid table name '{}': must be a single directory name",
                table
            ))),
        }
    }

    async fn existing_table_dir(&self, table: &str) -> Result<PathBuf> {
        let dir = self.table_dir(table)?;
        if is_dir(&dir).await? {
            Ok(dir)
        } else {
            Err(MigrationError::TableNotFound(table.to_string()))
        }
    }
}

async fn is_dir(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.is_dir()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error("inspect", path, e)),
    }
}

/// File name for an id. Hex keeps arbitrary ids (slashes, dots) filesystem
/// safe; ids too long for that fall back to a fixed-length digest.
fn entry_file_name(id: &str) -> String {
    let hex_id = hex::encode(id.as_bytes());
    if hex_id.len() <= MAX_HEX_NAME_LEN {
        format!("{}.{}", hex_id, ENTRY_EXTENSION)
    } else {
        let digest = Sha256::digest(id.as_bytes());
        format!("{}{}.{}", DIGEST_NAME_PREFIX, hex::encode(digest), ENTRY_EXTENSION)
    }
}

fn encode(entry: &ChangeEntry) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(entry).map_err(|e| {
        MigrationError::Serialization(format!("Failed to encode entry '{}': {}", entry.id, e))
    })
}

fn decode(path: &Path, data: &[u8]) -> Result<ChangeEntry> {
    rmp_serde::from_slice(data).map_err(|e| {
        MigrationError::Serialization(format!(
            "Failed to decode entry file '{}': {}",
            path.display(),
            e
        ))
    })
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> MigrationError {
    MigrationError::StoreUnavailable(format!("Failed to {} '{}': {}", action, path.display(), err))
}

/// Writes `data` to a synced temp file inside `dir`.
fn staged_file(dir: &Path, data: &[u8]) -> Result<NamedTempFile> {
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| io_error("stage entry in", dir, e))?;
    staged
        .write_all(data)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| io_error("write staged entry", staged.path(), e))?;
    Ok(staged)
}

fn read_file(path: &Path) -> Result<Option<ChangeEntry>> {
    match fs::read(path) {
        Ok(data) => decode(path, &data).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error("read entry", path, e)),
    }
}

/// Reads the entry stored for `id`, failing if the file holds another id.
fn read_entry(path: &Path, id: &str) -> Result<Option<ChangeEntry>> {
    match read_file(path)? {
        Some(entry) if entry.id != id => Err(MigrationError::StoreUnavailable(format!(
            "Entry file '{}' holds id '{}', not '{}'",
            path.display(),
            entry.id,
            id
        ))),
        found => Ok(found),
    }
}

fn write_entry(dir: &Path, entry: &ChangeEntry) -> Result<()> {
    let target = dir.join(entry_file_name(&entry.id));
    // Never replace an entry that belongs to a different id.
    read_entry(&target, &entry.id)?;
    let staged = staged_file(dir, &encode(entry)?)?;
    staged
        .persist(&target)
        .map_err(|e| io_error("persist entry", &target, e.error))?;
    Ok(())
}

fn insert_entry(dir: &Path, entry: &ChangeEntry) -> Result<ConditionalPut> {
    let target = dir.join(entry_file_name(&entry.id));
    let staged = staged_file(dir, &encode(entry)?)?;
    // link(2) fails if the target exists, which gives us the atomic check.
    match fs::hard_link(staged.path(), &target) {
        Ok(()) => Ok(ConditionalPut::Inserted),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            read_entry(&target, &entry.id)?;
            Ok(ConditionalPut::AlreadyExists)
        }
        Err(e) => Err(io_error("insert entry", &target, e)),
    }
}

fn remove_entry(path: &Path, id: &str) -> Result<()> {
    if read_entry(path, id)?.is_none() {
        return Ok(());
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("delete entry", path, e)),
    }
}

fn scan_entries(dir: &Path) -> Result<Vec<ChangeEntry>> {
    let mut entries = Vec::new();
    for item in fs::read_dir(dir).map_err(|e| io_error("list table", dir, e))? {
        let path = item.map_err(|e| io_error("list table", dir, e))?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
            continue;
        }
        // Deleted between listing and reading.
        if let Some(entry) = read_file(&path)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Runs blocking filesystem work off the async worker threads.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MigrationError::StoreUnavailable(format!("Store worker failed: {}", e)))?
}

#[async_trait]
impl ChangelogStore for FileStore {
    async fn get(&self, table: &str, id: &str) -> Result<Option<ChangeEntry>> {
        let path = self.existing_table_dir(table).await?.join(entry_file_name(id));
        let id = id.to_string();
        blocking(move || read_entry(&path, &id)).await
    }

    async fn put(&self, table: &str, entry: ChangeEntry) -> Result<()> {
        let dir = self.existing_table_dir(table).await?;
        blocking(move || write_entry(&dir, &entry)).await
    }

    async fn put_if_absent(&self, table: &str, entry: ChangeEntry) -> Result<ConditionalPut> {
        let dir = self.existing_table_dir(table).await?;
        blocking(move || insert_entry(&dir, &entry)).await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let path = self.existing_table_dir(table).await?.join(entry_file_name(id));
        let id = id.to_string();
        blocking(move || remove_entry(&path, &id)).await
    }

    async fn scan(&self, table: &str) -> Result<Vec<ChangeEntry>> {
        let dir = self.existing_table_dir(table).await?;
        blocking(move || scan_entries(&dir)).await
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        is_dir(&self.table_dir(table)?).await
    }

    async fn create_table(&self, table: &str) -> Result<()> {
        let dir = self.table_dir(table)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("create table", &dir, e))
    }
}
