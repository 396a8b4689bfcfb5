use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved id of the changelog lock record.
///
/// Change sets may never use it; discovery and the ledger both reject it.
pub const LOCK_ID: &str = "LOCK";

/// One record in the changelog table.
///
/// Ordinary entries mark an applied change set. The single entry keyed by
/// [`LOCK_ID`] is the process lock, and its `author` names the holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub origin_name: String,
    #[serde(default)]
    pub unit_name: String,
}

impl ChangeEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            timestamp: Utc::now(),
            origin_name: String::new(),
            unit_name: String::new(),
        }
    }

    /// The lock record for `holder`.
    pub fn lock(holder: impl Into<String>) -> Self {
        Self::new(LOCK_ID, holder)
    }

    pub fn with_origin(mut self, origin_name: impl Into<String>) -> Self {
        self.origin_name = origin_name.into();
        self
    }

    pub fn with_unit(mut self, unit_name: impl Into<String>) -> Self {
        self.unit_name = unit_name.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_lock(&self) -> bool {
        self.id == LOCK_ID
    }
}

impl fmt::Display for ChangeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[ChangeSet: id={}, author={}, timestamp={}, origin={}, unit={}]",
            self.id,
            self.author,
            self.timestamp.to_rfc3339(),
            self.origin_name,
            self.unit_name
        )
    }
}
