use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Lock unobtainable: {0}")]
    LockUnobtainable(String),

    #[error("Change set '{id}' failed: {source}")]
    ChangeExecutionFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Duplicated change set id found: '{0}'")]
    DuplicateChangeId(String),

    #[error("Change set id '{0}' is reserved for the changelog lock")]
    ReservedChangeId(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MigrationError {
    /// The change set id carried by execution failures.
    pub fn change_id(&self) -> Option<&str> {
        match self {
            Self::ChangeExecutionFailed { id, .. } => Some(id),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
