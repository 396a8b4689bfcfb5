pub mod entry;
pub mod error;

pub use entry::{ChangeEntry, LOCK_ID};
pub use error::{MigrationError, Result};
