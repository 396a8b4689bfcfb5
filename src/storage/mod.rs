pub mod engine;
pub mod file;
pub mod memory;
pub mod provision;

pub use engine::{ChangelogStore, ConditionalPut};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use provision::find_or_create_table;
