pub mod backend;
pub mod memory;
pub mod snapshot;

pub use backend::{ForgeStorage, Result, StorageError, StorageStats};
pub use memory::{MemoryContents, MemoryStorage};
pub use snapshot::{Snapshot, SnapshotMetadata};
