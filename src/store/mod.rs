//! Persistence layer: versioned state document, migrations, and the
//! file-backed store implementation.

pub mod error;
pub mod file;
pub mod state;

pub use error::{StorageError, StorageResult};
pub use file::FileStateStore;
pub use state::{PersistedState, SCHEMA_VERSION, StateStore};
