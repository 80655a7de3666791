//! File-based persistence for the application state.
//!
//! The state is a single JSON document written atomically: serialize to a
//! temp file in the same directory, fsync, then rename over the target.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::store::error::{StorageError, StorageResult};
use crate::store::state::{PersistedState, StateStore};

/// File-based implementation of [`StateStore`].
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Create a store that persists to `path`.
    ///
    /// Parent directories are created on the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> StorageResult<Option<PersistedState>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::file_io(&self.path, e)),
        };

        let state: PersistedState = serde_json::from_str(&contents)
            .map_err(|e| StorageError::file_deserialization(&self.path, e.to_string()))?;

        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::file_io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        // Write to temp file first, fsync, then atomic rename.
        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::file_io(&temp_path, e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::file_io(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))?;

        Ok(())
    }
}
