//! Primary durable tier: one JSON file per slot under a private directory.
//!
//! Writes go to a uniquely named `.staging` file, are fsynced, then renamed
//! over the destination, so a crash never leaves a half-written record.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{check_slot, StorageBackend};
use crate::error::StoreError;

pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn slot_path(&self, slot: &str) -> PathBuf {
        self.root.join(format!("{slot}.json"))
    }

    async fn ensure_root(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).await?;
        restrict_dir_permissions(&self.root).await;
        cleanup_staging(&self.root).await;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn read(&self, slot: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_slot(slot)?;
        match fs::read(self.slot_path(slot)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::unavailable(self.name(), e)),
        }
    }

    async fn write(&self, slot: &str, data: &[u8]) -> Result<(), StoreError> {
        check_slot(slot)?;
        self.ensure_root().await?;
        let dest = self.slot_path(slot);
        let staging = self.root.join(format!(".{}.staging", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&staging).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&staging, &dest).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        fsync_dir(&self.root).await?;
        debug!(path = %dest.display(), "identity record written");
        Ok(())
    }

    async fn remove(&self, slot: &str) -> Result<(), StoreError> {
        check_slot(slot)?;
        match fs::remove_file(self.slot_path(slot)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::unavailable(self.name(), e)),
        }
    }
}

async fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Remove leftover `.staging` files from an interrupted write.
async fn cleanup_staging(root: &Path) {
    let Ok(mut entries) = fs::read_dir(root).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().ends_with(".staging") {
            warn!(path = %entry.path().display(), "removing orphaned staging file");
            let _ = fs::remove_file(entry.path()).await;
        }
    }
}

async fn fsync_dir(path: &Path) -> Result<(), StoreError> {
    #[cfg(unix)]
    {
        let dir = fs::File::open(path).await?;
        dir.sync_all().await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
