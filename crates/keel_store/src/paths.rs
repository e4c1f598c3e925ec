use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "keel";
pub const APP_NAME: &str = "keel";

/// Environment override for the data directory.
pub const DATA_DIR_ENV: &str = "KEEL_DATA_DIR";

pub fn data_dir() -> Result<PathBuf, crate::StoreError> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or_else(|| {
        crate::StoreError::unavailable("file", "cannot determine data directory")
    })?;
    Ok(dirs.data_dir().to_path_buf())
}
