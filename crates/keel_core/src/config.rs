use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use keel_crypto::kdf::PBKDF2_MIN_ITERATIONS;

use crate::error::CoreError;

pub const KEYRING_SERVICE_ENV: &str = "KEEL_KEYRING_SERVICE";
pub const PBKDF2_ITERATIONS_ENV: &str = "KEEL_PBKDF2_ITERATIONS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    /// `None` resolves to the platform data directory (or `KEEL_DATA_DIR`).
    pub data_dir: Option<PathBuf>,
    pub keyring_service: String,
    pub identity_slot: String,
    pub pbkdf2_iterations: u32,
    /// Pixel size of one QR module in the transfer image.
    pub qr_module_size: u32,
    /// Replace an unreadable stored identity with a fresh one instead of
    /// failing `initialize`.
    pub regenerate_on_corrupt: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            keyring_service: "keel".into(),
            identity_slot: "identity".into(),
            pbkdf2_iterations: PBKDF2_MIN_ITERATIONS,
            qr_module_size: 8,
            regenerate_on_corrupt: true,
        }
    }
}

impl CoreConfig {
    /// Read a JSON config file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("read {}: {e}", path.display())))?;
        let config: CoreConfig = serde_json::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KEEL_*` environment overrides.
    pub fn apply_env(mut self) -> Result<Self, CoreError> {
        if let Ok(dir) = std::env::var(keel_store::paths::DATA_DIR_ENV) {
            if !dir.is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(service) = std::env::var(KEYRING_SERVICE_ENV) {
            self.keyring_service = service;
        }
        if let Ok(iterations) = std::env::var(PBKDF2_ITERATIONS_ENV) {
            self.pbkdf2_iterations = iterations.parse().map_err(|_| {
                CoreError::Config(format!("{PBKDF2_ITERATIONS_ENV} must be an integer"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.identity_slot.is_empty() {
            return Err(CoreError::Config("identity_slot must not be empty".into()));
        }
        if self.keyring_service.is_empty() {
            return Err(CoreError::Config("keyring_service must not be empty".into()));
        }
        if self.qr_module_size == 0 {
            return Err(CoreError::Config("qr_module_size must be positive".into()));
        }
        Ok(())
    }

    /// Iteration count actually used; never below the PBKDF2 floor.
    pub fn effective_iterations(&self) -> u32 {
        self.pbkdf2_iterations.max(PBKDF2_MIN_ITERATIONS)
    }

    pub fn resolve_data_dir(&self) -> Result<PathBuf, CoreError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(keel_store::paths::data_dir()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.json");
        std::fs::write(&path, r#"{"keyring_service":"keel-test","qr_module_size":4}"#).unwrap();
        let config = CoreConfig::load(&path).unwrap();
        assert_eq!(config.keyring_service, "keel-test");
        assert_eq!(config.qr_module_size, 4);
        assert_eq!(config.identity_slot, "identity");
        assert!(config.regenerate_on_corrupt);
    }

    #[test]
    fn iteration_floor_enforced() {
        let config = CoreConfig {
            pbkdf2_iterations: 10,
            ..CoreConfig::default()
        };
        assert_eq!(config.effective_iterations(), PBKDF2_MIN_ITERATIONS);
    }

    #[test]
    fn invalid_values_rejected() {
        let config = CoreConfig {
            qr_module_size: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(CoreConfig::load(&path).is_err());
    }
}
