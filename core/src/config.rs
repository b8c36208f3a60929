use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::CoreError;

/// Which record types a run writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_enabled")]
    pub import_sms: bool,
    #[serde(default = "default_enabled")]
    pub import_mms: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            import_sms: true,
            import_mms: true,
        }
    }
}

impl ImportConfig {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidArgument(format!("config read failed ({}): {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CoreError> {
        toml::from_str(raw).map_err(|e| CoreError::InvalidArgument(format!("config parse failed: {}", e)))
    }
}
