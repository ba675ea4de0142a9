//! Session configuration
//!
//! Every field has a default matching the reference guest, so an empty JSON
//! object is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Hard limit of a 32-bit linear memory, in pages.
pub const MAX_HEAP_PAGES: u32 = 65_536;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Arena size in 64 KiB pages. Fixed for the whole session.
    pub heap_pages: u32,
    /// Guest steps executed per scheduler batch.
    pub steps_per_batch: usize,
    /// Pause between batches in milliseconds. Zero only yields.
    pub frame_interval_ms: u64,
    /// Written to the output sink when the session starts.
    pub banner: Option<String>,
    pub exports: ExportNames,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            heap_pages: 4096,
            steps_per_batch: 400,
            frame_interval_ms: 16,
            banner: Some("Neko Basic Version 0.00.00\nOK\n".to_string()),
            exports: ExportNames::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heap_pages == 0 || self.heap_pages >= MAX_HEAP_PAGES {
            return Err(ConfigError::Invalid(format!(
                "heap_pages must be between 1 and {}, got {}",
                MAX_HEAP_PAGES - 1,
                self.heap_pages
            )));
        }
        if self.steps_per_batch == 0 {
            return Err(ConfigError::Invalid("steps_per_batch must be positive".into()));
        }
        Ok(())
    }

    pub fn heap_bytes(&self) -> usize {
        self.heap_pages as usize * crate::runtime::PAGE_SIZE
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Names of the guest's exported entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportNames {
    pub malloc: String,
    pub initialize: String,
    pub set_source: String,
    pub execute_one_step: String,
    pub register_function: String,
    /// Optional heap setup `(base, size)`, called before initialize when
    /// exported together with `heap_base`.
    pub setup_heap: Option<String>,
    pub heap_base: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            malloc: "NekoBasicMalloc".to_string(),
            initialize: "NekoBasicInitialize".to_string(),
            set_source: "NekoBasicSetSource".to_string(),
            execute_one_step: "NekoBasicExecuteOneStep".to_string(),
            register_function: "NekoBasicRegisterExtFunction".to_string(),
            setup_heap: Some("_Z9setupHeapPvm".to_string()),
            heap_base: "__heap_base".to_string(),
        }
    }
}
