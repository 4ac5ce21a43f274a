//! Bridge configuration.
//!
//! Every field has a default so a partial JSON file is valid:
//!
//! ```json
//! { "default_module_origin": "synthetic", "heap": { "max_objects": 4096 } }
//! ```

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

pub const DEFAULT_MODULE_ORIGIN: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// `__file__` label used by `ForeignModule::create_default`.
    pub default_module_origin: String,
    /// When `false`, wrapping an error-like instance with a type that lacks
    /// exception slots logs a warning instead of failing.
    pub require_exception_layout: bool,
    pub heap: HeapConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeapConfig {
    /// Ceiling on live foreign objects; `None` means unbounded.
    pub max_objects: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_module_origin: DEFAULT_MODULE_ORIGIN.to_string(),
            require_exception_layout: true,
            heap: HeapConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(text: &str) -> Result<Self, BridgeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let text = fs::read_to_string(path).map_err(|source| BridgeError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}
