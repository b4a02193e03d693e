//! Engine configuration.
//!
//! Every field has a default, so a partial (or empty) JSON object is a
//! valid configuration:
//!
//! ```
//! use beltline_logic::config::{validate_config, EngineConfig};
//!
//! let config = EngineConfig::from_json(r#"{ "page_size": 10 }"#).unwrap();
//! assert_eq!(config.page_size, 10);
//! assert!(validate_config(&config).is_empty());
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::feed::SortSpec;

/// Seven days, in network-time seconds.
pub const DEFAULT_AGREEMENT_NOTICE_WINDOW: u64 = 7 * 24 * 3600;
pub const DEFAULT_PAGE_SIZE: usize = 25;
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Action items per page.
    pub page_size: usize,
    /// Lot agreements ending within this many seconds of network time are
    /// surfaced as action items.
    pub agreement_notice_window: u64,
    /// Initial sort of paged action item views.
    pub default_sort: SortSpec,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            agreement_notice_window: DEFAULT_AGREEMENT_NOTICE_WINDOW,
            default_sort: SortSpec::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        let errors = validate_config(&config);
        if !errors.is_empty() {
            let detail: Vec<String> = errors.iter().map(|e| format!("{:?}", e)).collect();
            return Err(EngineError::InvalidConfig(detail.join(", ")));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }
}

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroPageSize,
    PageSizeTooLarge(usize),
    /// A zero window never surfaces an agreement before it ends.
    ZeroNoticeWindow,
}

/// Validate a configuration, returning all errors found.
pub fn validate_config(config: &EngineConfig) -> Vec<ConfigError> {
    let mut errors = Vec::new();

    if config.page_size == 0 {
        errors.push(ConfigError::ZeroPageSize);
    }
    if config.page_size > MAX_PAGE_SIZE {
        errors.push(ConfigError::PageSizeTooLarge(config.page_size));
    }
    if config.agreement_notice_window == 0 {
        errors.push(ConfigError::ZeroNoticeWindow);
    }

    errors
}
