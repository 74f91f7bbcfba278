//! Engine configuration, loadable from JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::impact::ImpactConfig;
#[cfg(feature = "persistent")]
use crate::storage::persistent::PersistentConfig;

/// Top-level configuration for a [`ComplianceEngine`](crate::ComplianceEngine).
///
/// Every section is optional in JSON; missing fields take their defaults.
///
/// ```
/// use pactgraph::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{"impact": {"max_depth": 6}}"#)?;
/// assert_eq!(config.impact.max_depth, 6);
/// assert!(config.data_dir.is_none());
/// # Ok::<(), pactgraph::error::ValidationError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory of the durable store. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    #[cfg(feature = "persistent")]
    pub storage: PersistentConfig,
    pub impact: ImpactConfig,
    /// Rule file loaded when the engine is built from this config.
    pub rules_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Validates every section.
    ///
    /// # Errors
    /// The first invalid section's error.
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        #[cfg(feature = "persistent")]
        {
            self.storage = self.storage.validate()?;
        }
        #[cfg(not(feature = "persistent"))]
        {
            if let Some(dir) = &self.data_dir {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("data_dir {} requires the `persistent` feature", dir.display()),
                });
            }
        }
        self.impact = self.impact.validate()?;
        Ok(self)
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    /// Malformed JSON or an invalid section.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::Parse {
            what: "engine config".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    /// Unreadable file, malformed JSON or an invalid section.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ValidationError::Parse {
            what: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }
}
