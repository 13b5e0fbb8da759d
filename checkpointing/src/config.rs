/// Checkpointing configuration
/// 
/// Built once at startup and handed to the constructors that need it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Default bitmap width, in validators
pub const DEFAULT_MAX_VALIDATORS: usize = 104;

/// Checkpointing configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointingConfig {
    /// Chain ID, part of the canonical vote-extension sign bytes
    pub chain_id: String,

    /// Maximum validator set size; fixes the checkpoint bitmap width
    pub max_validators: usize,

    /// Vote extensions are only expected above this height (0 disables them)
    pub vote_extensions_enable_height: u64,

    /// RocksDB directory; `None` runs on a temporary database
    pub storage_path: Option<PathBuf>,
}

impl Default for CheckpointingConfig {
    fn default() -> Self {
        Self {
            chain_id: "checkpointing-local".into(),
            max_validators: DEFAULT_MAX_VALIDATORS,
            vote_extensions_enable_height: 1,
            storage_path: None,
        }
    }
}

impl CheckpointingConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_validators == 0 {
            return Err(ConfigError::Invalid("max_validators must be positive".into()));
        }
        if self.chain_id.is_empty() {
            return Err(ConfigError::Invalid("chain_id must not be empty".into()));
        }
        Ok(())
    }

    /// Whether vote extensions are produced and checked at `height`
    pub fn vote_extensions_enabled(&self, height: u64) -> bool {
        self.vote_extensions_enable_height > 0 && height > self.vote_extensions_enable_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CheckpointingConfig::default();
        assert_eq!(config.max_validators, 104);
        assert!(config.validate().is_ok());
        assert!(!config.vote_extensions_enabled(1));
        assert!(config.vote_extensions_enabled(2));
    }

    #[test]
    fn test_disabled_vote_extensions() {
        let config = CheckpointingConfig {
            vote_extensions_enable_height: 0,
            ..Default::default()
        };
        assert!(!config.vote_extensions_enabled(100));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = CheckpointingConfig { max_validators: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = CheckpointingConfig { chain_id: String::new(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"chain_id": "bbn-test", "max_validators": 50}}"#).unwrap();

        let config = CheckpointingConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.chain_id, "bbn-test");
        assert_eq!(config.max_validators, 50);
        assert_eq!(config.vote_extensions_enable_height, 1);
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_from_json_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_validators": 0}}"#).unwrap();
        assert!(CheckpointingConfig::from_json_file(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            CheckpointingConfig::from_json_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
