use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error_handling::types::ConfigError;

const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;
const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Runtime parameters of a capture session.
///
/// Loaded from a TOML file with [`CaptureConfig::from_file`]; every key is
/// optional and falls back to [`Default`].
///
/// ```toml
/// passthrough = true
/// read_buffer_size = 4096
/// ```
///
/// # Fields Overview
/// - `passthrough`: when `true`, captured bytes are also written to the real
///   stdout/stderr while the capture runs
/// - `read_buffer_size`: size of the buffer each pump reads into, in bytes
///   (1 to 1 MiB)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub passthrough: bool,
    pub read_buffer_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            passthrough: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl CaptureConfig {
    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CaptureConfig =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size == 0 || self.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(ConfigError::NotInRange(format!(
                "read_buffer_size must be between 1 and {}, got {}",
                MAX_READ_BUFFER_SIZE, self.read_buffer_size
            )));
        }
        Ok(())
    }

    pub fn with_passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }
}
