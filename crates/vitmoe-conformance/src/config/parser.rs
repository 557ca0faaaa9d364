use std::path::Path;

use crate::config::types::ConformanceConfig;
use crate::error::HarnessError;

/// Parse a YAML configuration file into a [`ConformanceConfig`].
///
/// # Errors
///
/// Returns [`HarnessError::Io`] if the file cannot be read,
/// or [`HarnessError::Yaml`] if the YAML is malformed.
pub fn parse_config(path: &Path) -> Result<ConformanceConfig, HarnessError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse a configuration from a YAML string. An empty document yields the
/// canonical configuration.
pub fn parse_config_str(yaml: &str) -> Result<ConformanceConfig, HarnessError> {
    if yaml.trim().is_empty() {
        return Ok(ConformanceConfig::default());
    }
    let config: ConformanceConfig = serde_yaml::from_str(yaml)?;
    Ok(config)
}
