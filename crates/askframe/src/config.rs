// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::error::{AskError, AskResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pipeline tuning knobs. Loadable from YAML; every field has a default
/// so partial files work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AskConfig {
    /// Generation attempts per query, including the first.
    pub max_attempts: u32,
    /// Wall-clock ceiling for one snippet execution.
    pub timeout_seconds: f64,
    /// Interpreter step budget per execution.
    pub gas_limit: u64,
    /// Top-level statement cap enforced by the validator.
    pub max_statements: usize,
    /// Extra helper names admitted by the validator; each must also be
    /// registered with the executor.
    pub allowlist_extensions: Vec<String>,
    /// When false, the session keeps only the outcome of the final attempt.
    pub record_history: bool,
    /// Sample rows per dataset shown in generation prompts.
    pub sample_rows: usize,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_seconds: 10.0,
            gas_limit: 1_000_000,
            max_statements: 5,
            allowlist_extensions: Vec::new(),
            record_history: true,
            sample_rows: 5,
        }
    }
}

impl AskConfig {
    pub fn from_yaml_str(content: &str) -> AskResult<Self> {
        let config: AskConfig = serde_yaml::from_str(content)
            .map_err(|e| AskError::config(format!("Failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> AskResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> AskResult<()> {
        if self.max_attempts == 0 {
            return Err(AskError::config("max_attempts must be at least 1"));
        }
        if !(self.timeout_seconds > 0.0) {
            return Err(AskError::config("timeout_seconds must be positive"));
        }
        if self.gas_limit == 0 {
            return Err(AskError::config("gas_limit must be positive"));
        }
        if self.max_statements == 0 {
            return Err(AskError::config("max_statements must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AskConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.gas_limit, 1_000_000);
        assert!(config.record_history);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = AskConfig::from_yaml_str("max_attempts: 5\ntimeout_seconds: 2.5\n").unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.timeout_seconds, 2.5);
        assert_eq!(config.max_statements, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AskConfig::from_yaml_str("max_attempts: 0").is_err());
        assert!(AskConfig::from_yaml_str("timeout_seconds: -1.0").is_err());
        assert!(AskConfig::from_yaml_str("gas_limit: 0").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("askframe.yml");
        std::fs::write(&path, "gas_limit: 500\nsample_rows: 2\n").unwrap();
        let config = AskConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.gas_limit, 500);
        assert_eq!(config.sample_rows, 2);
    }

    #[test]
    fn test_extension_list_parses() {
        let config =
            AskConfig::from_yaml_str("allowlist_extensions:\n  - median\n  - stddev\n").unwrap();
        assert_eq!(config.allowlist_extensions, vec!["median", "stddev"]);
    }
}
