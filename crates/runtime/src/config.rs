// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! cache_line_bytes = 256
//! staging_args_bytes = 512
//! sync_timeout_ms = 5000
//! zero_workspace = false
//! enable_profiling = true
//! ```

use std::path::Path;
use std::time::Duration;

/// Configuration for the execution runtime.
///
/// The cache-line size is policy, not a universal constant: it is the
/// target device's declared line size and governs the minimum transfer
/// granularity of non-contiguous copies and cache-maintenance ranges.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// The target device's cache-line size in bytes. Must be a power
    /// of two.
    #[serde(default = "default_cache_line")]
    pub cache_line_bytes: u64,
    /// Argument buffers up to this size are placed in the staging
    /// memory tier; larger ones go to global device memory.
    #[serde(default = "default_staging_args")]
    pub staging_args_bytes: u32,
    /// Bound on a stream synchronize, in milliseconds. `None` waits
    /// indefinitely. Expiry is reported as a device-call failure; the
    /// outstanding device work is not retracted.
    pub sync_timeout_ms: Option<u64>,
    /// Whether to fill the workspace segment with zeroes at load.
    #[serde(default)]
    pub zero_workspace: bool,
    /// Whether to record per-run execution metrics.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
}

fn default_cache_line() -> u64 {
    256
}

fn default_staging_args() -> u32 {
    512
}

fn default_true() -> bool {
    true
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, super::RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            super::RuntimeError::InvalidArgument(format!(
                "cannot read config '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, super::RuntimeError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            super::RuntimeError::InvalidArgument(format!("TOML parse error: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, super::RuntimeError> {
        toml::to_string_pretty(self).map_err(|e| {
            super::RuntimeError::InvalidArgument(format!("TOML serialise error: {e}"))
        })
    }

    /// Checks the configuration is usable.
    pub fn validate(&self) -> Result<(), super::RuntimeError> {
        if !self.cache_line_bytes.is_power_of_two() {
            return Err(super::RuntimeError::InvalidArgument(format!(
                "cache_line_bytes {} is not a power of two",
                self.cache_line_bytes
            )));
        }
        Ok(())
    }

    /// The synchronize bound as a [`Duration`], if configured.
    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_line_bytes: default_cache_line(),
            staging_args_bytes: default_staging_args(),
            sync_timeout_ms: None,
            zero_workspace: false,
            enable_profiling: true,
        }
    }
}
