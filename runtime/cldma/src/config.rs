// Licensed under the Apache-2.0 license

//! Tunables of a CLDMA instance.
//!
//! The defaults match the values the controller was characterized with. A
//! platform may override any of them from a TOML file:
//!
//! ```toml
//! max_repoll = 32
//! coalesce_gap_threshold_us = 150
//!
//! [hwo_retry]
//! retries = 8
//! delay_us = 2
//! ```

use poll_common::Backoff;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// A bounded retry budget: `retries` attempts spaced `delay_us` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub retries: u32,
    pub delay_us: u64,
}

impl RetryConfig {
    pub const fn new(retries: u32, delay_us: u64) -> Self {
        Self { retries, delay_us }
    }

    pub fn spin(&self) -> Backoff {
        Backoff::spin(self.retries, Duration::from_micros(self.delay_us))
    }

    pub fn sleep(&self) -> Backoff {
        Backoff::sleep(self.retries, Duration::from_micros(self.delay_us))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CldmaConfig {
    /// Wait for a descriptor that still carries HWO while hardware points elsewhere.
    pub hwo_retry: RetryConfig,
    /// Wait for a stop command to take effect.
    pub quiesce_retry: RetryConfig,
    /// Done-bit re-poll passes per work run.
    pub max_repoll: u32,
    pub coalesce_gap_threshold_us: u64,
    pub coalesce_delay_us: u64,
    pub wake_window_ms: u64,
    /// Descriptors in the per-instance descriptor pool.
    pub dma_pool_gpds: usize,
    pub default_pool_buffers: usize,
    pub jumbo_pool_buffers: usize,
}

impl Default for CldmaConfig {
    fn default() -> Self {
        Self {
            hwo_retry: RetryConfig::new(5, 5),
            quiesce_retry: RetryConfig::new(20, 10),
            max_repoll: 64,
            coalesce_gap_threshold_us: 200,
            coalesce_delay_us: 100,
            wake_window_ms: 100,
            dma_pool_gpds: 1024,
            default_pool_buffers: 512,
            jumbo_pool_buffers: 64,
        }
    }
}

impl CldmaConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: CldmaConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hwo_retry.retries == 0 {
            return Err(ConfigError::Invalid("hwo_retry.retries must be non-zero"));
        }
        if self.quiesce_retry.retries == 0 {
            return Err(ConfigError::Invalid(
                "quiesce_retry.retries must be non-zero",
            ));
        }
        if self.max_repoll == 0 {
            return Err(ConfigError::Invalid("max_repoll must be non-zero"));
        }
        if self.dma_pool_gpds == 0 {
            return Err(ConfigError::Invalid("dma_pool_gpds must be non-zero"));
        }
        if self.default_pool_buffers == 0 || self.jumbo_pool_buffers == 0 {
            return Err(ConfigError::Invalid("buffer pool sizes must be non-zero"));
        }
        Ok(())
    }

    pub fn coalesce_gap_threshold(&self) -> Duration {
        Duration::from_micros(self.coalesce_gap_threshold_us)
    }

    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_micros(self.coalesce_delay_us)
    }

    pub fn wake_window(&self) -> Duration {
        Duration::from_millis(self.wake_window_ms)
    }
}
