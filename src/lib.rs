pub mod capture;
pub mod display;
pub mod pipeline;
pub mod utils;

use arc_swap::ArcSwap;
use capture::frame::CfaPattern;
use serde::{Deserialize, Serialize};

use crate::utils::FoundDevice;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Explicit device; `None` auto-detects, falling back to the synthetic
    /// source when nothing raw-capable is present.
    pub device: Option<FoundDevice>,
    pub width: u32,
    pub height: u32,
    pub pattern: CfaPattern,
    /// Fixed manual exposure per request.
    pub exposure_us: u64,
    /// Fixed sensor sensitivity (ISO).
    pub sensitivity: u32,
    /// Capture request cadence.
    pub period_ms: u64,
    /// Completion channel depth (in-flight frames between source and loop).
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bound on the consumer's wait for a frame before it logs and retries.
    pub take_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            display: DisplayConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            width: 640,
            height: 480,
            pattern: CfaPattern::Grbg,
            exposure_us: 10_000,
            sensitivity: 800,
            period_ms: 10,
            buffer_count: 3,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            take_timeout_ms: 500,
        }
    }
}

impl Config {
    /// Load from an optional `argus.toml` next to the binary, with the
    /// defaults above filling anything unset.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("argus").required(false))
            .build()?
            .try_deserialize()
    }
}
