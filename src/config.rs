//! Relay configuration.
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration:
//!
//! ```rust
//! use framerelay::config::{ProcessorKind, RelayConfig};
//!
//! let config = RelayConfig::from_yaml_str("processor:\n  kind: features\n").unwrap();
//! assert_eq!(config.listen.port(), 6789);
//! assert_eq!(config.processor.kind, ProcessorKind::Features);
//! ```

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::decode::DecodePool;
use crate::{RelayError, Result};

/// Default WebSocket port
pub const DEFAULT_PORT: u16 = 6789;

/// Which processing strategy sessions run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    /// Render frames unchanged
    #[default]
    Passthrough,
    /// Outline detected bright regions
    Features,
    /// Draw pose keypoints from a host-supplied estimator
    Pose,
}

/// Processor selection and tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub kind: ProcessorKind,
    /// Luma above which a pixel counts as part of a feature
    pub feature_threshold: u8,
    /// Smallest feature, in pixels, worth outlining
    pub feature_min_area: u32,
    /// Keypoints at or below this confidence are not drawn
    pub pose_confidence: f32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            kind: ProcessorKind::Passthrough,
            feature_threshold: 200,
            feature_min_area: 64,
            pose_confidence: 0.3,
        }
    }
}

/// Where rendered frames go.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Log each rendered frame at trace level
    #[default]
    Log,
    /// Overwrite a single image file with the latest frame
    Snapshot { path: PathBuf },
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Concurrent decodes allowed across all sessions
    pub decode_workers: usize,
    /// Throughput measurement window, in milliseconds
    pub metrics_window_ms: u64,
    /// Largest accepted WebSocket message
    pub max_message_bytes: usize,
    /// Draw the throughput gauge onto rendered frames
    pub overlay_metrics: bool,
    /// Frame rate at which the gauge is full
    pub target_fps: f64,
    pub processor: ProcessorConfig,
    pub sink: SinkConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            decode_workers: DecodePool::default_workers(),
            metrics_window_ms: 1_000,
            max_message_bytes: 16 * 1024 * 1024,
            overlay_metrics: true,
            target_fps: 30.0,
            processor: ProcessorConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: RelayConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| RelayError::invalid_config(format!("YAML parsing failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            RelayError::invalid_config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Metrics window as a [`Duration`]
    pub fn metrics_window(&self) -> Duration {
        Duration::from_millis(self.metrics_window_ms)
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.decode_workers == 0 {
            return Err(RelayError::invalid_config("decode_workers must be at least 1"));
        }
        if self.metrics_window_ms == 0 {
            return Err(RelayError::invalid_config("metrics_window_ms must be positive"));
        }
        if self.max_message_bytes == 0 {
            return Err(RelayError::invalid_config("max_message_bytes must be positive"));
        }
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(RelayError::invalid_config("target_fps must be a positive number"));
        }
        if !(0.0..=1.0).contains(&self.processor.pose_confidence) {
            return Err(RelayError::invalid_config("pose_confidence must be within 0..=1"));
        }
        Ok(())
    }
}
