//! Stream configuration
//!
//! Persisted settings describing the stream a backend should open, plus
//! engine tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineSettings;
use crate::types::{
    ChannelLayout, DeviceFormat, SampleType, DEFAULT_BUFFER_SIZE, DEFAULT_FREQUENCY,
    DEFAULT_UPDATE_SIZE,
};

/// Default bound on waiting for a device queue to drain on stop
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 500;

/// Default run time of the loopback tool
pub const DEFAULT_RUN_SECONDS: f32 = 3.0;

/// Settings for one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Endpoint to open; empty selects the platform default
    pub device_name: String,
    /// Frame rate in Hz
    pub frequency: u32,
    pub channels: ChannelLayout,
    pub sample_type: SampleType,
    /// Frames per chunk
    pub update_size: u32,
    /// Total buffer depth in frames
    pub buffer_size: u32,
    /// Upper bound for the queue drain on stop
    pub drain_timeout_ms: u64,
    /// How long the loopback tool runs each direction
    pub run_seconds: f32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            frequency: DEFAULT_FREQUENCY,
            channels: ChannelLayout::Stereo,
            sample_type: SampleType::Short,
            update_size: DEFAULT_UPDATE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            run_seconds: DEFAULT_RUN_SECONDS,
        }
    }
}

impl StreamSettings {
    /// Requested device format
    pub fn device_format(&self) -> DeviceFormat {
        DeviceFormat {
            channels: self.channels,
            sample_type: self.sample_type,
            frequency: self.frequency,
            update_size: self.update_size,
            buffer_size: self.buffer_size,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }

    pub fn run_time(&self) -> Duration {
        Duration::from_secs_f32(self.run_seconds.max(0.0))
    }

    /// Buffer latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.frequency.max(1) as f32) * 1000.0
    }
}
