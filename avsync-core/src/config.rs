//! Renderer and sync clock configuration.

use serde::{Deserialize, Serialize};

use crate::error::RenderError;

/// Renderer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Depth of the audio sink queue. The in-flight audio queue never grows past it.
    pub audio_queue_depth: usize,
    /// Extra time after the stream duration before `RenderEnd` fires
    pub end_of_stream_grace_ms: i64,
    /// Audio buffers whose delay is below `-audio_late_threshold_ms` are discarded
    pub audio_late_threshold_ms: i64,
    /// Name of the render thread
    pub thread_name: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            audio_queue_depth: 10,
            end_of_stream_grace_ms: 50,
            audio_late_threshold_ms: 0,
            thread_name: "avsync-render".to_string(),
        }
    }
}

impl RendererConfig {
    pub fn from_json_str(json: &str) -> Result<Self, RenderError> {
        Ok(serde_json::from_str(json)?)
    }

    /// True when an audio buffer with this delay is too late to play
    pub fn is_audio_too_late(&self, delay_ms: i64) -> bool {
        delay_ms < -self.audio_late_threshold_ms
    }
}

/// Tunables for [`crate::sync::SyncClock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Video within this distance of the master clock is shown as scheduled
    pub drift_threshold_ms: i64,
    /// Largest wait applied to video running ahead of the master clock
    pub max_correction_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_threshold_ms: 40,
            max_correction_ms: 100,
        }
    }
}
