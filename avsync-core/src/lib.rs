//! # avsync Core
//!
//! Render scheduling and audio/video synchronization for decoded media
//! buffers. A dedicated render thread pulls buffers from the decoder's pool,
//! asks a clock oracle when each one is due, and hands them to an audio sink
//! and a video surface at that time.
//!
//! ```text
//! ┌──────────────┐          ┌──────────────────────────┐          ┌──────────────┐
//! │ DecodePool   │─request─►│ Renderer (render thread) │─enqueue─►│ AudioSink    │
//! │ (MediaSource)│◄─return──│  RenderCore + TimerQueue │◄consumed─│              │
//! └──────────────┘          │  BufferQueues            │─present─►│ VideoSurface │
//!        ▲                  └────────────┬─────────────┘◄──done───└──────────────┘
//!        │ decoder                       │ compute_delay
//!                                        ▼
//!                                 ClockOracle (SyncClock)
//! ```

// ============================================================================
// Buffers & Collaborators
// ============================================================================
pub mod buffer;
pub mod pool;
pub mod sink;
pub mod source;
pub mod sync;

#[cfg(feature = "audio")]
pub mod cpal_sink;

// ============================================================================
// Render Engine
// ============================================================================
pub mod queues;
pub mod renderer;
mod scheduler;
pub mod state;
pub mod timer;

// ============================================================================
// Ambient
// ============================================================================
pub mod config;
pub mod error;

#[cfg(test)]
mod test_support;

pub use buffer::{BufferId, DecodeResult, MediaBuffer, PixelFormat, StreamKind, VideoPlanes};
pub use config::{RendererConfig, SyncConfig};
pub use error::{RenderError, SinkError};
pub use pool::{DecodePool, PoolStats};
pub use renderer::Renderer;
pub use scheduler::DropPolicy;
pub use sink::{AudioCompletion, AudioSink, PresentCompletion, VideoFrame, VideoSurface};
pub use source::{MediaInfo, MediaSource, PlayerListener};
pub use state::{RenderState, RenderStats};
pub use sync::{ClockOracle, SyncClock};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
