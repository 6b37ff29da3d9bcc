//! # Output Sinks
//!
//! Contracts for the two consumers the renderer feeds:
//!
//! - [`AudioSink`]: a bounded hardware queue. Accepts one buffer at a time and
//!   reports each finished buffer through an [`AudioCompletion`] from its own
//!   thread.
//! - [`VideoSurface`]: takes pixel planes and a [`PresentCompletion`] that
//!   fires exactly once when the surface is done with them.
//!
//! Completions never run renderer code on the sink's thread; they post a
//! message into the render thread's inbox.

use crossbeam_channel::Sender;

use crate::buffer::{BufferId, PixelFormat};
use crate::error::SinkError;
use crate::scheduler::Command;

// ============================================================================
// Audio
// ============================================================================

/// Platform audio queue.
///
/// Built on the render thread and only used there, so it does not need to be
/// `Send` (cpal streams are not).
pub trait AudioSink {
    /// Queue PCM for playback. `id` comes back through the completion handle
    /// once the bytes have been played.
    fn enqueue(&mut self, id: BufferId, pcm: &[u8]) -> Result<(), SinkError>;

    /// Drop everything queued. No completions fire for dropped buffers.
    fn clear(&mut self);

    fn play(&mut self) -> Result<(), SinkError>;

    fn pause(&mut self) -> Result<(), SinkError>;

    /// Tear down the device. The sink is not used afterwards.
    fn release(&mut self);
}

/// Handle an audio sink uses to report finished buffers
#[derive(Debug, Clone)]
pub struct AudioCompletion {
    tx: Sender<Command>,
}

impl AudioCompletion {
    pub(crate) fn new(tx: Sender<Command>) -> Self {
        Self { tx }
    }

    /// The sink finished playing buffer `id`. Safe from any thread.
    pub fn consumed(&self, id: BufferId) {
        if self.tx.send(Command::AudioConsumed(id)).is_err() {
            tracing::trace!("Audio completion for {} after render thread exit", id);
        }
    }
}

// ============================================================================
// Video
// ============================================================================

/// Pixel planes copied out of a decoded buffer into scratch memory
#[derive(Debug)]
pub struct VideoFrame {
    pub pts_ms: i64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Yuv420p: Y, U, V. Nv12: Y, UV. Nv21: Y, VU. Rgba: one packed plane.
    pub planes: Vec<Vec<u8>>,
}

/// Display surface
pub trait VideoSurface: Send + Sync {
    /// Show `frame`. Call `done.complete(frame)` once the planes are no longer
    /// needed; may happen on any thread.
    fn present(&self, frame: VideoFrame, done: PresentCompletion);
}

/// One-shot completion for a `present` call.
///
/// Dropping it without calling `complete` still reports the frame as shown,
/// so every `present` produces exactly one completion.
#[derive(Debug)]
pub struct PresentCompletion {
    tx: Option<Sender<Command>>,
    pts_ms: i64,
}

impl PresentCompletion {
    pub(crate) fn new(tx: Sender<Command>, pts_ms: i64) -> Self {
        Self { tx: Some(tx), pts_ms }
    }

    pub fn pts_ms(&self) -> i64 {
        self.pts_ms
    }

    /// Hand the planes back for recycling
    pub fn complete(mut self, frame: VideoFrame) {
        self.send(frame.planes);
    }

    fn send(&mut self, planes: Vec<Vec<u8>>) {
        if let Some(tx) = self.tx.take() {
            let msg = Command::VideoPresented {
                pts_ms: self.pts_ms,
                planes,
            };
            if tx.send(msg).is_err() {
                tracing::trace!("Video completion for pts={} after render thread exit", self.pts_ms);
            }
        }
    }
}

impl Drop for PresentCompletion {
    fn drop(&mut self) {
        self.send(Vec::new());
    }
}
