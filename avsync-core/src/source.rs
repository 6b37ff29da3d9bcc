//! Collaborators on the decoder/player side of the renderer.

use crate::buffer::{MediaBuffer, StreamKind};

/// What the renderer needs to know about the open media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    /// Total stream duration in milliseconds
    pub duration_ms: i64,
}

/// Decode-side buffer exchange.
///
/// Shared with the decoder thread, so every method takes `&self` and must be
/// safe to call concurrently. None of them may block.
pub trait MediaSource: Send + Sync {
    /// Next decoded buffer ready for scheduling, if any
    fn request_render_buffer(&self, kind: StreamKind) -> Option<MediaBuffer>;

    /// Give a buffer back to the decoder for refilling
    fn return_buffer(&self, buffer: MediaBuffer);

    /// Put a buffer back at the front of the render-ready set, already decoded
    fn requeue_render_buffer(&self, buffer: MediaBuffer);

    /// Scratch bytes of exactly `len` bytes for a plane copy
    fn request_scratch(&self, len: usize) -> Vec<u8>;

    fn return_scratch(&self, scratch: Vec<u8>);

    /// `None` while the player has no media open
    fn media_info(&self) -> Option<MediaInfo>;
}

/// Upstream notifications. Called on the render thread.
pub trait PlayerListener: Send + Sync {
    /// A `kind` frame with this timestamp has been played or shown
    fn report_progress(&self, kind: StreamKind, pts_ms: i64);

    /// One render event completed
    fn report_presented(&self);

    /// The stream finished playing
    fn report_stream_end(&self);
}
