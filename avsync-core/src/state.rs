//! Renderer state machine values and the handful of fields other threads read.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;

/// Render state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum RenderState {
    /// Thread running, nothing prepared yet
    NotInit = 0,
    Prepared = 1,
    Rendering = 2,
    Paused = 3,
    /// Decoder had nothing ready; idle until nudged
    WaitingDecoder = 4,
    /// Stream played to the end
    RenderEnd = 5,
    /// Terminal
    Released = 6,
}

impl RenderState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::NotInit,
            1 => Self::Prepared,
            2 => Self::Rendering,
            3 => Self::Paused,
            4 => Self::WaitingDecoder,
            5 => Self::RenderEnd,
            _ => Self::Released,
        }
    }

    /// False for `NotInit` and `Released`, where only transition calls are honoured
    pub fn is_active(self) -> bool {
        !matches!(self, Self::NotInit | Self::Released)
    }

    /// States `render()` may leave
    pub fn can_render(self) -> bool {
        matches!(
            self,
            Self::Prepared | Self::Paused | Self::WaitingDecoder | Self::RenderEnd
        )
    }

    /// States `pause()` may leave
    pub fn can_pause(self) -> bool {
        matches!(self, Self::Rendering | Self::WaitingDecoder)
    }
}

impl std::fmt::Display for RenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Counters published by the render thread
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub video_presented: u64,
    pub audio_enqueued: u64,
    pub audio_rejected: u64,
    pub audio_dropped_late: u64,
    pub buffers_returned: u64,
    pub buffers_requeued: u64,
}

/// State shared between the render thread (sole writer) and callers
#[derive(Debug)]
pub(crate) struct Shared {
    state: AtomicU8,
    pending_video: AtomicUsize,
    pending_audio: AtomicUsize,
    pub(crate) video_presented: AtomicU64,
    pub(crate) audio_enqueued: AtomicU64,
    pub(crate) audio_rejected: AtomicU64,
    pub(crate) audio_dropped_late: AtomicU64,
    pub(crate) buffers_returned: AtomicU64,
    pub(crate) buffers_requeued: AtomicU64,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(RenderState::NotInit as u8),
            pending_video: AtomicUsize::new(0),
            pending_audio: AtomicUsize::new(0),
            video_presented: AtomicU64::new(0),
            audio_enqueued: AtomicU64::new(0),
            audio_rejected: AtomicU64::new(0),
            audio_dropped_late: AtomicU64::new(0),
            buffers_returned: AtomicU64::new(0),
            buffers_requeued: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> RenderState {
        RenderState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: RenderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn set_pending(&self, video: usize, audio: usize) {
        self.pending_video.store(video, Ordering::Release);
        self.pending_audio.store(audio, Ordering::Release);
    }

    pub(crate) fn pending_video(&self) -> usize {
        self.pending_video.load(Ordering::Acquire)
    }

    pub(crate) fn pending_audio(&self) -> usize {
        self.pending_audio.load(Ordering::Acquire)
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> RenderStats {
        RenderStats {
            video_presented: self.video_presented.load(Ordering::Relaxed),
            audio_enqueued: self.audio_enqueued.load(Ordering::Relaxed),
            audio_rejected: self.audio_rejected.load(Ordering::Relaxed),
            audio_dropped_late: self.audio_dropped_late.load(Ordering::Relaxed),
            buffers_returned: self.buffers_returned.load(Ordering::Relaxed),
            buffers_requeued: self.buffers_requeued.load(Ordering::Relaxed),
        }
    }
}
