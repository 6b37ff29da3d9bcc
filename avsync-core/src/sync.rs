//! Audio/Video Synchronization
//!
//! Audio is the master clock. Video delays are corrected against it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::buffer::StreamKind;
use crate::config::SyncConfig;

/// Turns presentation timestamps into render delays.
pub trait ClockOracle: Send + Sync {
    /// Milliseconds to wait before presenting `pts_ms`. Negative means the
    /// frame is already late. `drift_correction` asks for the video
    /// adjustment against the audio clock.
    fn compute_delay(&self, pts_ms: i64, kind: StreamKind, drift_correction: bool) -> i64;
}

/// Position anchor: media time `pts_ms` was current at `at`, and advances
/// from there only while `playing`
#[derive(Debug, Clone, Copy)]
struct Anchor {
    pts_ms: i64,
    at: Instant,
    playing: bool,
}

impl Anchor {
    fn position_at(&self, now: Instant) -> i64 {
        if self.playing {
            self.pts_ms + now.saturating_duration_since(self.at).as_millis() as i64
        } else {
            self.pts_ms
        }
    }
}

/// Audio-master playback clock
pub struct SyncClock {
    anchor: Mutex<Anchor>,
    last_audio_pts_ms: AtomicI64,
    last_video_pts_ms: AtomicI64,
    config: SyncConfig,
}

impl SyncClock {
    /// Clock stopped at position 0
    pub fn new(config: SyncConfig) -> Self {
        Self {
            anchor: Mutex::new(Anchor {
                pts_ms: 0,
                at: Instant::now(),
                playing: false,
            }),
            last_audio_pts_ms: AtomicI64::new(0),
            last_video_pts_ms: AtomicI64::new(0),
            config,
        }
    }

    /// Current master position
    pub fn position_ms(&self) -> i64 {
        self.position_at(Instant::now())
    }

    fn position_at(&self, now: Instant) -> i64 {
        self.anchor.lock().position_at(now)
    }

    /// Freeze or start the clock at its current position
    fn set_playing(&self, playing: bool, now: Instant) {
        let mut anchor = self.anchor.lock();
        *anchor = Anchor {
            pts_ms: anchor.position_at(now),
            at: now,
            playing,
        };
    }

    /// Start or resume the clock from its current position
    pub fn resume(&self) {
        self.set_playing(true, Instant::now());
    }

    /// Freeze the clock at its current position
    pub fn pause(&self) {
        self.set_playing(false, Instant::now());
    }

    pub fn is_playing(&self) -> bool {
        self.anchor.lock().playing
    }

    /// Jump to a new position; keeps the play/pause state
    pub fn seek(&self, pts_ms: i64) {
        {
            let mut anchor = self.anchor.lock();
            anchor.pts_ms = pts_ms;
            anchor.at = Instant::now();
        }
        self.last_audio_pts_ms.store(pts_ms, Ordering::Release);
        self.last_video_pts_ms.store(pts_ms, Ordering::Release);
    }

    /// Audio reached the speaker; the master clock follows it
    pub fn on_audio_progress(&self, pts_ms: i64) {
        self.last_audio_pts_ms.store(pts_ms, Ordering::Release);
        let mut anchor = self.anchor.lock();
        if anchor.playing {
            anchor.pts_ms = pts_ms;
            anchor.at = Instant::now();
        }
    }

    pub fn on_video_progress(&self, pts_ms: i64) {
        self.last_video_pts_ms.store(pts_ms, Ordering::Release);
    }

    /// Drift in milliseconds. Positive = video ahead of audio.
    pub fn drift_ms(&self) -> i64 {
        self.last_video_pts_ms.load(Ordering::Acquire) - self.last_audio_pts_ms.load(Ordering::Acquire)
    }

    fn delay_at(&self, pts_ms: i64, kind: StreamKind, drift_correction: bool, now: Instant) -> i64 {
        let delay = pts_ms - self.position_at(now);
        if !drift_correction || kind != StreamKind::Video {
            return delay;
        }

        let threshold = self.config.drift_threshold_ms;
        if delay.abs() <= threshold {
            delay.max(0)
        } else if delay > threshold {
            // Video ahead - wait, but never longer than one correction step
            delay.min(self.config.max_correction_ms)
        } else {
            // Video behind - show it now
            0
        }
    }
}

impl ClockOracle for SyncClock {
    fn compute_delay(&self, pts_ms: i64, kind: StreamKind, drift_correction: bool) -> i64 {
        self.delay_at(pts_ms, kind, drift_correction, Instant::now())
    }
}
