//! Headless outputs: a surface that logs frames, an audio sink that consumes
//! PCM in real time without a device, and the player-side listener.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use avsync_core::{
    AudioCompletion, AudioSink, BufferId, PlayerListener, PresentCompletion, SinkError, StreamKind,
    SyncClock, VideoFrame, VideoSurface,
};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;

use crate::synth::pcm_duration;

// ============================================================================
// Video
// ============================================================================

/// Surface that logs each frame and hands the planes straight back
#[derive(Default)]
pub struct LogSurface {
    frames: AtomicU64,
}

impl VideoSurface for LogSurface {
    fn present(&self, frame: VideoFrame, done: PresentCompletion) {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes: usize = frame.planes.iter().map(Vec::len).sum();
        tracing::trace!(
            pts = frame.pts_ms,
            "Frame {} {}x{} {:?} ({} bytes)",
            n,
            frame.width,
            frame.height,
            frame.format,
            bytes
        );
        done.complete(frame);
    }
}

// ============================================================================
// Audio
// ============================================================================

/// Chunks waiting to be "played". Each gets its own sequence number so a
/// recycled buffer id queued after a `clear()` is never mistaken for the
/// chunk that was playing.
#[derive(Default)]
struct PacedQueue {
    chunks: VecDeque<(u64, BufferId, Duration)>,
    next_seq: u64,
    playing: bool,
    stopped: bool,
}

impl PacedQueue {
    fn push(&mut self, id: BufferId, duration: Duration) {
        self.chunks.push_back((self.next_seq, id, duration));
        self.next_seq += 1;
    }

    /// Sequence number and play time of the chunk at the head
    fn head(&self) -> Option<(u64, Duration)> {
        self.chunks.front().map(|&(seq, _, duration)| (seq, duration))
    }

    /// Pop the head if it is still chunk `seq`
    fn finish(&mut self, seq: u64) -> Option<BufferId> {
        match self.chunks.front() {
            Some(&(head, id, _)) if head == seq => {
                self.chunks.pop_front();
                Some(id)
            }
            _ => None,
        }
    }
}

/// Device-less audio sink. A worker thread "plays" each chunk by sleeping
/// for its duration, then reports it consumed.
pub struct PacedAudioSink {
    queue: Arc<Mutex<PacedQueue>>,
    depth: usize,
    worker: Option<JoinHandle<()>>,
}

impl PacedAudioSink {
    pub fn new(completion: AudioCompletion, depth: usize) -> Self {
        let queue = Arc::new(Mutex::new(PacedQueue::default()));
        let shared = queue.clone();
        let worker = thread::Builder::new()
            .name("avsync-audio".to_string())
            .spawn(move || pace(&shared, &completion));
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Audio pacing thread failed to start: {}", e);
                None
            }
        };
        Self { queue, depth, worker }
    }
}

fn pace(queue: &Mutex<PacedQueue>, completion: &AudioCompletion) {
    loop {
        let head = {
            let q = queue.lock();
            if q.stopped {
                return;
            }
            if q.playing { q.head() } else { None }
        };

        let Some((seq, duration)) = head else {
            thread::sleep(Duration::from_millis(5));
            continue;
        };
        thread::sleep(duration);

        // None when cleared while we slept
        let finished = queue.lock().finish(seq);
        if let Some(id) = finished {
            completion.consumed(id);
        }
    }
}

impl AudioSink for PacedAudioSink {
    fn enqueue(&mut self, id: BufferId, pcm: &[u8]) -> Result<(), SinkError> {
        if self.worker.is_none() {
            return Err(SinkError::Device("Audio pacing thread not running".to_string()));
        }
        let mut q = self.queue.lock();
        if q.chunks.len() >= self.depth {
            return Err(SinkError::QueueFull { depth: self.depth });
        }
        q.push(id, pcm_duration(pcm.len()));
        Ok(())
    }

    fn clear(&mut self) {
        self.queue.lock().chunks.clear();
    }

    fn play(&mut self) -> Result<(), SinkError> {
        self.queue.lock().playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), SinkError> {
        self.queue.lock().playing = false;
        Ok(())
    }

    fn release(&mut self) {
        {
            let mut q = self.queue.lock();
            q.stopped = true;
            q.chunks.clear();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Audio pacing thread panicked");
            }
        }
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Tracks playback progress, keeps the clock on the audio position and
/// signals the end of the stream
pub struct PlaybackListener {
    clock: Arc<SyncClock>,
    end_tx: Sender<()>,
    /// Audio progress is reported for a chunk's start once it has fully played
    audio_chunk_ms: i64,
    last_pts: AtomicI64,
    presented: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct ListenerSummary {
    pub last_pts_ms: i64,
    pub presented: u64,
    pub clock_ms: i64,
    pub drift_ms: i64,
}

impl PlaybackListener {
    pub fn new(clock: Arc<SyncClock>, end_tx: Sender<()>, audio_chunk_ms: i64) -> Self {
        Self {
            clock,
            end_tx,
            audio_chunk_ms,
            last_pts: AtomicI64::new(-1),
            presented: AtomicU64::new(0),
        }
    }

    pub fn summary(&self) -> ListenerSummary {
        ListenerSummary {
            last_pts_ms: self.last_pts.load(Ordering::Relaxed),
            presented: self.presented.load(Ordering::Relaxed),
            clock_ms: self.clock.position_ms(),
            drift_ms: self.clock.drift_ms(),
        }
    }
}

impl PlayerListener for PlaybackListener {
    fn report_progress(&self, kind: StreamKind, pts_ms: i64) {
        self.last_pts.fetch_max(pts_ms, Ordering::Relaxed);
        match kind {
            StreamKind::Audio => self.clock.on_audio_progress(pts_ms + self.audio_chunk_ms),
            StreamKind::Video => self.clock.on_video_progress(pts_ms),
        }
    }

    fn report_presented(&self) {
        self.presented.fetch_add(1, Ordering::Relaxed);
    }

    fn report_stream_end(&self) {
        tracing::info!("Stream end at clock {}ms", self.clock.position_ms());
        let _ = self.end_tx.try_send(());
    }
}
