//! Scripted collaborators for driving the render core in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::buffer::{BufferId, DecodeResult, MediaBuffer, PixelFormat, StreamKind};
use crate::config::RendererConfig;
use crate::error::SinkError;
use crate::scheduler::{Command, RenderCore};
use crate::sink::{AudioSink, PresentCompletion, VideoFrame, VideoSurface};
use crate::source::{MediaInfo, MediaSource, PlayerListener};
use crate::state::{RenderState, Shared};
use crate::sync::ClockOracle;

// ============================================================================
// Buffers
// ============================================================================

pub fn video_frame(id: u64, pts_ms: i64, format: PixelFormat) -> MediaBuffer {
    let mut b = MediaBuffer::video(BufferId(id));
    let sizes = format.plane_sizes(4, 2);
    let planes: Vec<Vec<u8>> = sizes.iter().map(|&n| vec![id as u8; n]).collect();
    let refs: Vec<&[u8]> = planes.iter().map(Vec::as_slice).collect();
    b.fill_video(pts_ms, 4, 2, format, &refs);
    b
}

pub fn audio_frame(id: u64, pts_ms: i64) -> MediaBuffer {
    let mut b = MediaBuffer::audio(BufferId(id));
    b.fill_audio(pts_ms, &[0u8; 16]);
    b
}

pub fn audio_eos(id: u64, pts_ms: i64) -> MediaBuffer {
    let mut b = MediaBuffer::audio(BufferId(id));
    b.mark_end_of_stream(pts_ms);
    b
}

pub fn failed(mut b: MediaBuffer) -> MediaBuffer {
    b.set_decode_result(DecodeResult::Failure);
    b
}

// ============================================================================
// Media source
// ============================================================================

/// Serves scripted render-ready buffers and records everything handed back
#[derive(Default)]
pub struct TestSource {
    ready: Mutex<[VecDeque<MediaBuffer>; 2]>,
    returned: Mutex<Vec<BufferId>>,
    requeued: Mutex<Vec<BufferId>>,
    info: Mutex<Option<MediaInfo>>,
    scratch_out: AtomicUsize,
    scratch_back: AtomicUsize,
}

impl TestSource {
    pub fn with_duration(duration_ms: i64) -> Self {
        let source = Self::default();
        source.set_info(Some(MediaInfo { duration_ms }));
        source
    }

    pub fn set_info(&self, info: Option<MediaInfo>) {
        *self.info.lock() = info;
    }

    pub fn push(&self, buffer: MediaBuffer) {
        self.ready.lock()[buffer.kind().index()].push_back(buffer);
    }

    pub fn ready_ids(&self, kind: StreamKind) -> Vec<BufferId> {
        self.ready.lock()[kind.index()].iter().map(MediaBuffer::id).collect()
    }

    pub fn returned(&self) -> Vec<BufferId> {
        self.returned.lock().clone()
    }

    pub fn requeued(&self) -> Vec<BufferId> {
        self.requeued.lock().clone()
    }

    /// Scratch buffers handed out and not yet returned
    pub fn scratch_outstanding(&self) -> usize {
        self.scratch_out.load(Ordering::SeqCst) - self.scratch_back.load(Ordering::SeqCst)
    }
}

impl MediaSource for TestSource {
    fn request_render_buffer(&self, kind: StreamKind) -> Option<MediaBuffer> {
        self.ready.lock()[kind.index()].pop_front()
    }

    fn return_buffer(&self, buffer: MediaBuffer) {
        let mut returned = self.returned.lock();
        assert!(!returned.contains(&buffer.id()), "buffer {} returned twice", buffer.id());
        returned.push(buffer.id());
    }

    fn requeue_render_buffer(&self, buffer: MediaBuffer) {
        self.requeued.lock().push(buffer.id());
        self.ready.lock()[buffer.kind().index()].push_front(buffer);
    }

    fn request_scratch(&self, len: usize) -> Vec<u8> {
        self.scratch_out.fetch_add(1, Ordering::SeqCst);
        vec![0; len]
    }

    fn return_scratch(&self, _scratch: Vec<u8>) {
        self.scratch_back.fetch_add(1, Ordering::SeqCst);
    }

    fn media_info(&self) -> Option<MediaInfo> {
        *self.info.lock()
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Delay is `pts - position`, position moved by hand
#[derive(Default)]
pub struct ScriptedOracle {
    position_ms: Mutex<i64>,
    calls: Mutex<Vec<(i64, StreamKind, bool)>>,
}

impl ScriptedOracle {
    pub fn set_position(&self, position_ms: i64) {
        *self.position_ms.lock() = position_ms;
    }

    pub fn calls(&self) -> Vec<(i64, StreamKind, bool)> {
        self.calls.lock().clone()
    }
}

impl ClockOracle for ScriptedOracle {
    fn compute_delay(&self, pts_ms: i64, kind: StreamKind, drift_correction: bool) -> i64 {
        self.calls.lock().push((pts_ms, kind, drift_correction));
        pts_ms - *self.position_ms.lock()
    }
}

// ============================================================================
// Sinks
// ============================================================================

#[derive(Debug)]
pub struct SinkProbe {
    pub accept: bool,
    pub enqueued: Vec<BufferId>,
    pub clears: usize,
    pub playing: bool,
    pub released: bool,
}

impl Default for SinkProbe {
    fn default() -> Self {
        Self {
            accept: true,
            enqueued: Vec::new(),
            clears: 0,
            playing: false,
            released: false,
        }
    }
}

/// Audio sink whose state is inspected through a shared probe
pub struct ManualSink {
    probe: Arc<Mutex<SinkProbe>>,
}

impl ManualSink {
    pub fn new(probe: Arc<Mutex<SinkProbe>>) -> Self {
        Self { probe }
    }
}

impl AudioSink for ManualSink {
    fn enqueue(&mut self, id: BufferId, _pcm: &[u8]) -> Result<(), SinkError> {
        let mut probe = self.probe.lock();
        if !probe.accept {
            return Err(SinkError::Rejected("scripted".into()));
        }
        probe.enqueued.push(id);
        Ok(())
    }

    fn clear(&mut self) {
        self.probe.lock().clears += 1;
    }

    fn play(&mut self) -> Result<(), SinkError> {
        self.probe.lock().playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), SinkError> {
        self.probe.lock().playing = false;
        Ok(())
    }

    fn release(&mut self) {
        self.probe.lock().released = true;
    }
}

/// Records presents; completes them at once unless told to hold
#[derive(Default)]
pub struct RecordingSurface {
    pub hold: AtomicBool,
    presented: Mutex<Vec<(i64, PixelFormat, Vec<usize>)>>,
    held: Mutex<Vec<(VideoFrame, PresentCompletion)>>,
}

impl RecordingSurface {
    pub fn presented(&self) -> Vec<(i64, PixelFormat, Vec<usize>)> {
        self.presented.lock().clone()
    }

    /// Complete every held frame
    pub fn release_held(&self) {
        for (frame, done) in self.held.lock().drain(..) {
            done.complete(frame);
        }
    }
}

impl VideoSurface for RecordingSurface {
    fn present(&self, frame: VideoFrame, done: PresentCompletion) {
        let lens = frame.planes.iter().map(Vec::len).collect();
        self.presented.lock().push((frame.pts_ms, frame.format, lens));
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().push((frame, done));
        } else {
            done.complete(frame);
        }
    }
}

#[derive(Default)]
pub struct RecordingListener {
    progress: Mutex<Vec<(StreamKind, i64)>>,
    presented: AtomicUsize,
    ended: AtomicUsize,
}

impl RecordingListener {
    pub fn progress(&self) -> Vec<i64> {
        self.progress.lock().iter().map(|&(_, pts)| pts).collect()
    }

    pub fn progress_of(&self, kind: StreamKind) -> Vec<i64> {
        self.progress.lock().iter().filter(|(k, _)| *k == kind).map(|&(_, pts)| pts).collect()
    }

    pub fn presented(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }
}

impl PlayerListener for RecordingListener {
    fn report_progress(&self, kind: StreamKind, pts_ms: i64) {
        self.progress.lock().push((kind, pts_ms));
    }

    fn report_presented(&self) {
        self.presented.fetch_add(1, Ordering::SeqCst);
    }

    fn report_stream_end(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A render core plus its collaborators, driven without a thread
pub(crate) struct Harness {
    pub(crate) core: RenderCore,
    pub(crate) shared: Arc<Shared>,
    pub source: Arc<TestSource>,
    pub oracle: Arc<ScriptedOracle>,
    pub listener: Arc<RecordingListener>,
    pub sink: Arc<Mutex<SinkProbe>>,
    pub start: Instant,
    rx: Receiver<Command>,
}

impl Harness {
    pub fn new(duration_ms: i64) -> Self {
        Self::with_config(duration_ms, RendererConfig::default())
    }

    pub fn with_config(duration_ms: i64, config: RendererConfig) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared::new());
        let source = Arc::new(TestSource::with_duration(duration_ms));
        let oracle = Arc::new(ScriptedOracle::default());
        let listener = Arc::new(RecordingListener::default());
        let sink = Arc::new(Mutex::new(SinkProbe::default()));
        let core = RenderCore::new(
            config,
            shared.clone(),
            source.clone(),
            listener.clone(),
            oracle.clone(),
            Box::new(ManualSink::new(sink.clone())),
            tx,
        );
        Self {
            core,
            shared,
            source,
            oracle,
            listener,
            sink,
            start: Instant::now(),
            rx,
        }
    }

    pub fn at(&self, ms: u64) -> Instant {
        self.start + std::time::Duration::from_millis(ms)
    }

    pub fn state(&self) -> RenderState {
        self.shared.state()
    }

    /// Handle `cmd` at `ms`, then anything it posted back, then every due timer
    pub(crate) fn send(&mut self, cmd: Command, ms: u64) {
        let now = self.at(ms);
        self.core.handle(cmd, now);
        self.settle(ms);
    }

    /// Drain posted completions and fire due timers until nothing changes
    pub fn settle(&mut self, ms: u64) {
        let now = self.at(ms);
        loop {
            let mut progressed = false;
            while let Ok(cmd) = self.rx.try_recv() {
                self.core.handle(cmd, now);
                progressed = true;
            }
            if self.core.fire_next_due(now) {
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    pub fn prepare(&mut self) {
        let (ack, _rx) = crossbeam_channel::bounded(1);
        self.send(Command::Prepare(ack), 0);
    }

    pub fn release(&mut self, ms: u64) {
        let (ack, _rx) = crossbeam_channel::bounded(1);
        self.send(Command::Release(ack), ms);
    }

    pub fn attach(&mut self, surface: Arc<RecordingSurface>) {
        let surface: Arc<dyn VideoSurface> = surface;
        self.send(Command::AttachSurface(Some(surface)), 0);
    }
}
