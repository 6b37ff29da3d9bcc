//! # Render Scheduler Core
//!
//! The state machine that decides when each decoded buffer is presented.
//! It is plain data driven by two entry points:
//!
//! - [`RenderCore::handle`]: a command posted by a control call or a sink
//! - [`RenderCore::fire_next_due`]: the earliest timer whose deadline passed
//!
//! Both take `now` explicitly; the render thread passes `Instant::now()`,
//! tests pass synthetic instants.
//!
//! ## Tick loop
//!
//! ```text
//!   render() ──► CalculateFrame ──► (video?) schedule RenderVideo @ delay
//!                     │  ▲          (audio?) schedule RenderAudio @ delay
//!                     │  │                   or drop if late
//!                     │  └──── re-post ◄──── (eos?) schedule RenderEnd @ D+grace
//!                     ▼
//!            nothing decoded ──► WaitingDecoder (idle until nudged)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::buffer::{BufferId, DecodeResult, MediaBuffer, PixelFormat, StreamKind};
use crate::config::RendererConfig;
use crate::queues::BufferQueues;
use crate::sink::{AudioSink, PresentCompletion, VideoFrame, VideoSurface};
use crate::source::{MediaSource, PlayerListener};
use crate::state::{RenderState, Shared};
use crate::sync::ClockOracle;
use crate::timer::{RenderEvent, TimerKey, TimerQueue};

// ============================================================================
// Commands
// ============================================================================

/// What happens to pending buffers when they are dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPolicy {
    /// Give them back to the decoder (hard reset)
    Discard,
    /// Put them back at the front of the render-ready set (pause)
    Requeue,
}

/// Messages posted into the render thread's inbox
pub(crate) enum Command {
    Prepare(Sender<()>),
    Render,
    Pause,
    AttachSurface(Option<Arc<dyn VideoSurface>>),
    SeekBuffers { video: MediaBuffer, audio: MediaBuffer },
    DropPending(DropPolicy),
    FlushAudio,
    AudioPlay,
    AudioPause,
    AudioConsumed(BufferId),
    VideoPresented { pts_ms: i64, planes: Vec<Vec<u8>> },
    Release(Sender<()>),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Prepare(_) => f.write_str("Prepare"),
            Command::Render => f.write_str("Render"),
            Command::Pause => f.write_str("Pause"),
            Command::AttachSurface(s) => write!(f, "AttachSurface(attached={})", s.is_some()),
            Command::SeekBuffers { video, audio } => {
                write!(f, "SeekBuffers(video={}, audio={})", video.id(), audio.id())
            }
            Command::DropPending(policy) => write!(f, "DropPending({policy:?})"),
            Command::FlushAudio => f.write_str("FlushAudio"),
            Command::AudioPlay => f.write_str("AudioPlay"),
            Command::AudioPause => f.write_str("AudioPause"),
            Command::AudioConsumed(id) => write!(f, "AudioConsumed({id})"),
            Command::VideoPresented { pts_ms, planes } => {
                write!(f, "VideoPresented(pts={pts_ms}, planes={})", planes.len())
            }
            Command::Release(_) => f.write_str("Release"),
        }
    }
}

/// Whether the render thread keeps running after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Exit,
}

fn delay_to_duration(delay_ms: i64) -> Duration {
    Duration::from_millis(delay_ms.max(0) as u64)
}

// ============================================================================
// Render Core
// ============================================================================

pub(crate) struct RenderCore {
    config: RendererConfig,
    shared: Arc<Shared>,
    source: Arc<dyn MediaSource>,
    listener: Arc<dyn PlayerListener>,
    oracle: Arc<dyn ClockOracle>,
    audio: Box<dyn AudioSink>,
    surface: Option<Arc<dyn VideoSurface>>,
    timers: TimerQueue,
    queues: BufferQueues,
    /// Our own inbox, handed to video completions
    inbox: Sender<Command>,
}

impl RenderCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: RendererConfig,
        shared: Arc<Shared>,
        source: Arc<dyn MediaSource>,
        listener: Arc<dyn PlayerListener>,
        oracle: Arc<dyn ClockOracle>,
        audio: Box<dyn AudioSink>,
        inbox: Sender<Command>,
    ) -> Self {
        Self {
            config,
            shared,
            source,
            listener,
            oracle,
            audio,
            surface: None,
            timers: TimerQueue::new(),
            queues: BufferQueues::new(),
            inbox,
        }
    }

    fn state(&self) -> RenderState {
        self.shared.state()
    }

    fn set_state(&self, state: RenderState) {
        tracing::debug!("Render state {} -> {}", self.state(), state);
        self.shared.set_state(state);
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    pub(crate) fn handle(&mut self, cmd: Command, now: Instant) -> Flow {
        let state = self.state();
        let flow = match cmd {
            Command::Prepare(ack) => {
                self.prepare();
                let _ = ack.send(());
                Flow::Continue
            }
            Command::Release(ack) => {
                self.release();
                let _ = ack.send(());
                Flow::Exit
            }
            // Completions and seek buffers carry ownership; they bypass the state guard
            Command::AudioConsumed(id) => {
                self.audio_consumed(id);
                Flow::Continue
            }
            Command::VideoPresented { pts_ms, planes } => {
                self.video_presented(pts_ms, planes);
                Flow::Continue
            }
            Command::SeekBuffers { video, audio } => {
                self.seek_buffers(video, audio, now);
                Flow::Continue
            }
            cmd if !state.is_active() => {
                tracing::debug!("Ignoring {:?}, renderer state: {}", cmd, state);
                Flow::Continue
            }
            Command::Render => {
                self.request_render(now);
                Flow::Continue
            }
            Command::Pause => {
                self.request_pause();
                Flow::Continue
            }
            Command::AttachSurface(surface) => {
                self.surface = surface;
                Flow::Continue
            }
            Command::DropPending(policy) => {
                self.drop_pending(policy);
                Flow::Continue
            }
            Command::FlushAudio => {
                self.flush_audio();
                Flow::Continue
            }
            Command::AudioPlay => {
                if let Err(e) = self.audio.play() {
                    tracing::warn!("Audio sink play failed: {}", e);
                }
                Flow::Continue
            }
            Command::AudioPause => {
                if let Err(e) = self.audio.pause() {
                    tracing::warn!("Audio sink pause failed: {}", e);
                }
                Flow::Continue
            }
        };
        self.publish();
        flow
    }

    /// Fire the earliest due timer. Returns false when nothing is due.
    pub(crate) fn fire_next_due(&mut self, now: Instant) -> bool {
        let Some((key, event)) = self.timers.pop_due(now) else {
            return false;
        };

        let state = self.state();
        if !state.is_active() {
            tracing::error!("Render event {:?} in wrong state: {}", event, state);
            return true;
        }

        match event {
            RenderEvent::CalculateFrame => self.calculate_frame(now),
            RenderEvent::RenderVideo => self.render_video(key),
            RenderEvent::RenderAudio => self.render_audio(key),
            RenderEvent::RenderEnd => self.render_end(),
        }
        self.publish();
        true
    }

    fn publish(&self) {
        self.shared.set_pending(
            self.queues.pending_len(StreamKind::Video),
            self.queues.pending_len(StreamKind::Audio),
        );
        #[cfg(debug_assertions)]
        if let Err(e) = self.queues.check_invariants() {
            panic!("render queue invariant broken: {e}");
        }
    }

    fn return_buffer(&self, buffer: MediaBuffer) {
        Shared::bump(&self.shared.buffers_returned);
        self.source.return_buffer(buffer);
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    fn prepare(&mut self) {
        if self.state() == RenderState::Released {
            tracing::error!("Prepare fail, renderer has been released.");
            return;
        }
        self.timers.clear();
        self.drop_pending(DropPolicy::Discard);
        self.set_state(RenderState::Prepared);
    }

    fn request_render(&mut self, now: Instant) {
        let state = self.state();
        if state.can_render() {
            self.set_state(RenderState::Rendering);
            self.timers.schedule(now, Duration::ZERO, RenderEvent::CalculateFrame);
        } else {
            tracing::debug!("Skip request render, because of state: {}", state);
        }
    }

    fn request_pause(&mut self) {
        let state = self.state();
        if state.can_pause() {
            self.set_state(RenderState::Paused);
            self.timers.cancel_where(|e| e == RenderEvent::CalculateFrame);
            self.drop_pending(DropPolicy::Requeue);
        } else {
            tracing::debug!("Skip request pause, because of state: {}", state);
        }
    }

    fn release(&mut self) {
        self.timers.clear();
        self.drop_pending(DropPolicy::Discard);
        self.audio.release();
        for buffer in self.queues.drain_in_flight() {
            self.return_buffer(buffer);
        }
        self.surface = None;
        self.set_state(RenderState::Released);
        tracing::debug!("Renderer released");
    }

    /// Cancel every pending presentation and hand its buffer back.
    /// Newest first, so requeued buffers keep their order at the front.
    fn drop_pending(&mut self, policy: DropPolicy) {
        for kind in [StreamKind::Video, StreamKind::Audio] {
            while let Some((buffer, key)) = self.queues.pop_pending_back(kind) {
                self.timers.cancel(key);
                match policy {
                    DropPolicy::Discard => self.return_buffer(buffer),
                    DropPolicy::Requeue => {
                        Shared::bump(&self.shared.buffers_requeued);
                        self.source.requeue_render_buffer(buffer);
                    }
                }
            }
        }
        debug_assert_eq!(self.timers.count(RenderEvent::RenderVideo), 0);
        debug_assert_eq!(self.timers.count(RenderEvent::RenderAudio), 0);
    }

    fn flush_audio(&mut self) {
        self.audio.clear();
        for buffer in self.queues.drain_in_flight() {
            self.return_buffer(buffer);
        }
    }

    // ========================================================================
    // Scheduling tick
    // ========================================================================

    fn calculate_frame(&mut self, now: Instant) {
        let state = self.state();
        if state != RenderState::Rendering {
            tracing::debug!("Skip render frame, because of state: {}", state);
            return;
        }

        let Some(info) = self.source.media_info() else {
            tracing::error!("Render tick skipped, media info unavailable.");
            self.set_state(RenderState::WaitingDecoder);
            return;
        };

        let video = self.source.request_render_buffer(StreamKind::Video);
        let audio = self.source.request_render_buffer(StreamKind::Audio);
        if video.is_none() && audio.is_none() {
            self.set_state(RenderState::WaitingDecoder);
            tracing::debug!("Waiting decoder buffer.");
            return;
        }

        if let Some(buffer) = video {
            self.schedule_video(buffer, now);
        }

        if let Some(buffer) = audio {
            if buffer.is_end_of_stream() {
                // Last frame is always an audio frame
                self.return_buffer(buffer);
                let end_pts = info.duration_ms + self.config.end_of_stream_grace_ms;
                let delay = self.oracle.compute_delay(end_pts, StreamKind::Audio, false);
                self.timers.schedule(now, delay_to_duration(delay), RenderEvent::RenderEnd);
                tracing::debug!("End of stream reached, render end in {}ms", delay);
            } else {
                self.schedule_audio(buffer, now);
            }
        }

        self.timers.schedule(now, Duration::ZERO, RenderEvent::CalculateFrame);
    }

    fn schedule_video(&mut self, buffer: MediaBuffer, now: Instant) {
        if buffer.is_end_of_stream() {
            self.return_buffer(buffer);
            return;
        }
        let delay = self.oracle.compute_delay(buffer.pts_ms(), StreamKind::Video, true);
        let key = self.timers.schedule(now, delay_to_duration(delay), RenderEvent::RenderVideo);
        self.queues.push_pending(buffer, key);
    }

    fn schedule_audio(&mut self, buffer: MediaBuffer, now: Instant) {
        let delay = self.oracle.compute_delay(buffer.pts_ms(), StreamKind::Audio, false);
        if self.config.is_audio_too_late(delay) {
            tracing::trace!(pts = buffer.pts_ms(), delay, "Dropping late audio buffer");
            Shared::bump(&self.shared.audio_dropped_late);
            self.return_buffer(buffer);
            return;
        }
        let key = self.timers.schedule(now, delay_to_duration(delay), RenderEvent::RenderAudio);
        self.queues.push_pending(buffer, key);
    }

    // ========================================================================
    // Presentation
    // ========================================================================

    fn render_video(&mut self, key: TimerKey) {
        let Some(buffer) = self.queues.take_pending(StreamKind::Video, key) else {
            tracing::warn!("RenderVideo fired without a pending buffer");
            return;
        };
        let started = Instant::now();
        let pts = buffer.pts_ms();

        match self.surface.clone() {
            Some(surface) => self.present_to(&*surface, &buffer),
            None => self.listener.report_progress(StreamKind::Video, pts),
        }

        self.return_buffer(buffer);
        self.listener.report_presented();
        tracing::trace!(pts, cost_us = started.elapsed().as_micros() as u64, "Render video");
    }

    fn present_to(&self, surface: &dyn VideoSurface, buffer: &MediaBuffer) {
        let pts = buffer.pts_ms();
        let (width, height, format) = buffer
            .video_planes()
            .map_or((0, 0, PixelFormat::Unknown), |v| (v.width, v.height, v.format));

        if format == PixelFormat::Unknown {
            self.listener.report_progress(StreamKind::Video, pts);
            tracing::error!("Render video frame fail. Unknown frame type.");
            return;
        }

        let planes = (0..format.plane_count())
            .map(|i| {
                let mut scratch = self.source.request_scratch(buffer.plane_size(i));
                buffer.copy_plane(i, &mut scratch);
                scratch
            })
            .collect();

        let frame = VideoFrame {
            pts_ms: pts,
            width,
            height,
            format,
            planes,
        };
        Shared::bump(&self.shared.video_presented);
        surface.present(frame, PresentCompletion::new(self.inbox.clone(), pts));
    }

    fn render_audio(&mut self, key: TimerKey) {
        let Some(buffer) = self.queues.take_pending(StreamKind::Audio, key) else {
            tracing::warn!("RenderAudio fired without a pending buffer");
            return;
        };
        let started = Instant::now();
        let pts = buffer.pts_ms();

        match self.audio.enqueue(buffer.id(), buffer.pcm()) {
            Ok(()) => {
                Shared::bump(&self.shared.audio_enqueued);
                self.queues.push_in_flight(buffer);
                if self.queues.in_flight_len() > self.config.audio_queue_depth {
                    tracing::warn!(
                        "Audio sink holds {} buffers, configured depth is {}",
                        self.queues.in_flight_len(),
                        self.config.audio_queue_depth
                    );
                }
            }
            Err(e) => {
                tracing::debug!("Audio buffer pts={} not queued: {}", pts, e);
                Shared::bump(&self.shared.audio_rejected);
                self.return_buffer(buffer);
            }
        }

        self.listener.report_presented();
        tracing::trace!(pts, cost_us = started.elapsed().as_micros() as u64, "Render audio");
    }

    fn render_end(&mut self) {
        self.listener.report_stream_end();
        self.set_state(RenderState::RenderEnd);
        tracing::debug!("Render end.");
    }

    // ========================================================================
    // Completions & seek
    // ========================================================================

    fn audio_consumed(&mut self, id: BufferId) {
        match self.queues.take_in_flight(id) {
            Some(buffer) => {
                self.listener.report_progress(StreamKind::Audio, buffer.pts_ms());
                self.return_buffer(buffer);
            }
            None => tracing::debug!("Stale audio completion for {}", id),
        }
    }

    fn video_presented(&mut self, pts_ms: i64, planes: Vec<Vec<u8>>) {
        for plane in planes {
            self.source.return_scratch(plane);
        }
        if self.state().is_active() {
            self.listener.report_progress(StreamKind::Video, pts_ms);
        }
    }

    /// Buffers decoded right after a seek skip the delay calculation and go
    /// ahead of any backlog.
    fn seek_buffers(&mut self, video: MediaBuffer, audio: MediaBuffer, now: Instant) {
        let state = self.state();
        if !state.is_active() {
            tracing::debug!("Seek buffers returned, renderer state: {}", state);
            self.return_buffer(video);
            self.return_buffer(audio);
            return;
        }

        for buffer in [video, audio] {
            if buffer.decode_result() != DecodeResult::Success {
                self.return_buffer(buffer);
                continue;
            }
            let event = match buffer.kind() {
                StreamKind::Video => RenderEvent::RenderVideo,
                StreamKind::Audio => RenderEvent::RenderAudio,
            };
            let key = self.timers.schedule_first(now, event);
            self.queues.push_pending_front(buffer, key);
        }
    }

    // ========================================================================
    // Introspection (tests)
    // ========================================================================

    #[cfg(test)]
    pub(crate) fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    #[cfg(test)]
    pub(crate) fn queues(&self) -> &BufferQueues {
        &self.queues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    const ALL: [RenderState; 7] = [
        RenderState::NotInit,
        RenderState::Prepared,
        RenderState::Rendering,
        RenderState::Paused,
        RenderState::WaitingDecoder,
        RenderState::RenderEnd,
        RenderState::Released,
    ];

    fn rendering(h: &mut Harness) {
        h.prepare();
        h.send(Command::Render, 0);
    }

    #[test]
    fn test_render_only_from_allowed_states() {
        for state in ALL {
            let mut h = Harness::new(1000);
            h.shared.set_state(state);
            h.core.handle(Command::Render, h.at(0));
            let expected = if state.can_render() { RenderState::Rendering } else { state };
            assert_eq!(h.state(), expected, "render() from {state}");
        }
    }

    #[test]
    fn test_pause_only_from_allowed_states() {
        for state in ALL {
            let mut h = Harness::new(1000);
            h.shared.set_state(state);
            h.core.handle(Command::Pause, h.at(0));
            let expected = if state.can_pause() { RenderState::Paused } else { state };
            assert_eq!(h.state(), expected, "pause() from {state}");
        }
    }

    #[test]
    fn test_waiting_decoder_and_nudge() {
        let mut h = Harness::new(1000);
        rendering(&mut h);
        assert_eq!(h.state(), RenderState::WaitingDecoder);
        assert!(h.core.timers().is_empty());

        h.source.push(video_frame(1, 40, PixelFormat::Nv12));
        h.core.handle(Command::Render, h.at(10));
        assert_eq!(h.state(), RenderState::Rendering);

        h.settle(10);
        assert_eq!(h.core.queues().pending_len(StreamKind::Video), 1);
        assert_eq!(h.state(), RenderState::WaitingDecoder);
        assert_eq!(h.oracle.calls(), vec![(40, StreamKind::Video, true)]);
    }

    #[test]
    fn test_missing_media_info_skips_tick() {
        let mut h = Harness::new(1000);
        h.source.set_info(None);
        h.source.push(video_frame(1, 0, PixelFormat::Nv12));
        rendering(&mut h);

        assert_eq!(h.state(), RenderState::WaitingDecoder);
        assert_eq!(h.source.ready_ids(StreamKind::Video), vec![BufferId(1)]);
        assert!(h.oracle.calls().is_empty());
    }

    #[test]
    fn test_late_audio_is_discarded() {
        let mut h = Harness::new(1000);
        h.oracle.set_position(100);
        h.source.push(audio_frame(1, 50));
        h.source.push(audio_frame(2, 100));
        rendering(&mut h);

        assert_eq!(h.source.returned(), vec![BufferId(1)]);
        assert_eq!(h.sink.lock().enqueued, vec![BufferId(2)]);
        assert_eq!(h.shared.stats().audio_dropped_late, 1);
        assert_eq!(h.oracle.calls()[0], (50, StreamKind::Audio, false));
    }

    #[test]
    fn test_pause_cancels_presentation_and_requeues() {
        let mut h = Harness::new(1000);
        h.source.push(video_frame(1, 40, PixelFormat::Nv12));
        h.source.push(video_frame(2, 80, PixelFormat::Nv12));
        h.source.push(audio_frame(3, 20));
        rendering(&mut h);
        assert_eq!(h.shared.pending_video(), 2);
        assert_eq!(h.shared.pending_audio(), 1);

        h.send(Command::Pause, 10);
        assert_eq!(h.state(), RenderState::Paused);
        assert_eq!(h.core.timers().len(), 0);
        assert_eq!(h.shared.pending_video(), 0);
        assert_eq!(h.source.requeued(), vec![BufferId(2), BufferId(1), BufferId(3)]);
        assert_eq!(h.source.ready_ids(StreamKind::Video), vec![BufferId(1), BufferId(2)]);

        h.settle(1000);
        assert!(h.sink.lock().enqueued.is_empty());
        assert_eq!(h.listener.presented(), 0);
        assert!(h.source.returned().is_empty());
        assert_eq!(h.shared.stats().buffers_requeued, 3);
    }

    #[test]
    fn test_configured_late_threshold_and_grace() {
        let config = RendererConfig {
            audio_late_threshold_ms: 30,
            end_of_stream_grace_ms: 80,
            ..RendererConfig::default()
        };
        let mut h = Harness::with_config(1000, config);
        h.oracle.set_position(100);
        h.source.push(audio_frame(1, 60));
        h.source.push(audio_frame(2, 80));
        h.source.push(audio_eos(3, 1000));
        rendering(&mut h);

        // -40ms is past the threshold, -20ms is still played
        assert_eq!(h.sink.lock().enqueued, vec![BufferId(2)]);
        assert_eq!(h.source.returned(), vec![BufferId(1), BufferId(3)]);
        assert_eq!(h.shared.stats().audio_dropped_late, 1);

        assert!(h.oracle.calls().contains(&(1080, StreamKind::Audio, false)));
        assert_eq!(h.core.timers().deadlines_of(RenderEvent::RenderEnd), vec![h.at(980)]);
        h.settle(979);
        assert_eq!(h.listener.ended(), 0);
        h.settle(980);
        assert_eq!(h.state(), RenderState::RenderEnd);
    }

    #[test]
    fn test_render_after_pause_resumes_in_order() {
        let mut h = Harness::new(1000);
        h.source.push(video_frame(1, 40, PixelFormat::Nv12));
        h.source.push(video_frame(2, 80, PixelFormat::Nv12));
        h.source.push(audio_frame(3, 20));
        rendering(&mut h);
        h.send(Command::Pause, 10);

        h.settle(500);
        assert_eq!(h.listener.presented(), 0);
        assert!(h.listener.progress().is_empty());

        h.send(Command::Render, 500);
        assert_eq!(h.shared.pending_video(), 2);
        assert_eq!(h.shared.pending_audio(), 1);

        h.settle(1000);
        assert_eq!(h.listener.progress_of(StreamKind::Video), vec![40, 80]);
        assert_eq!(h.source.returned(), vec![BufferId(1), BufferId(2)]);
        assert_eq!(h.sink.lock().enqueued, vec![BufferId(3)]);
        assert_eq!(h.listener.presented(), 3);
        assert_eq!(h.state(), RenderState::WaitingDecoder);
    }

    #[test]
    fn test_end_of_stream_schedules_render_end() {
        let mut h = Harness::new(1000);
        h.source.push(audio_eos(9, 1000));
        rendering(&mut h);

        assert_eq!(h.source.returned(), vec![BufferId(9)]);
        assert_eq!(h.core.timers().deadlines_of(RenderEvent::RenderEnd), vec![h.at(1050)]);
        assert!(h.oracle.calls().contains(&(1050, StreamKind::Audio, false)));

        h.settle(1049);
        assert_eq!(h.listener.ended(), 0);
        h.settle(1050);
        assert_eq!(h.state(), RenderState::RenderEnd);
        assert_eq!(h.listener.ended(), 1);
        assert!(h.sink.lock().enqueued.is_empty());
    }

    #[test]
    fn test_pause_keeps_render_end() {
        let mut h = Harness::new(500);
        h.source.push(audio_eos(1, 500));
        rendering(&mut h);
        h.send(Command::Pause, 100);

        assert_eq!(h.core.timers().count(RenderEvent::RenderEnd), 1);
        h.settle(550);
        assert_eq!(h.listener.ended(), 1);
    }

    #[test]
    fn test_unknown_pixel_format_reports_progress() {
        let mut h = Harness::new(1000);
        h.prepare();
        let surface = Arc::new(RecordingSurface::default());
        h.attach(surface.clone());
        h.source.push(video_frame(4, 0, PixelFormat::Unknown));
        h.send(Command::Render, 0);

        assert!(surface.presented().is_empty());
        assert_eq!(h.listener.progress(), vec![0]);
        assert_eq!(h.listener.presented(), 1);
        assert_eq!(h.source.returned(), vec![BufferId(4)]);
        assert_eq!(h.source.scratch_outstanding(), 0);
    }

    #[test]
    fn test_present_recycles_scratch_on_completion() {
        let mut h = Harness::new(1000);
        h.prepare();
        let surface = Arc::new(RecordingSurface::default());
        surface.hold.store(true, std::sync::atomic::Ordering::SeqCst);
        h.attach(surface.clone());
        h.source.push(video_frame(1, 0, PixelFormat::Nv12));
        h.send(Command::Render, 0);

        assert_eq!(surface.presented(), vec![(0, PixelFormat::Nv12, vec![8, 4])]);
        assert_eq!(h.source.returned(), vec![BufferId(1)]);
        assert_eq!(h.source.scratch_outstanding(), 2);
        assert!(h.listener.progress().is_empty());

        surface.release_held();
        h.settle(0);
        assert_eq!(h.source.scratch_outstanding(), 0);
        assert_eq!(h.listener.progress(), vec![0]);
        assert_eq!(h.shared.stats().video_presented, 1);
    }

    #[test]
    fn test_no_surface_still_reports_progress() {
        let mut h = Harness::new(1000);
        h.source.push(video_frame(1, 0, PixelFormat::Yuv420p));
        rendering(&mut h);

        assert_eq!(h.listener.progress_of(StreamKind::Video), vec![0]);
        assert_eq!(h.source.returned(), vec![BufferId(1)]);
        assert_eq!(h.shared.stats().video_presented, 0);
    }

    #[test]
    fn test_seek_buffers_jump_backlog() {
        let mut h = Harness::new(1000);
        h.source.push(video_frame(1, 100, PixelFormat::Nv12));
        h.source.push(video_frame(2, 200, PixelFormat::Nv12));
        rendering(&mut h);
        assert_eq!(h.shared.pending_video(), 2);

        h.send(
            Command::SeekBuffers {
                video: video_frame(10, 500, PixelFormat::Nv12),
                audio: failed(audio_frame(11, 500)),
            },
            5,
        );

        assert_eq!(h.source.returned(), vec![BufferId(11), BufferId(10)]);
        assert_eq!(h.listener.progress(), vec![500]);
        assert_eq!(h.shared.pending_video(), 2);
        assert_eq!(h.oracle.calls().len(), 2);
    }

    #[test]
    fn test_seek_buffers_while_inactive_are_returned() {
        let mut h = Harness::new(1000);
        h.send(
            Command::SeekBuffers {
                video: video_frame(1, 0, PixelFormat::Nv12),
                audio: audio_frame(2, 0),
            },
            0,
        );
        assert_eq!(h.source.returned(), vec![BufferId(1), BufferId(2)]);
        assert!(h.core.timers().is_empty());
    }

    #[test]
    fn test_rejected_audio_is_returned() {
        let mut h = Harness::new(1000);
        h.sink.lock().accept = false;
        h.source.push(audio_frame(1, 0));
        rendering(&mut h);

        assert_eq!(h.source.returned(), vec![BufferId(1)]);
        assert_eq!(h.core.queues().in_flight_len(), 0);
        assert_eq!(h.shared.stats().audio_rejected, 1);
        assert_eq!(h.listener.presented(), 1);
    }

    #[test]
    fn test_audio_completion_flush_and_stale() {
        let mut h = Harness::new(1000);
        h.source.push(audio_frame(1, 0));
        h.source.push(audio_frame(2, 20));
        rendering(&mut h);
        h.settle(20);
        assert_eq!(h.core.queues().in_flight_len(), 2);

        h.send(Command::AudioConsumed(BufferId(1)), 25);
        assert_eq!(h.source.returned(), vec![BufferId(1)]);
        assert_eq!(h.listener.progress(), vec![0]);

        h.send(Command::FlushAudio, 30);
        assert_eq!(h.sink.lock().clears, 1);
        assert_eq!(h.source.returned(), vec![BufferId(1), BufferId(2)]);

        // Completion for a buffer that was already flushed
        h.send(Command::AudioConsumed(BufferId(2)), 35);
        assert_eq!(h.source.returned().len(), 2);
        assert_eq!(h.listener.progress(), vec![0]);
    }

    #[test]
    fn test_audio_completed_out_of_order() {
        let mut h = Harness::new(1000);
        h.source.push(audio_frame(1, 0));
        h.source.push(audio_frame(2, 20));
        rendering(&mut h);
        h.settle(20);
        assert_eq!(h.core.queues().in_flight_len(), 2);

        h.send(Command::AudioConsumed(BufferId(2)), 30);
        assert_eq!(h.source.returned(), vec![BufferId(2)]);
        assert_eq!(h.core.queues().in_flight_len(), 1);
        assert!(h.core.queues().check_invariants().is_ok());

        h.send(Command::AudioConsumed(BufferId(1)), 40);
        assert_eq!(h.source.returned(), vec![BufferId(2), BufferId(1)]);
        assert_eq!(h.listener.progress_of(StreamKind::Audio), vec![20, 0]);
        assert!(h.listener.progress_of(StreamKind::Video).is_empty());
        assert_eq!(h.core.queues().held(), 0);
    }

    #[test]
    fn test_release_returns_everything_once() {
        let mut h = Harness::new(1000);
        h.source.push(audio_frame(1, 0));
        h.source.push(audio_frame(2, 300));
        h.source.push(video_frame(3, 300, PixelFormat::Rgba));
        h.source.push(video_frame(4, 400, PixelFormat::Rgba));
        rendering(&mut h);
        assert_eq!(h.core.queues().held(), 4);

        h.release(10);
        let mut returned = h.source.returned();
        returned.sort();
        assert_eq!(returned, vec![BufferId(1), BufferId(2), BufferId(3), BufferId(4)]);
        assert_eq!(h.core.queues().held(), 0);
        assert!(h.core.timers().is_empty());
        assert!(h.sink.lock().released);
        assert_eq!(h.state(), RenderState::Released);

        h.send(Command::Render, 20);
        h.prepare();
        assert_eq!(h.state(), RenderState::Released);

        // A completion arriving after release is dropped without a second return
        h.send(Command::AudioConsumed(BufferId(1)), 30);
        assert_eq!(h.source.returned().len(), 4);
    }

    #[test]
    fn test_drop_pending_discard() {
        let mut h = Harness::new(1000);
        h.source.push(video_frame(1, 100, PixelFormat::Nv12));
        h.source.push(audio_frame(2, 100));
        rendering(&mut h);

        h.send(Command::DropPending(DropPolicy::Discard), 10);
        assert_eq!(h.source.returned(), vec![BufferId(1), BufferId(2)]);
        assert!(h.source.requeued().is_empty());
        assert_eq!(h.core.timers().count(RenderEvent::RenderVideo), 0);
        assert_eq!(h.state(), RenderState::WaitingDecoder);
    }

    #[test]
    fn test_audio_play_pause_pass_through() {
        let mut h = Harness::new(1000);
        h.send(Command::AudioPlay, 0);
        assert!(!h.sink.lock().playing);

        h.prepare();
        h.send(Command::AudioPlay, 0);
        assert!(h.sink.lock().playing);
        h.send(Command::AudioPause, 0);
        assert!(!h.sink.lock().playing);
    }

    #[test]
    fn test_video_events_fire_in_schedule_order() {
        let mut h = Harness::new(1000);
        for (id, pts) in [(1, 0), (2, 40), (3, 80)] {
            h.source.push(video_frame(id, pts, PixelFormat::Nv12));
        }
        rendering(&mut h);
        h.settle(100);
        assert_eq!(h.listener.progress_of(StreamKind::Video), vec![0, 40, 80]);
        assert_eq!(h.source.returned(), vec![BufferId(1), BufferId(2), BufferId(3)]);
    }
}
