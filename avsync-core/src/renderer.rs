//! # Renderer
//!
//! Owns the render thread. Every public method posts a [`Command`] into the
//! thread's inbox; only `prepare` and `release` wait for it to be handled.
//!
//! The render state is the one value read from the caller's side, to skip
//! posting requests the state machine would reject anyway.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::buffer::MediaBuffer;
use crate::config::RendererConfig;
use crate::error::RenderError;
use crate::scheduler::{Command, DropPolicy, Flow, RenderCore};
use crate::sink::{AudioCompletion, AudioSink, VideoSurface};
use crate::source::{MediaSource, PlayerListener};
use crate::state::{RenderState, RenderStats, Shared};
use crate::sync::ClockOracle;

/// Handle to a running render thread
pub struct Renderer {
    tx: Sender<Command>,
    shared: Arc<Shared>,
    source: Arc<dyn MediaSource>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl Renderer {
    /// Start the render thread in `NotInit`.
    ///
    /// `sink_factory` runs on the render thread and builds the audio sink
    /// there, handing it the completion handle it reports through.
    pub fn spawn<F>(
        config: RendererConfig,
        source: Arc<dyn MediaSource>,
        listener: Arc<dyn PlayerListener>,
        oracle: Arc<dyn ClockOracle>,
        sink_factory: F,
    ) -> Result<Self, RenderError>
    where
        F: FnOnce(AudioCompletion) -> Box<dyn AudioSink> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared::new());

        let thread_name = config.thread_name.clone();
        let inbox = tx.clone();
        let thread_shared = shared.clone();
        let thread_source = source.clone();
        let worker = thread::Builder::new().name(thread_name).spawn(move || {
            let audio = sink_factory(AudioCompletion::new(inbox.clone()));
            let core = RenderCore::new(config, thread_shared, thread_source, listener, oracle, audio, inbox);
            run(core, rx);
        })?;

        tracing::debug!("Render thread started: {:?}", worker.thread().name());
        Ok(Self {
            tx,
            shared,
            source,
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn post(&self, cmd: Command) {
        if let Err(e) = self.tx.send(cmd) {
            tracing::debug!("Render thread gone, dropped {:?}", e.into_inner());
        }
    }

    /// Post unless the state machine is in `NotInit` or `Released`
    fn post_active(&self, cmd: Command) {
        let state = self.state();
        if state.is_active() {
            self.post(cmd);
        } else {
            tracing::debug!("Ignoring {:?}, renderer state: {}", cmd, state);
        }
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// Reset queues and timers and enter `Prepared`. Waits for the render
    /// thread to apply it.
    pub fn prepare(&self) -> Result<(), RenderError> {
        if self.state() == RenderState::Released {
            tracing::error!("Prepare fail, renderer has been released.");
            return Err(RenderError::Released);
        }
        let (ack, done) = crossbeam_channel::bounded(1);
        self.tx.send(Command::Prepare(ack)).map_err(|_| RenderError::Disconnected)?;
        done.recv().map_err(|_| RenderError::Disconnected)?;
        Ok(())
    }

    pub fn render(&self) {
        self.post_active(Command::Render);
    }

    pub fn pause(&self) {
        self.post_active(Command::Pause);
    }

    /// Return every held buffer, tear down the audio sink and stop the render
    /// thread. Idempotent.
    pub fn release(&self) -> Result<(), RenderError> {
        if self.state() == RenderState::Released {
            return Ok(());
        }

        if thread::current().id() == self.worker_id {
            // Called from a listener callback; the thread exits after this command
            let (ack, _) = crossbeam_channel::bounded(1);
            self.post(Command::Release(ack));
            return Ok(());
        }

        let (ack, done) = crossbeam_channel::bounded(1);
        self.tx.send(Command::Release(ack)).map_err(|_| RenderError::Disconnected)?;
        let acked = done.recv();

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Render thread panicked");
            }
        }
        acked.map_err(|_| RenderError::Disconnected)
    }

    // ========================================================================
    // Decoder & player hooks
    // ========================================================================

    /// Re-arm scheduling after the decoder produced data
    pub fn check_render_buffer_if_waiting(&self) {
        if self.state() == RenderState::WaitingDecoder {
            self.post(Command::Render);
        }
    }

    pub fn attach_surface(&self, surface: Option<Arc<dyn VideoSurface>>) {
        self.post_active(Command::AttachSurface(surface));
    }

    /// Present the first buffers decoded after a seek ahead of any backlog.
    /// Failed decodes go straight back to the source.
    pub fn handle_seek_buffers(&self, video: MediaBuffer, audio: MediaBuffer) {
        let state = self.state();
        if !state.is_active() {
            tracing::debug!("Seek buffers returned, renderer state: {}", state);
            self.source.return_buffer(video);
            self.source.return_buffer(audio);
            return;
        }
        self.post(Command::SeekBuffers { video, audio });
    }

    pub fn drop_pending(&self, policy: DropPolicy) {
        self.post_active(Command::DropPending(policy));
    }

    // ========================================================================
    // Audio track
    // ========================================================================

    /// Clear the audio sink and return everything it held
    pub fn flush_audio(&self) {
        self.post_active(Command::FlushAudio);
    }

    pub fn audio_play(&self) {
        self.post_active(Command::AudioPlay);
    }

    pub fn audio_pause(&self) {
        self.post_active(Command::AudioPause);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn state(&self) -> RenderState {
        self.shared.state()
    }

    pub fn pending_video_count(&self) -> usize {
        self.shared.pending_video()
    }

    pub fn pending_audio_count(&self) -> usize {
        self.shared.pending_audio()
    }

    pub fn stats(&self) -> RenderStats {
        self.shared.stats()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::debug!("Release on drop: {}", e);
        }
    }
}

// ============================================================================
// Render thread
// ============================================================================

fn run(mut core: RenderCore, rx: Receiver<Command>) {
    loop {
        // Commands first so control calls are never starved by timers
        match rx.try_recv() {
            Ok(cmd) => {
                if core.handle(cmd, Instant::now()) == Flow::Exit {
                    break;
                }
                continue;
            }
            Err(TryRecvError::Disconnected) => {
                shutdown(&mut core);
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        if core.fire_next_due(Instant::now()) {
            continue;
        }

        let received = match core.next_deadline() {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(cmd) => {
                if core.handle(cmd, Instant::now()) == Flow::Exit {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                shutdown(&mut core);
                break;
            }
        }
    }
    tracing::debug!("Render thread exiting");
}

fn shutdown(core: &mut RenderCore) {
    let (ack, _) = crossbeam_channel::bounded(1);
    core.handle(Command::Release(ack), Instant::now());
}
