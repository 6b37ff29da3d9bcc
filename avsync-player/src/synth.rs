//! Synthetic decoder: fills pool buffers with a test pattern and a sine tone
//! at the pace the pool allows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use avsync_core::{DecodePool, PixelFormat, Renderer, StreamKind};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;
/// Length of one audio buffer
pub const AUDIO_CHUNK_MS: i64 = 20;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 36;
const TONE_HZ: f32 = 440.0;

#[derive(Debug, Clone, Copy)]
pub struct SynthOptions {
    pub duration_ms: i64,
    pub fps: u32,
}

/// Bytes of 16-bit interleaved PCM covering `ms` milliseconds
pub fn pcm_bytes_for(ms: i64) -> usize {
    (SAMPLE_RATE as i64 * ms / 1000) as usize * CHANNELS as usize * 2
}

/// Play time of `bytes` of PCM
pub fn pcm_duration(bytes: usize) -> Duration {
    let frames = bytes / (CHANNELS as usize * 2);
    Duration::from_micros(frames as u64 * 1_000_000 / SAMPLE_RATE as u64)
}

fn tone_chunk(start_ms: i64) -> Vec<u8> {
    let frames = pcm_bytes_for(AUDIO_CHUNK_MS) / (CHANNELS as usize * 2);
    let first = SAMPLE_RATE as i64 * start_ms / 1000;
    let mut pcm = Vec::with_capacity(frames * CHANNELS as usize * 2);
    for n in 0..frames as i64 {
        let t = (first + n) as f32 / SAMPLE_RATE as f32;
        let s = ((t * TONE_HZ * std::f32::consts::TAU).sin() * 0.2 * i16::MAX as f32) as i16;
        for _ in 0..CHANNELS {
            pcm.extend_from_slice(&s.to_le_bytes());
        }
    }
    pcm
}

/// NV12 frame whose luma ramps with the frame index
fn pattern_planes(index: u64) -> (Vec<u8>, Vec<u8>) {
    let sizes = PixelFormat::Nv12.plane_sizes(WIDTH, HEIGHT);
    let y = vec![(index * 8 % 256) as u8; sizes[0]];
    let uv = vec![128u8; sizes[1]];
    (y, uv)
}

pub struct SynthDecoder {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SynthDecoder {
    pub fn spawn(
        options: SynthOptions,
        pool: Arc<DecodePool>,
        renderer: Arc<Renderer>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("avsync-decode".to_string())
            .spawn(move || decode_loop(options, &pool, &renderer, &flag))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Decode thread panicked");
            }
        }
    }
}

impl Drop for SynthDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(options: SynthOptions, pool: &DecodePool, renderer: &Renderer, stop: &AtomicBool) {
    let frame_ms = 1000.0 / options.fps.max(1) as f64;
    let mut video_index: u64 = 0;
    let mut audio_pts: i64 = 0;
    let mut video_done = false;
    let mut audio_done = false;

    while !stop.load(Ordering::SeqCst) && !(video_done && audio_done) {
        let video_pts = (video_index as f64 * frame_ms) as i64;

        // Decode whichever stream is behind
        let kind = if video_done || (!audio_done && audio_pts <= video_pts) {
            StreamKind::Audio
        } else {
            StreamKind::Video
        };

        let Some(mut buffer) = pool.acquire_decode_buffer(kind) else {
            // Everything is decoded and waiting; make sure the renderer is pulling
            renderer.check_render_buffer_if_waiting();
            thread::sleep(Duration::from_millis(2));
            continue;
        };

        match kind {
            StreamKind::Video if video_pts >= options.duration_ms => {
                buffer.mark_end_of_stream(options.duration_ms);
                video_done = true;
            }
            StreamKind::Video => {
                let (y, uv) = pattern_planes(video_index);
                buffer.fill_video(video_pts, WIDTH, HEIGHT, PixelFormat::Nv12, &[y.as_slice(), uv.as_slice()]);
                video_index += 1;
            }
            StreamKind::Audio if audio_pts >= options.duration_ms => {
                buffer.mark_end_of_stream(options.duration_ms);
                audio_done = true;
            }
            StreamKind::Audio => {
                buffer.fill_audio(audio_pts, &tone_chunk(audio_pts));
                audio_pts += AUDIO_CHUNK_MS;
            }
        }

        tracing::trace!(kind = ?kind, pts = buffer.pts_ms(), "Decoded");
        pool.submit_decoded(buffer);
        renderer.check_render_buffer_if_waiting();
    }
    tracing::debug!("Decoder finished: {} video frames, {}ms audio", video_index, audio_pts);

    // A nudge can race the renderer going idle; keep it pulling until drained
    while !stop.load(Ordering::SeqCst) {
        let stats = pool.stats();
        if stats.ready_audio == 0 && stats.ready_video == 0 {
            break;
        }
        renderer.check_render_buffer_if_waiting();
        thread::sleep(Duration::from_millis(5));
    }
}
