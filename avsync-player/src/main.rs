//! # avsync Player
//!
//! Headless player: a synthetic decoder feeds the render engine, which plays
//! the clip against a real-time audio sink and a logging surface, then prints
//! render statistics as JSON.

mod outputs;
mod synth;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use avsync_core::{
    AudioCompletion, AudioSink, DecodePool, MediaInfo, PoolStats, RenderStats, Renderer,
    RendererConfig, SyncClock, SyncConfig, VideoSurface,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use outputs::{ListenerSummary, LogSurface, PacedAudioSink, PlaybackListener};
use synth::{SynthDecoder, SynthOptions};

const AUDIO_BUFFERS: usize = 12;
const VIDEO_BUFFERS: usize = 8;

/// Contents of `--config <file.json>`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlayerConfig {
    renderer: RendererConfig,
    sync: SyncConfig,
}

#[derive(Debug)]
struct Options {
    config: Option<PathBuf>,
    duration_ms: i64,
    fps: u32,
}

#[derive(Serialize)]
struct Summary {
    render: RenderStats,
    pool: PoolStats,
    playback: ListenerSummary,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("avsync=debug")),
        )
        .init();

    let options = parse_args(&args)?;
    let config = load_config(options.config.as_ref())?;

    tracing::info!(
        "avsync player v{}: {}ms clip at {} fps",
        avsync_core::VERSION,
        options.duration_ms,
        options.fps
    );

    let summary = play(&options, config)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn play(options: &Options, config: PlayerConfig) -> Result<Summary> {
    let pool = Arc::new(DecodePool::new(AUDIO_BUFFERS, VIDEO_BUFFERS));
    pool.set_media_info(Some(MediaInfo {
        duration_ms: options.duration_ms,
    }));

    let clock = Arc::new(SyncClock::new(config.sync));
    let (end_tx, end_rx) = crossbeam_channel::bounded(1);
    let listener = Arc::new(PlaybackListener::new(clock.clone(), end_tx, synth::AUDIO_CHUNK_MS));

    let depth = config.renderer.audio_queue_depth;
    let renderer = Arc::new(
        Renderer::spawn(
            config.renderer,
            pool.clone(),
            listener.clone(),
            clock.clone(),
            move |done| open_audio_sink(done, depth),
        )
        .context("Failed to start renderer")?,
    );

    renderer.prepare().context("Failed to prepare renderer")?;
    let surface: Arc<dyn VideoSurface> = Arc::new(LogSurface::default());
    renderer.attach_surface(Some(surface));
    renderer.audio_play();
    clock.resume();
    renderer.render();

    let synth = SynthOptions {
        duration_ms: options.duration_ms,
        fps: options.fps,
    };
    let mut decoder = SynthDecoder::spawn(synth, pool.clone(), renderer.clone())
        .context("Failed to start decode thread")?;

    let budget = Duration::from_millis(options.duration_ms.max(0) as u64) + Duration::from_secs(5);
    let ended = end_rx.recv_timeout(budget);
    decoder.stop();
    if ended.is_err() {
        tracing::warn!("Stream did not end within {:?}, state: {}", budget, renderer.state());
    }

    renderer.release().context("Failed to release renderer")?;
    clock.pause();

    Ok(Summary {
        render: renderer.stats(),
        pool: pool.stats(),
        playback: listener.summary(),
    })
}

#[cfg(feature = "audio")]
fn open_audio_sink(done: AudioCompletion, depth: usize) -> Box<dyn AudioSink> {
    use avsync_core::cpal_sink::CpalAudioSink;

    match CpalAudioSink::open(done.clone(), depth, synth::SAMPLE_RATE, synth::CHANNELS) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            tracing::warn!("Audio device unavailable ({}), pacing audio without output", e);
            Box::new(PacedAudioSink::new(done, depth))
        }
    }
}

#[cfg(not(feature = "audio"))]
fn open_audio_sink(done: AudioCompletion, depth: usize) -> Box<dyn AudioSink> {
    Box::new(PacedAudioSink::new(done, depth))
}

fn load_config(path: Option<&PathBuf>) -> Result<PlayerConfig> {
    let Some(path) = path else {
        return Ok(PlayerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("Invalid config {}", path.display()))
}

fn parse_config(text: &str) -> Result<PlayerConfig> {
    Ok(serde_json::from_str(text)?)
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options {
        config: None,
        duration_ms: 2000,
        fps: 25,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                options.config = Some(PathBuf::from(value));
                i += 2;
            }
            "--duration-ms" | "-d" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --duration-ms"))?;
                options.duration_ms = value
                    .parse::<i64>()
                    .map_err(|e| anyhow::anyhow!("Invalid duration {}: {}", value, e))?;
                i += 2;
            }
            "--fps" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --fps"))?;
                options.fps = value
                    .parse::<u32>()
                    .map_err(|e| anyhow::anyhow!("Invalid fps {}: {}", value, e))?;
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    if options.fps == 0 {
        anyhow::bail!("--fps must be at least 1");
    }
    Ok(options)
}

fn print_usage() {
    eprintln!("\nUsage:\n  avsync [--config <file.json>] [--duration-ms <ms>] [--fps <n>]\n");
}
