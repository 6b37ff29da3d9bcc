//! Audio sink on the default cpal output device.
//!
//! Accepted buffers become chunks of 16-bit interleaved samples. The output
//! callback drains them in order and reports each chunk through the
//! completion handle as soon as its last sample has been written.

use std::collections::VecDeque;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;

use crate::buffer::BufferId;
use crate::error::SinkError;
use crate::sink::{AudioCompletion, AudioSink};

struct Chunk {
    id: BufferId,
    samples: Vec<i16>,
    cursor: usize,
}

/// Chunk queue shared with the output callback
struct Playback {
    chunks: VecDeque<Chunk>,
    completion: AudioCompletion,
}

impl Playback {
    /// Next sample, or silence when starved
    fn next_sample(&mut self) -> i16 {
        let Some(chunk) = self.chunks.front_mut() else {
            return 0;
        };
        let sample = chunk.samples.get(chunk.cursor).copied().unwrap_or(0);
        chunk.cursor += 1;
        if chunk.cursor >= chunk.samples.len() {
            let id = chunk.id;
            self.chunks.pop_front();
            self.completion.consumed(id);
        }
        sample
    }
}

pub struct CpalAudioSink {
    playback: Arc<Mutex<Playback>>,
    stream: Option<Stream>,
    depth: usize,
}

impl CpalAudioSink {
    /// Open the default output device at `sample_rate` Hz with `channels`
    /// interleaved channels. The stream starts paused.
    pub fn open(
        completion: AudioCompletion,
        depth: usize,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, SinkError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| SinkError::Device("No default output device".to_string()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| SinkError::Device(format!("Failed to get output config: {}", e)))?;

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let playback = Arc::new(Mutex::new(Playback {
            chunks: VecDeque::with_capacity(depth),
            completion,
        }));

        let stream = build_stream(&device, &config, supported.sample_format(), playback.clone())?;
        stream
            .pause()
            .map_err(|e| SinkError::Device(format!("Failed to pause stream: {}", e)))?;

        tracing::debug!(
            "Audio output on {:?}: {}Hz, {} channels, {:?}",
            device.name().ok(),
            sample_rate,
            channels,
            supported.sample_format()
        );

        Ok(Self {
            playback,
            stream: Some(stream),
            depth,
        })
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    playback: Arc<Mutex<Playback>>,
) -> Result<Stream, SinkError> {
    let err_fn = |err| tracing::error!("Audio stream error: {}", err);

    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut playback = playback.lock();
                for sample in data.iter_mut() {
                    *sample = playback.next_sample() as f32 / i16::MAX as f32;
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mut playback = playback.lock();
                for sample in data.iter_mut() {
                    *sample = playback.next_sample();
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            config,
            move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                let mut playback = playback.lock();
                for sample in data.iter_mut() {
                    *sample = (playback.next_sample() as i32 + 32768) as u16;
                }
            },
            err_fn,
            None,
        ),
        other => return Err(SinkError::Device(format!("Unsupported sample format {:?}", other))),
    };

    stream.map_err(|e| SinkError::Device(format!("Failed to build stream: {}", e)))
}

impl AudioSink for CpalAudioSink {
    fn enqueue(&mut self, id: BufferId, pcm: &[u8]) -> Result<(), SinkError> {
        if self.stream.is_none() {
            return Err(SinkError::Device("Stream released".to_string()));
        }
        let mut playback = self.playback.lock();
        if playback.chunks.len() >= self.depth {
            return Err(SinkError::QueueFull { depth: self.depth });
        }
        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        if samples.is_empty() {
            return Err(SinkError::Rejected(format!("{} has no samples", id)));
        }
        playback.chunks.push_back(Chunk {
            id,
            samples,
            cursor: 0,
        });
        Ok(())
    }

    fn clear(&mut self) {
        self.playback.lock().chunks.clear();
    }

    fn play(&mut self) -> Result<(), SinkError> {
        match &self.stream {
            Some(stream) => stream
                .play()
                .map_err(|e| SinkError::Device(format!("Failed to start stream: {}", e))),
            None => Err(SinkError::Device("Stream released".to_string())),
        }
    }

    fn pause(&mut self) -> Result<(), SinkError> {
        match &self.stream {
            Some(stream) => stream
                .pause()
                .map_err(|e| SinkError::Device(format!("Failed to pause stream: {}", e))),
            None => Err(SinkError::Device("Stream released".to_string())),
        }
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        self.playback.lock().chunks.clear();
    }
}
