//! # Decode Pool - Buffer Exchange Between Decoder and Renderer
//!
//! Buffers are allocated once and recycled for the whole playback:
//!
//! ```text
//!        acquire_decode_buffer        submit_decoded
//!  free ─────────────────────► decoder ─────────────► ready
//!   ▲                                                   │
//!   │ return_buffer                request_render_buffer│
//!   └──────────────────────── renderer ◄────────────────┘
//! ```
//!
//! `requeue_render_buffer` puts a buffer back at the *front* of the ready
//! list so a paused frame plays before anything decoded after it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::buffer::{BufferId, MediaBuffer, StreamKind};
use crate::source::{MediaInfo, MediaSource};

/// Scratch buffers kept around for reuse
const MAX_POOLED_SCRATCH: usize = 32;

#[derive(Default)]
struct Lists {
    free: VecDeque<MediaBuffer>,
    ready: VecDeque<MediaBuffer>,
}

/// Pre-allocated buffer pool shared by the decoder and the renderer
pub struct DecodePool {
    lists: [Mutex<Lists>; 2],
    scratch: Mutex<Vec<Vec<u8>>>,
    /// Stream duration, negative while no media is open
    duration_ms: AtomicI64,
    returned: AtomicU64,
    requeued: AtomicU64,
    scratch_allocated: AtomicU64,
    scratch_recycled: AtomicU64,
}

impl DecodePool {
    /// Create a pool with the given number of buffers per stream
    pub fn new(audio_buffers: usize, video_buffers: usize) -> Self {
        let mut next_id = 0u64;
        let mut alloc = |kind: StreamKind, count: usize| {
            let mut lists = Lists::default();
            for _ in 0..count {
                lists.free.push_back(MediaBuffer::new(BufferId(next_id), kind));
                next_id += 1;
            }
            Mutex::new(lists)
        };
        let audio = alloc(StreamKind::Audio, audio_buffers);
        let video = alloc(StreamKind::Video, video_buffers);

        Self {
            lists: [audio, video],
            scratch: Mutex::new(Vec::new()),
            duration_ms: AtomicI64::new(-1),
            returned: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            scratch_allocated: AtomicU64::new(0),
            scratch_recycled: AtomicU64::new(0),
        }
    }

    fn lists(&self, kind: StreamKind) -> &Mutex<Lists> {
        &self.lists[kind.index()]
    }

    /// Publish the media duration; enables `media_info()`
    pub fn set_media_info(&self, info: Option<MediaInfo>) {
        let value = info.map_or(-1, |i| i.duration_ms.max(0));
        self.duration_ms.store(value, Ordering::Release);
    }

    // ========================================================================
    // Decoder API
    // ========================================================================

    /// Take an empty buffer to decode into. `None` when every buffer is in use.
    pub fn acquire_decode_buffer(&self, kind: StreamKind) -> Option<MediaBuffer> {
        self.lists(kind).lock().free.pop_front()
    }

    /// Hand a filled buffer to the renderer side
    pub fn submit_decoded(&self, buffer: MediaBuffer) {
        self.lists(buffer.kind()).lock().ready.push_back(buffer);
    }

    // ========================================================================
    // Status API
    // ========================================================================

    pub fn stats(&self) -> PoolStats {
        let audio = self.lists(StreamKind::Audio).lock();
        let video = self.lists(StreamKind::Video).lock();
        PoolStats {
            free_audio: audio.free.len(),
            ready_audio: audio.ready.len(),
            free_video: video.free.len(),
            ready_video: video.ready.len(),
            returned: self.returned.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            scratch_allocated: self.scratch_allocated.load(Ordering::Relaxed),
            scratch_recycled: self.scratch_recycled.load(Ordering::Relaxed),
        }
    }

    /// Ids currently on the ready list of `kind`, in order
    #[cfg(test)]
    pub fn ready_ids(&self, kind: StreamKind) -> Vec<BufferId> {
        self.lists(kind).lock().ready.iter().map(MediaBuffer::id).collect()
    }
}

impl MediaSource for DecodePool {
    fn request_render_buffer(&self, kind: StreamKind) -> Option<MediaBuffer> {
        self.lists(kind).lock().ready.pop_front()
    }

    fn return_buffer(&self, buffer: MediaBuffer) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        let mut lists = self.lists(buffer.kind()).lock();
        debug_assert!(
            lists.free.iter().all(|b| b.id() != buffer.id()),
            "buffer {} returned twice",
            buffer.id()
        );
        lists.free.push_back(buffer);
    }

    fn requeue_render_buffer(&self, buffer: MediaBuffer) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
        self.lists(buffer.kind()).lock().ready.push_front(buffer);
    }

    fn request_scratch(&self, len: usize) -> Vec<u8> {
        let mut pool = self.scratch.lock();
        if let Some(pos) = pool.iter().position(|s| s.capacity() >= len) {
            let mut scratch = pool.swap_remove(pos);
            drop(pool);
            self.scratch_recycled.fetch_add(1, Ordering::Relaxed);
            scratch.clear();
            scratch.resize(len, 0);
            scratch
        } else {
            drop(pool);
            self.scratch_allocated.fetch_add(1, Ordering::Relaxed);
            vec![0u8; len]
        }
    }

    fn return_scratch(&self, scratch: Vec<u8>) {
        let mut pool = self.scratch.lock();
        if pool.len() < MAX_POOLED_SCRATCH {
            pool.push(scratch);
        }
    }

    fn media_info(&self) -> Option<MediaInfo> {
        let duration_ms = self.duration_ms.load(Ordering::Acquire);
        (duration_ms >= 0).then_some(MediaInfo { duration_ms })
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub free_audio: usize,
    pub ready_audio: usize,
    pub free_video: usize,
    pub ready_video: usize,
    pub returned: u64,
    pub requeued: u64,
    pub scratch_allocated: u64,
    pub scratch_recycled: u64,
}
