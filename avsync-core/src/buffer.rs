//! # Media Buffers
//!
//! A `MediaBuffer` is the handle for one decoded frame travelling between the
//! decoder and the output sinks. It is never cloned: whoever holds the value
//! owns the frame, and every hand-off is a move.
//!
//! ```text
//! ┌─────────────┐ request ┌──────────────┐ dispatch ┌────────────┐
//! │ Decode pool │────────►│ RenderCore   │─────────►│ Sink       │
//! │             │◄────────│ (queues)     │◄─────────│ (audio)    │
//! └─────────────┘ return  └──────────────┘ consumed └────────────┘
//! ```

use serde::{Deserialize, Serialize};

// ============================================================================
// Identity & Kind
// ============================================================================

/// Unique identity of a pooled buffer. Stable for the buffer's whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u64);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which elementary stream a buffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    pub(crate) fn index(self) -> usize {
        match self {
            StreamKind::Audio => 0,
            StreamKind::Video => 1,
        }
    }
}

/// Outcome the decoder recorded when filling the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeResult {
    Success,
    Failure,
}

// ============================================================================
// Pixel Formats
// ============================================================================

/// Pixel layout of a decoded video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0 (Y, U, V planes)
    Yuv420p,
    /// Semi-planar YUV 4:2:0, interleaved UV
    Nv12,
    /// Semi-planar YUV 4:2:0, interleaved VU
    Nv21,
    /// Packed RGBA, one plane
    Rgba,
    /// Anything the decoder could not map onto the formats above
    Unknown,
}

impl PixelFormat {
    /// Number of planes the display surface expects for this format
    pub fn plane_count(self) -> usize {
        match self {
            Self::Yuv420p => 3,
            Self::Nv12 | Self::Nv21 => 2,
            Self::Rgba => 1,
            Self::Unknown => 0,
        }
    }

    /// Tightly packed plane sizes for a frame of the given dimensions
    pub fn plane_sizes(self, width: u32, height: u32) -> Vec<usize> {
        let w = width as usize;
        let h = height as usize;
        let chroma = w.div_ceil(2) * h.div_ceil(2);
        match self {
            Self::Yuv420p => vec![w * h, chroma, chroma],
            Self::Nv12 | Self::Nv21 => vec![w * h, chroma * 2],
            Self::Rgba => vec![w * h * 4],
            Self::Unknown => Vec::new(),
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Decoded video planes plus geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPlanes {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Vec<u8>>,
}

#[derive(Debug)]
enum Payload {
    /// Interleaved signed 16-bit little-endian PCM
    Audio(Vec<u8>),
    Video(VideoPlanes),
}

// ============================================================================
// Media Buffer
// ============================================================================

/// One decoded frame plus its metadata
#[derive(Debug)]
pub struct MediaBuffer {
    id: BufferId,
    kind: StreamKind,
    pts_ms: i64,
    end_of_stream: bool,
    decode_result: DecodeResult,
    payload: Payload,
}

impl MediaBuffer {
    /// Allocate an empty audio buffer
    pub fn audio(id: BufferId) -> Self {
        Self {
            id,
            kind: StreamKind::Audio,
            pts_ms: 0,
            end_of_stream: false,
            decode_result: DecodeResult::Success,
            payload: Payload::Audio(Vec::new()),
        }
    }

    /// Allocate an empty video buffer
    pub fn video(id: BufferId) -> Self {
        Self {
            id,
            kind: StreamKind::Video,
            pts_ms: 0,
            end_of_stream: false,
            decode_result: DecodeResult::Success,
            payload: Payload::Video(VideoPlanes {
                width: 0,
                height: 0,
                format: PixelFormat::Unknown,
                planes: Vec::new(),
            }),
        }
    }

    /// Allocate an empty buffer of the given kind
    pub fn new(id: BufferId, kind: StreamKind) -> Self {
        match kind {
            StreamKind::Audio => Self::audio(id),
            StreamKind::Video => Self::video(id),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Presentation timestamp in stream milliseconds
    pub fn pts_ms(&self) -> i64 {
        self.pts_ms
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn decode_result(&self) -> DecodeResult {
        self.decode_result
    }

    /// Video planes, `None` for audio buffers
    pub fn video_planes(&self) -> Option<&VideoPlanes> {
        match &self.payload {
            Payload::Video(v) => Some(v),
            Payload::Audio(_) => None,
        }
    }

    /// PCM bytes, empty for video buffers
    pub fn pcm(&self) -> &[u8] {
        match &self.payload {
            Payload::Audio(pcm) => pcm,
            Payload::Video(_) => &[],
        }
    }

    /// Size in bytes of plane `index`, 0 when out of range
    pub fn plane_size(&self, index: usize) -> usize {
        self.video_planes()
            .and_then(|v| v.planes.get(index))
            .map_or(0, Vec::len)
    }

    /// Copy plane `index` into `dst`, which must already be sized for it.
    /// Returns the number of bytes copied.
    pub fn copy_plane(&self, index: usize, dst: &mut [u8]) -> usize {
        let Some(src) = self.video_planes().and_then(|v| v.planes.get(index)) else {
            return 0;
        };
        let len = src.len().min(dst.len());
        dst[..len].copy_from_slice(&src[..len]);
        len
    }

    // ========================================================================
    // Decoder-side fill API
    // ========================================================================

    /// Refill as an audio frame. Keeps the allocation.
    pub fn fill_audio(&mut self, pts_ms: i64, pcm: &[u8]) {
        debug_assert_eq!(self.kind, StreamKind::Audio);
        self.pts_ms = pts_ms;
        self.end_of_stream = false;
        self.decode_result = DecodeResult::Success;
        if let Payload::Audio(buf) = &mut self.payload {
            buf.clear();
            buf.extend_from_slice(pcm);
        }
    }

    /// Refill as a video frame. Plane allocations are reused when they fit.
    pub fn fill_video(&mut self, pts_ms: i64, width: u32, height: u32, format: PixelFormat, planes: &[&[u8]]) {
        debug_assert_eq!(self.kind, StreamKind::Video);
        self.pts_ms = pts_ms;
        self.end_of_stream = false;
        self.decode_result = DecodeResult::Success;
        if let Payload::Video(v) = &mut self.payload {
            v.width = width;
            v.height = height;
            v.format = format;
            v.planes.resize_with(planes.len(), Vec::new);
            for (dst, src) in v.planes.iter_mut().zip(planes) {
                dst.clear();
                dst.extend_from_slice(src);
            }
        }
    }

    /// Turn this buffer into the end-of-stream marker
    pub fn mark_end_of_stream(&mut self, pts_ms: i64) {
        self.pts_ms = pts_ms;
        self.end_of_stream = true;
        self.decode_result = DecodeResult::Success;
        match &mut self.payload {
            Payload::Audio(pcm) => pcm.clear(),
            Payload::Video(v) => v.planes.clear(),
        }
    }

    pub fn set_decode_result(&mut self, result: DecodeResult) {
        self.decode_result = result;
    }
}
