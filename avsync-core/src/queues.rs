//! # Render Queues
//!
//! Buffers held by the renderer live in exactly one of three FIFO queues:
//!
//! - pending video: scheduled, waiting for their `RenderVideo` event
//! - pending audio: scheduled, waiting for their `RenderAudio` event
//! - in-flight audio: accepted by the audio sink, waiting for it to finish
//!
//! A pending entry carries the key of its scheduled event so the two are
//! always added and removed together. A ledger tags every held buffer with its
//! location; `check_invariants` cross-checks it against the queues.

use std::collections::{HashMap, VecDeque};

use crate::buffer::{BufferId, MediaBuffer, StreamKind};
use crate::timer::TimerKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLocation {
    PendingVideo,
    PendingAudio,
    InFlightAudio,
}

impl BufferLocation {
    fn pending(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Video => BufferLocation::PendingVideo,
            StreamKind::Audio => BufferLocation::PendingAudio,
        }
    }
}

#[derive(Debug)]
struct Pending {
    buffer: MediaBuffer,
    timer: TimerKey,
}

#[derive(Debug, Default)]
pub struct BufferQueues {
    pending_video: VecDeque<Pending>,
    pending_audio: VecDeque<Pending>,
    in_flight_audio: VecDeque<MediaBuffer>,
    ledger: HashMap<BufferId, BufferLocation>,
}

impl BufferQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending_mut(&mut self, kind: StreamKind) -> &mut VecDeque<Pending> {
        match kind {
            StreamKind::Video => &mut self.pending_video,
            StreamKind::Audio => &mut self.pending_audio,
        }
    }

    fn track(&mut self, id: BufferId, location: BufferLocation) {
        let previous = self.ledger.insert(id, location);
        debug_assert!(previous.is_none(), "buffer {id} already held at {previous:?}");
    }

    fn untrack(&mut self, id: BufferId, expected: BufferLocation) {
        let previous = self.ledger.remove(&id);
        debug_assert_eq!(previous, Some(expected), "buffer {id} not where the ledger says");
    }

    // ========================================================================
    // Pending
    // ========================================================================

    /// Queue a scheduled buffer behind the current backlog
    pub fn push_pending(&mut self, buffer: MediaBuffer, timer: TimerKey) {
        let kind = buffer.kind();
        self.track(buffer.id(), BufferLocation::pending(kind));
        self.pending_mut(kind).push_back(Pending { buffer, timer });
    }

    /// Queue a scheduled buffer ahead of the current backlog
    pub fn push_pending_front(&mut self, buffer: MediaBuffer, timer: TimerKey) {
        let kind = buffer.kind();
        self.track(buffer.id(), BufferLocation::pending(kind));
        self.pending_mut(kind).push_front(Pending { buffer, timer });
    }

    /// Remove the buffer whose event `timer` just fired
    pub fn take_pending(&mut self, kind: StreamKind, timer: TimerKey) -> Option<MediaBuffer> {
        let queue = self.pending_mut(kind);
        let pos = queue.iter().position(|p| p.timer == timer)?;
        let entry = queue.remove(pos)?;
        self.untrack(entry.buffer.id(), BufferLocation::pending(kind));
        Some(entry.buffer)
    }

    /// Remove the newest pending buffer together with its event key
    pub fn pop_pending_back(&mut self, kind: StreamKind) -> Option<(MediaBuffer, TimerKey)> {
        let entry = self.pending_mut(kind).pop_back()?;
        self.untrack(entry.buffer.id(), BufferLocation::pending(kind));
        Some((entry.buffer, entry.timer))
    }

    pub fn pending_len(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Video => self.pending_video.len(),
            StreamKind::Audio => self.pending_audio.len(),
        }
    }

    // ========================================================================
    // In-flight audio
    // ========================================================================

    pub fn push_in_flight(&mut self, buffer: MediaBuffer) {
        self.track(buffer.id(), BufferLocation::InFlightAudio);
        self.in_flight_audio.push_back(buffer);
    }

    /// Remove the in-flight buffer the sink finished with. Normally the head.
    pub fn take_in_flight(&mut self, id: BufferId) -> Option<MediaBuffer> {
        let pos = self.in_flight_audio.iter().position(|b| b.id() == id)?;
        if pos != 0 {
            tracing::warn!("Audio sink completed {} out of order (position {})", id, pos);
        }
        let buffer = self.in_flight_audio.remove(pos)?;
        self.untrack(id, BufferLocation::InFlightAudio);
        Some(buffer)
    }

    /// Empty the in-flight queue, oldest first
    pub fn drain_in_flight(&mut self) -> Vec<MediaBuffer> {
        let drained: Vec<MediaBuffer> = self.in_flight_audio.drain(..).collect();
        for b in &drained {
            self.untrack(b.id(), BufferLocation::InFlightAudio);
        }
        drained
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight_audio.len()
    }

    // ========================================================================
    // Ledger
    // ========================================================================

    #[cfg(test)]
    pub fn location(&self, id: BufferId) -> Option<BufferLocation> {
        self.ledger.get(&id).copied()
    }

    /// Total buffers held by the renderer
    pub fn held(&self) -> usize {
        self.ledger.len()
    }

    /// Verify every queued buffer is tagged with its queue and nothing else
    /// is tagged. Returns a description of the first mismatch.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen = HashMap::new();
        let queued = self
            .pending_video
            .iter()
            .map(|p| (p.buffer.id(), BufferLocation::PendingVideo))
            .chain(self.pending_audio.iter().map(|p| (p.buffer.id(), BufferLocation::PendingAudio)))
            .chain(self.in_flight_audio.iter().map(|b| (b.id(), BufferLocation::InFlightAudio)));

        for (id, location) in queued {
            if let Some(other) = seen.insert(id, location) {
                return Err(format!("buffer {id} queued twice ({other:?} and {location:?})"));
            }
            if self.ledger.get(&id) != Some(&location) {
                return Err(format!("buffer {id} in {location:?} but ledger says {:?}", self.ledger.get(&id)));
            }
        }
        if seen.len() != self.ledger.len() {
            return Err(format!("ledger tracks {} buffers, queues hold {}", self.ledger.len(), seen.len()));
        }
        Ok(())
    }
}
