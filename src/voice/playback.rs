//! Gapless playback scheduling for inbound synthetic speech.
//!
//! Consecutive chunks must play back-to-back with no audible gap. The
//! scheduler keeps a monotonically advancing cursor — the next available
//! start time — and chains each chunk at `max(cursor, now)`, advancing the
//! cursor by the chunk's duration instead of re-reading the wall clock.
//! Barge-in stops every live handle at once and leaves the cursor alone.

use std::time::Instant;

use tracing::{debug, warn};

use super::pcm::AudioChunk;

// ── Output sink ────────────────────────────────────────────────────

/// Destination for decoded audio. The production implementation appends to
/// a rodio sink on a dedicated playback thread; tests record calls.
pub trait OutputSink: Send {
    /// Queue one chunk for playback.
    fn play(&self, chunk: &AudioChunk);
    /// Immediately stop everything queued and playing.
    fn stop(&self);
}

// ── Playback handle ────────────────────────────────────────────────

/// One scheduled, currently-playing-or-pending chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackHandle {
    /// Enqueue sequence number (playback order).
    pub seq: u64,
    /// Computed start time.
    pub starts_at: Instant,
    /// Computed end time (`starts_at + duration`).
    pub ends_at: Instant,
}

// ── Scheduler ──────────────────────────────────────────────────────

/// Schedules inbound chunks on an output sink, back-to-back.
pub struct PlaybackScheduler {
    sink: Box<dyn OutputSink>,
    /// Next available start time. Monotonically non-decreasing; never reset,
    /// not even by interruption.
    cursor: Option<Instant>,
    handles: Vec<PlaybackHandle>,
    next_seq: u64,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        Self {
            sink,
            cursor: None,
            handles: Vec::new(),
            next_seq: 0,
        }
    }

    /// Schedule one chunk starting at `max(cursor, now)` and advance the
    /// cursor by its duration. Returns the registered handle.
    pub fn enqueue(&mut self, chunk: AudioChunk) -> PlaybackHandle {
        let now = Instant::now();
        self.prune(now);

        let starts_at = match self.cursor {
            Some(cursor) if cursor > now => cursor,
            _ => now,
        };
        let ends_at = starts_at + chunk.duration();
        self.cursor = Some(ends_at);

        let handle = PlaybackHandle {
            seq: self.next_seq,
            starts_at,
            ends_at,
        };
        self.next_seq += 1;
        self.handles.push(handle);

        self.sink.play(&chunk);
        debug!(seq = handle.seq, ms = chunk.duration().as_millis() as u64, "Chunk scheduled");
        handle
    }

    /// Stop every live handle and clear the set. Idempotent: with no live
    /// handles this is a no-op, and the cursor is never touched — a fresh
    /// enqueue after interruption still starts no earlier than `now`.
    pub fn interrupt_all(&mut self) {
        self.prune(Instant::now());
        if self.handles.is_empty() {
            return;
        }
        warn!(stopped = self.handles.len(), "Playback interrupted");
        self.sink.stop();
        self.handles.clear();
    }

    /// Handles that have not yet reached their computed end time.
    pub fn live_handles(&mut self) -> &[PlaybackHandle] {
        self.prune(Instant::now());
        &self.handles
    }

    /// The next available start time, if any chunk was ever enqueued.
    pub fn cursor(&self) -> Option<Instant> {
        self.cursor
    }

    /// Drop handles whose playback has naturally completed.
    fn prune(&mut self, now: Instant) {
        self.handles.retain(|h| h.ends_at > now);
    }
}

// ── Tests ──────────────────────────────────────────────────────────
