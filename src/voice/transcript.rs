//! Turn-by-turn transcript assembly from incremental transcription events.
//!
//! The remote service streams partial text per speaking channel; a turn
//! boundary commits whatever accumulated. Committed items are immutable and
//! appended in chronological order, ready for the evaluation hand-off.

use serde::{Deserialize, Serialize};
use tracing::debug;

// ── Channels ───────────────────────────────────────────────────────

/// The two speaking channels of a roleplay call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// The human trainee (local microphone).
    Trainee,
    /// The simulated AI customer (remote party).
    Customer,
}

/// One immutable committed utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub speaker: Channel,
    pub text: String,
}

// ── Assembler ──────────────────────────────────────────────────────

/// Accumulates partial fragments per channel and commits once per turn.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    trainee_draft: String,
    customer_draft: String,
    transcript: Vec<TranscriptItem>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment to the named channel's draft. Fragments arrive in
    /// order; no upper bound is enforced.
    pub fn append_partial(&mut self, channel: Channel, fragment: &str) {
        match channel {
            Channel::Trainee => self.trainee_draft.push_str(fragment),
            Channel::Customer => self.customer_draft.push_str(fragment),
        }
    }

    /// Commit the current drafts as transcript items and clear them.
    ///
    /// One item per non-empty channel, trainee before customer for
    /// determinism. Returns the number of items produced; zero when both
    /// drafts were empty (no empty item is ever committed).
    pub fn commit_turn(&mut self) -> usize {
        let mut committed = 0;
        if !self.trainee_draft.is_empty() {
            self.transcript.push(TranscriptItem {
                speaker: Channel::Trainee,
                text: std::mem::take(&mut self.trainee_draft),
            });
            committed += 1;
        }
        if !self.customer_draft.is_empty() {
            self.transcript.push(TranscriptItem {
                speaker: Channel::Customer,
                text: std::mem::take(&mut self.customer_draft),
            });
            committed += 1;
        }
        if committed > 0 {
            debug!(items = committed, total = self.transcript.len(), "Turn committed");
        }
        committed
    }

    /// The committed transcript so far, chronological.
    pub fn transcript(&self) -> &[TranscriptItem] {
        &self.transcript
    }

    /// Whether either channel holds uncommitted draft text.
    pub fn has_draft(&self) -> bool {
        !self.trainee_draft.is_empty() || !self.customer_draft.is_empty()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
