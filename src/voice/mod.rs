//! The realtime duplex voice session core.
//!
//! ## Design
//! - Explicit, enumerable event contract ([`VoiceEvent`]) between the
//!   transport and the rest of the session — no implicit callback wiring
//! - Pure PCM/base64 codec ([`pcm`]), cursor-chained gapless playback
//!   ([`playback`]), per-channel transcript assembly ([`transcript`])
//! - A guarded session lifecycle state machine ([`state`])
//! - Resource acquisition/release with mandatory idempotence ([`devices`])
//!
//! All mutation happens on the session's own event flow; components never
//! share resources across sessions.

pub mod devices;
pub mod error;
pub mod pcm;
pub mod playback;
pub mod realtime;
pub mod session;
pub mod state;
pub mod transcript;

use transcript::Channel;

// ── Shared voice event type ──────────────────────────────────────

/// Event produced by the duplex transport and dispatched to the session.
///
/// This is the complete contract with the remote voice service: audio in,
/// incremental transcripts per channel, turn boundaries, barge-in
/// interruption, errors, and closure. No other message types exist.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// The remote service accepted the session setup — ready to stream.
    Opened,
    /// Synthetic speech chunk, still in transport text encoding
    /// (base64 PCM16LE, 24 kHz mono). Decoded by [`pcm::decode_inbound`].
    Audio { payload: String },
    /// Incremental transcription fragment for one speaking channel.
    PartialTranscript { channel: Channel, text: String },
    /// The simulated customer finished a response turn.
    TurnComplete,
    /// The trainee started speaking mid-response; stop playback now.
    Interrupted,
    /// Error from the provider or the connection.
    Error { message: String },
    /// The connection has closed.
    Closed,
}
