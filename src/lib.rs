//! # RepCall — realtime duplex voice core for roleplay training
//!
//! A trainee converses by voice with a simulated AI customer over one
//! persistent, bidirectional WebSocket session. This crate is that session:
//! microphone capture, PCM encoding, duplex streaming, gapless playback
//! scheduling, turn-by-turn transcript assembly, and barge-in interruption.
//!
//! ## Architecture
//!
//! ```text
//! mic ─▸ pcm::encode_outbound ─▸ RealtimeTransport ⇄ remote voice service
//!                                        │
//!                 ┌──────────────────────┼──────────────────────┐
//!                 ▼                      ▼                      ▼
//!        pcm::decode_inbound   TranscriptAssembler      SessionState
//!                 │             (partials + commits)   (idle → … → idle)
//!                 ▼
//!        PlaybackScheduler ─▸ speaker (gapless, interruptible)
//! ```
//!
//! Scenario selection, history browsing, and transcript scoring live in
//! external collaborators; the [`scenario`] and [`evaluation`] modules define
//! only the interfaces this core consumes.

pub mod config;
pub mod evaluation;
pub mod scenario;
pub mod voice;

pub use config::RealtimeConfig;
pub use evaluation::{EvaluationSink, NullEvaluationSink};
pub use scenario::ScenarioContext;
pub use voice::devices::{ActiveDevices, CaptureHandle, CpalDevices, DeviceManager, RodioOutput};
pub use voice::error::{VoiceError, VoiceResult};
pub use voice::pcm::{AudioChunk, INBOUND_SAMPLE_RATE, OUTBOUND_SAMPLE_RATE};
pub use voice::playback::{OutputSink, PlaybackHandle, PlaybackScheduler};
pub use voice::realtime::{
    DuplexTransport, RealtimeConnector, RealtimeTransport, TransportConnector,
};
pub use voice::session::{RoleplaySession, SessionStats, SessionView};
pub use voice::state::{SessionState, SessionStatus};
pub use voice::transcript::{Channel, TranscriptAssembler, TranscriptItem};
pub use voice::VoiceEvent;
