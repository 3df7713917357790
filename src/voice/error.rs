//! Error types for the voice session core.

use thiserror::Error;

use super::state::SessionStatus;

/// Result type alias for voice operations.
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur inside a voice session.
///
/// Only [`VoiceError::Decode`] is recovered locally (the offending chunk is
/// dropped and the session continues); every other variant routes the session
/// into the `Error` state and releases all acquired resources.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Microphone permission was refused by the platform.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No usable input/output device, or the device vanished mid-acquire.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The duplex connection could not be established.
    #[error("transport open failed: {0}")]
    TransportOpenFailed(String),

    /// The established connection failed mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound payload was not validly encoded. Recoverable per chunk.
    #[error("decode error: {0}")]
    Decode(String),

    /// An operation was invoked in a state that forbids it. Programming
    /// contract violation — surfaced to the caller, never retried.
    #[error("operation '{action}' is not legal while {status:?}")]
    InvalidState {
        action: &'static str,
        status: SessionStatus,
    },
}
