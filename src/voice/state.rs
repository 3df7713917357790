//! Session lifecycle state machine.
//!
//! ```text
//! idle ─▸ ringing ─▸ connecting ─▸ connected ─▸ ending ─▸ idle
//!                        │             │
//!                        └──▸ error ◂──┘  (reset ─▸ idle)
//! ```
//!
//! Every transition is guarded: an operation invoked from a state that does
//! not permit it is rejected with `InvalidState` and has no side effects.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{VoiceError, VoiceResult};

// ── Status ─────────────────────────────────────────────────────────

/// Lifecycle status of one voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session activity; no resources held.
    Idle,
    /// Session object exists with scenario context; incoming "call" is
    /// ringing, nothing acquired yet.
    Ringing,
    /// User answered; resource acquisition and transport open in flight.
    Connecting,
    /// Transport open, capture pipeline active.
    Connected,
    /// User ended the call; teardown done, transcript retained for hand-off.
    Ending,
    /// Acquisition or transport failure; resources released. Exit via reset.
    Error,
}

// ── State machine ──────────────────────────────────────────────────

/// Guarded state for one session, with failure reason and start timestamp.
#[derive(Debug, Clone)]
pub struct SessionState {
    status: SessionStatus,
    started_at: Option<u64>,
    error_reason: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            started_at: None,
            error_reason: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Epoch-ms timestamp of when the session left `Idle`, if it has.
    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    pub fn error_reason(&self) -> Option<&str> {
        self.error_reason.as_deref()
    }

    /// `idle → ringing`. Session created; no resources acquired yet.
    /// Creating a session while one is live is rejected here.
    pub fn ring(&mut self) -> VoiceResult<()> {
        self.guard("ring", SessionStatus::Idle)?;
        self.started_at = Some(now_epoch_ms());
        self.set(SessionStatus::Ringing);
        Ok(())
    }

    /// `ringing → connecting`. Explicit user answer; acquisition begins.
    pub fn answer(&mut self) -> VoiceResult<()> {
        self.guard("answer", SessionStatus::Ringing)?;
        self.set(SessionStatus::Connecting);
        Ok(())
    }

    /// `connecting → connected`. Transport reported open.
    pub fn opened(&mut self) -> VoiceResult<()> {
        self.guard("opened", SessionStatus::Connecting)?;
        self.set(SessionStatus::Connected);
        Ok(())
    }

    /// `connecting|connected → error`. Acquisition or transport failure.
    pub fn fail(&mut self, reason: impl Into<String>) -> VoiceResult<()> {
        match self.status {
            SessionStatus::Connecting | SessionStatus::Connected => {
                self.error_reason = Some(reason.into());
                self.set(SessionStatus::Error);
                Ok(())
            }
            status => Err(VoiceError::InvalidState {
                action: "fail",
                status,
            }),
        }
    }

    /// `connected → ending`. Explicit user end; transcript retained.
    pub fn end(&mut self) -> VoiceResult<()> {
        self.guard("end", SessionStatus::Connected)?;
        self.set(SessionStatus::Ending);
        Ok(())
    }

    /// `ending → idle`. Hand-off to the evaluation collaborator completed.
    pub fn finish(&mut self) -> VoiceResult<()> {
        self.guard("finish", SessionStatus::Ending)?;
        self.set(SessionStatus::Idle);
        Ok(())
    }

    /// `error → idle`. Explicit user reset; clears the failure reason so a
    /// retry can re-enter `ringing`.
    pub fn reset(&mut self) -> VoiceResult<()> {
        self.guard("reset", SessionStatus::Error)?;
        self.error_reason = None;
        self.set(SessionStatus::Idle);
        Ok(())
    }

    fn guard(&self, action: &'static str, expected: SessionStatus) -> VoiceResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(VoiceError::InvalidState {
                action,
                status: self.status,
            })
        }
    }

    fn set(&mut self, status: SessionStatus) {
        info!(from = ?self.status, to = ?status, "Session transition");
        self.status = status;
    }
}

/// Current time in epoch milliseconds.
pub(crate) fn now_epoch_ms() -> u64 {
    u64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}

// ── Tests ──────────────────────────────────────────────────────────
