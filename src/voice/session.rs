//! The roleplay session facade: one simulated customer call, end to end.
//!
//! ## Data flow
//!
//! ```text
//! start ─▸ ringing          (no resources acquired)
//! answer ─▸ acquire devices ─▸ open transport ─▸ spawn pumps
//!             mic ─▸ outbound pump ─▸ transport
//!             transport ─▸ event pump ─▸ dispatch_event
//! end ─▸ release ─▸ evaluation hand-off ─▸ idle
//! ```
//!
//! `dispatch_event` is the single, enumerable event table between the wire
//! and session state. Live resources sit in a `Mutex<Option<..>>` taken
//! exactly once, so release is idempotent from every path: normal end,
//! transport error, and remote close.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::devices::{ActiveDevices, CaptureHandle, DeviceManager};
use super::error::VoiceResult;
use super::pcm::{self, AudioChunk};
use super::playback::PlaybackScheduler;
use super::realtime::{DuplexTransport, TransportConnector};
use super::state::{now_epoch_ms, SessionState, SessionStatus};
use super::transcript::{TranscriptAssembler, TranscriptItem};
use super::VoiceEvent;
use crate::evaluation::EvaluationSink;
use crate::scenario::ScenarioContext;

// ── Statistics ─────────────────────────────────────────────────────

/// Counters handed to the analysis collaborator with the transcript.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Epoch ms when the call started ringing.
    pub started_at: Option<u64>,
    /// Epoch ms when the call ended.
    pub ended_at: Option<u64>,
    /// Inbound synthetic speech chunks scheduled for playback.
    pub audio_chunks_in: u64,
    /// Microphone chunks forwarded to the remote service.
    pub audio_chunks_out: u64,
    /// Committed conversation turns.
    pub turns: u64,
    /// Barge-in interruptions.
    pub interruptions: u64,
}

impl SessionStats {
    /// Call duration in milliseconds, once both endpoints are known.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

// ── Snapshot view ──────────────────────────────────────────────────

/// Cheap cloned snapshot of the session for a UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub status: SessionStatus,
    pub transcript: Vec<TranscriptItem>,
    pub stats: SessionStats,
    pub error_reason: Option<String>,
}

// ── Shared state ───────────────────────────────────────────────────

struct LiveResources {
    capture: CaptureHandle,
    transport: Arc<dyn DuplexTransport>,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
}

struct SessionShared {
    session_id: String,
    state: Mutex<SessionState>,
    transcript: Mutex<TranscriptAssembler>,
    stats: Mutex<SessionStats>,
    live: tokio::sync::Mutex<Option<LiveResources>>,
}

impl SessionShared {
    fn status(&self) -> SessionStatus {
        self.state.lock().status()
    }
}

/// Tear down live resources in order: stop capture, close transport, stop
/// playback. The `Option` is taken under the lock, so concurrent callers
/// release at most once and repeat calls are no-ops.
async fn release(shared: &SessionShared) {
    let resources = shared.live.lock().await.take();
    if let Some(mut resources) = resources {
        resources.capture.stop();
        resources.transport.close().await;
        resources.scheduler.lock().interrupt_all();
        info!(session_id = %shared.session_id, "Resources released");
    }
}

/// Route a failure into the error state and tear everything down.
async fn fail_and_release(shared: &SessionShared, reason: &str) {
    if let Err(e) = shared.state.lock().fail(reason) {
        // Already failed or already idle; keep the first reason.
        warn!(session_id = %shared.session_id, error = %e, "Late failure ignored");
    }
    release(shared).await;
}

// ── Event dispatch ─────────────────────────────────────────────────

/// The complete event table. Every transport event lands here and nowhere
/// else; there is no implicit callback wiring.
async fn dispatch_event(
    shared: &SessionShared,
    scheduler: &Arc<Mutex<PlaybackScheduler>>,
    event: VoiceEvent,
) {
    match event {
        VoiceEvent::Opened => {
            if let Err(e) = shared.state.lock().opened() {
                // Duplicate session-ready notifications are harmless.
                warn!(session_id = %shared.session_id, error = %e, "Redundant open");
            }
        }

        VoiceEvent::Audio { payload } => match pcm::decode_inbound(&payload) {
            Ok(chunk) => {
                scheduler.lock().enqueue(chunk);
                shared.stats.lock().audio_chunks_in += 1;
            }
            Err(e) => {
                // One bad chunk is a skip, not a session failure.
                warn!(session_id = %shared.session_id, error = %e, "Audio chunk dropped");
            }
        },

        VoiceEvent::PartialTranscript { channel, text } => {
            shared.transcript.lock().append_partial(channel, &text);
        }

        VoiceEvent::TurnComplete => {
            // A boundary with nothing accumulated (no transcript deltas
            // arrived) is not a conversation turn.
            if shared.transcript.lock().commit_turn() > 0 {
                shared.stats.lock().turns += 1;
            }
        }

        VoiceEvent::Interrupted => {
            scheduler.lock().interrupt_all();
            shared.stats.lock().interruptions += 1;
        }

        VoiceEvent::Error { message } => {
            fail_and_release(shared, &message).await;
        }

        VoiceEvent::Closed => match shared.status() {
            // Remote closed under a live call: that is a failure.
            SessionStatus::Connecting | SessionStatus::Connected => {
                fail_and_release(shared, "connection closed unexpectedly").await;
            }
            // Expected during teardown or after a failure already handled.
            _ => release(shared).await,
        },
    }
}

// ── Pumps ──────────────────────────────────────────────────────────

async fn event_pump(
    shared: Arc<SessionShared>,
    transport: Arc<dyn DuplexTransport>,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
) {
    while let Some(event) = transport.next_event().await {
        let closed = matches!(event, VoiceEvent::Closed);
        dispatch_event(&shared, &scheduler, event).await;
        if closed {
            break;
        }
    }
    info!(session_id = %shared.session_id, "Event pump terminated");
}

/// Forward microphone chunks while connected; frames captured in any other
/// state are stale and silently dropped.
async fn outbound_pump(
    shared: Arc<SessionShared>,
    transport: Arc<dyn DuplexTransport>,
    mut capture_rx: mpsc::UnboundedReceiver<AudioChunk>,
) {
    while let Some(chunk) = capture_rx.recv().await {
        if shared.status() != SessionStatus::Connected {
            continue;
        }
        if transport.send_audio(&chunk).await.is_err() {
            break;
        }
        shared.stats.lock().audio_chunks_out += 1;
    }
    info!(session_id = %shared.session_id, "Outbound pump terminated");
}

// ── Session facade ─────────────────────────────────────────────────

/// One roleplay call with a simulated customer.
///
/// The state machine guards every operation; resources are only held
/// between a successful `answer` and the matching release.
pub struct RoleplaySession {
    shared: Arc<SessionShared>,
    scenario: ScenarioContext,
    devices: Arc<dyn DeviceManager>,
    connector: Arc<dyn TransportConnector>,
    evaluation: Arc<dyn EvaluationSink>,
}

impl RoleplaySession {
    pub fn new(
        scenario: ScenarioContext,
        devices: Arc<dyn DeviceManager>,
        connector: Arc<dyn TransportConnector>,
        evaluation: Arc<dyn EvaluationSink>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                session_id: Uuid::new_v4().to_string(),
                state: Mutex::new(SessionState::new()),
                transcript: Mutex::new(TranscriptAssembler::new()),
                stats: Mutex::new(SessionStats::default()),
                live: tokio::sync::Mutex::new(None),
            }),
            scenario,
            devices,
            connector,
            evaluation,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    /// Present the incoming call: `idle → ringing`. No resources yet.
    /// Starting while a call is live is rejected by the state guard.
    pub fn start(&self) -> VoiceResult<()> {
        self.shared.state.lock().ring()?;
        *self.shared.transcript.lock() = TranscriptAssembler::new();
        *self.shared.stats.lock() = SessionStats {
            started_at: Some(now_epoch_ms()),
            ..SessionStats::default()
        };
        info!(
            session_id = %self.shared.session_id,
            scenario_id = %self.scenario.id,
            "Incoming call ringing"
        );
        Ok(())
    }

    /// Answer the call: acquire devices, open the transport, and wire the
    /// capture and event pumps. `ringing → connecting`; the transport's
    /// session-ready event drives `connecting → connected`.
    pub async fn answer(&self) -> VoiceResult<()> {
        self.shared.state.lock().answer()?;

        let (capture_tx, capture_rx) = mpsc::unbounded_channel();

        let devices = match self.devices.acquire(&self.shared.session_id, capture_tx) {
            Ok(devices) => devices,
            Err(e) => {
                fail_and_release(&self.shared, &e.to_string()).await;
                return Err(e);
            }
        };

        let transport = match self
            .connector
            .connect(&self.shared.session_id, &self.scenario)
            .await
        {
            Ok(transport) => transport,
            Err(e) => {
                drop(devices);
                fail_and_release(&self.shared, &e.to_string()).await;
                return Err(e);
            }
        };

        let ActiveDevices { capture, output } = devices;
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(output)));

        *self.shared.live.lock().await = Some(LiveResources {
            capture,
            transport: Arc::clone(&transport),
            scheduler: Arc::clone(&scheduler),
        });

        tokio::spawn(event_pump(
            Arc::clone(&self.shared),
            Arc::clone(&transport),
            scheduler,
        ));
        tokio::spawn(outbound_pump(
            Arc::clone(&self.shared),
            transport,
            capture_rx,
        ));

        info!(session_id = %self.shared.session_id, "Call answered, streaming wired");
        Ok(())
    }

    /// End the call: commit any dangling drafts, release everything, hand
    /// the transcript to the evaluation collaborator exactly once, and
    /// return to idle.
    pub async fn end(&self) -> VoiceResult<SessionView> {
        self.shared.state.lock().end()?;

        self.shared.transcript.lock().commit_turn();
        self.shared.stats.lock().ended_at = Some(now_epoch_ms());
        release(&self.shared).await;

        let transcript = self.shared.transcript.lock().transcript().to_vec();
        let stats = self.shared.stats.lock().clone();
        if let Err(e) = self
            .evaluation
            .submit(&self.scenario, &transcript, &stats)
            .await
        {
            // The call itself succeeded; a lost hand-off is logged, not fatal.
            warn!(session_id = %self.shared.session_id, error = %e, "Evaluation hand-off failed");
        }

        self.shared.state.lock().finish()?;
        info!(
            session_id = %self.shared.session_id,
            turns = stats.turns,
            duration_ms = stats.duration_ms().unwrap_or(0),
            "Call ended"
        );
        Ok(self.view())
    }

    /// Acknowledge a failure: `error → idle`. Releases anything still held
    /// (normally nothing; failure paths release eagerly).
    pub async fn reset(&self) -> VoiceResult<()> {
        self.shared.state.lock().reset()?;
        release(&self.shared).await;
        info!(session_id = %self.shared.session_id, "Session reset");
        Ok(())
    }

    /// Read-only snapshot for the UI layer.
    pub fn view(&self) -> SessionView {
        let state = self.shared.state.lock();
        SessionView {
            session_id: self.shared.session_id.clone(),
            status: state.status(),
            transcript: self.shared.transcript.lock().transcript().to_vec(),
            stats: self.shared.stats.lock().clone(),
            error_reason: state.error_reason().map(str::to_string),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
