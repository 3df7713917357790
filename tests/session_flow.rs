//! Full session lifecycle against a scripted transport and fake devices.
//!
//! No real microphone, speaker, or network is involved; the mock transport
//! replays provider events and records what the session sends back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use repcall::voice::pcm;
use repcall::{
    ActiveDevices, AudioChunk, CaptureHandle, Channel, DeviceManager, DuplexTransport,
    EvaluationSink, OutputSink, RoleplaySession, ScenarioContext, SessionStats, SessionStatus,
    TranscriptItem, TransportConnector, VoiceError, VoiceEvent, VoiceResult,
};

// ── Scripted transport ─────────────────────────────────────────────

struct MockTransport {
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<VoiceEvent>>,
    event_tx: mpsc::UnboundedSender<VoiceEvent>,
    sent_chunks: Mutex<Vec<usize>>,
    closes: AtomicUsize,
}

impl MockTransport {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<VoiceEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            events: tokio::sync::Mutex::new(event_rx),
            event_tx: event_tx.clone(),
            sent_chunks: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        });
        (transport, event_tx)
    }

    fn sent_count(&self) -> usize {
        self.sent_chunks.lock().unwrap().len()
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DuplexTransport for MockTransport {
    async fn send_audio(&self, chunk: &AudioChunk) -> VoiceResult<()> {
        self.sent_chunks.lock().unwrap().push(chunk.data.len());
        Ok(())
    }

    async fn next_event(&self) -> Option<VoiceEvent> {
        self.events.lock().await.recv().await
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        // A closed socket ends the inbound stream with a final event.
        let _ = self.event_tx.send(VoiceEvent::Closed);
    }
}

struct MockConnector {
    transport: Arc<MockTransport>,
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(
        &self,
        _session_id: &str,
        _scenario: &ScenarioContext,
    ) -> VoiceResult<Arc<dyn DuplexTransport>> {
        Ok(Arc::clone(&self.transport) as Arc<dyn DuplexTransport>)
    }
}

// ── Fake devices ───────────────────────────────────────────────────

#[derive(Default)]
struct RecordingSink {
    played: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
}

impl OutputSink for RecordingSink {
    fn play(&self, _chunk: &AudioChunk) {
        self.played.fetch_add(1, Ordering::SeqCst);
    }
    fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeDevices {
    capture_tx: Mutex<Option<mpsc::UnboundedSender<AudioChunk>>>,
    played: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
}

impl FakeDevices {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            capture_tx: Mutex::new(None),
            played: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The capture sender handed out at acquisition, for driving fake mic
    /// input from the test.
    fn mic(&self) -> mpsc::UnboundedSender<AudioChunk> {
        self.capture_tx
            .lock()
            .unwrap()
            .clone()
            .expect("devices not acquired yet")
    }
}

impl DeviceManager for FakeDevices {
    fn acquire(
        &self,
        _session_id: &str,
        capture_tx: mpsc::UnboundedSender<AudioChunk>,
    ) -> VoiceResult<ActiveDevices> {
        *self.capture_tx.lock().unwrap() = Some(capture_tx);
        let (stop_tx, _stop_rx) = std::sync::mpsc::channel();
        Ok(ActiveDevices {
            capture: CaptureHandle::detached(stop_tx),
            output: Box::new(RecordingSink {
                played: Arc::clone(&self.played),
                stopped: Arc::clone(&self.stopped),
            }),
        })
    }
}

// ── Recording evaluation sink ──────────────────────────────────────

#[derive(Default)]
struct RecordingEvaluation {
    submissions: Mutex<Vec<(String, Vec<TranscriptItem>, u64)>>,
}

#[async_trait]
impl EvaluationSink for RecordingEvaluation {
    async fn submit(
        &self,
        scenario: &ScenarioContext,
        transcript: &[TranscriptItem],
        stats: &SessionStats,
    ) -> VoiceResult<()> {
        self.submissions.lock().unwrap().push((
            scenario.id.clone(),
            transcript.to_vec(),
            stats.turns,
        ));
        Ok(())
    }
}

// ── Harness ────────────────────────────────────────────────────────

struct Harness {
    session: RoleplaySession,
    transport: Arc<MockTransport>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    devices: Arc<FakeDevices>,
    evaluation: Arc<RecordingEvaluation>,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness() -> Harness {
    init_logging();
    let (transport, events) = MockTransport::new();
    let devices = FakeDevices::new();
    let evaluation = Arc::new(RecordingEvaluation::default());
    let session = RoleplaySession::new(
        ScenarioContext::new("sc-refund", "You are a customer demanding a refund."),
        Arc::clone(&devices) as Arc<dyn DeviceManager>,
        Arc::new(MockConnector {
            transport: Arc::clone(&transport),
        }),
        Arc::clone(&evaluation) as Arc<dyn EvaluationSink>,
    );
    Harness {
        session,
        transport,
        events,
        devices,
        evaluation,
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// 500 ms of silence at the inbound rate, base64-encoded.
fn inbound_payload() -> String {
    pcm::encode_transport(&vec![0u8; 24_000])
}

async fn connect(h: &Harness) {
    h.session.start().unwrap();
    h.session.answer().await.unwrap();
    h.events.send(VoiceEvent::Opened).unwrap();
    wait_until("connected", || h.session.status() == SessionStatus::Connected).await;
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn full_call_lifecycle() {
    let h = harness();
    assert_eq!(h.session.status(), SessionStatus::Idle);

    connect(&h).await;

    // Trainee speaks: fake mic frames flow through to the transport.
    let mic = h.devices.mic();
    mic.send(pcm::encode_outbound(&[0.1_f32; 480])).unwrap();
    mic.send(pcm::encode_outbound(&[0.2_f32; 480])).unwrap();
    wait_until("mic audio forwarded", || h.transport.sent_count() == 2).await;

    // Customer responds: audio plus streamed transcript, then a turn end.
    h.events
        .send(VoiceEvent::Audio {
            payload: inbound_payload(),
        })
        .unwrap();
    for fragment in ["Con", "fir", "med"] {
        h.events
            .send(VoiceEvent::PartialTranscript {
                channel: Channel::Customer,
                text: fragment.to_string(),
            })
            .unwrap();
    }
    h.events.send(VoiceEvent::TurnComplete).unwrap();

    wait_until("turn committed", || {
        h.session.view().stats.turns == 1
    })
    .await;

    let view = h.session.view();
    assert_eq!(
        view.transcript,
        vec![TranscriptItem {
            speaker: Channel::Customer,
            text: "Confirmed".to_string()
        }]
    );
    assert_eq!(view.stats.audio_chunks_in, 1);
    assert_eq!(view.stats.audio_chunks_out, 2);
    assert_eq!(h.devices.played.load(Ordering::SeqCst), 1);

    // Hang up: released once, handed off once, back to idle.
    let final_view = h.session.end().await.unwrap();
    assert_eq!(final_view.status, SessionStatus::Idle);
    assert_eq!(h.transport.close_count(), 1);

    let submissions = h.evaluation.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1);
    let (scenario_id, transcript, turns) = &submissions[0];
    assert_eq!(scenario_id, "sc-refund");
    assert_eq!(transcript, &final_view.transcript);
    assert_eq!(*turns, 1);
    drop(submissions);

    // Ending an idle session is rejected and nothing re-runs.
    assert!(matches!(
        h.session.end().await,
        Err(VoiceError::InvalidState { .. })
    ));
    assert_eq!(h.transport.close_count(), 1);
    assert_eq!(h.evaluation.submissions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn barge_in_stops_all_pending_playback() {
    let h = harness();
    connect(&h).await;

    for _ in 0..2 {
        h.events
            .send(VoiceEvent::Audio {
                payload: inbound_payload(),
            })
            .unwrap();
    }
    wait_until("both chunks scheduled", || {
        h.devices.played.load(Ordering::SeqCst) == 2
    })
    .await;

    h.events.send(VoiceEvent::Interrupted).unwrap();
    wait_until("sink stopped", || {
        h.devices.stopped.load(Ordering::SeqCst) == 1
    })
    .await;

    let view = h.session.view();
    assert_eq!(view.stats.interruptions, 1);
    assert_eq!(view.status, SessionStatus::Connected);
}

#[tokio::test]
async fn turn_boundary_without_transcript_is_not_counted() {
    let h = harness();
    connect(&h).await;

    // A boundary with no preceding deltas commits nothing.
    h.events.send(VoiceEvent::TurnComplete).unwrap();

    // A real turn afterwards; events are processed in order, so once it is
    // counted the empty boundary has already been dispatched.
    h.events
        .send(VoiceEvent::PartialTranscript {
            channel: Channel::Customer,
            text: "Okay".to_string(),
        })
        .unwrap();
    h.events.send(VoiceEvent::TurnComplete).unwrap();

    wait_until("real turn committed", || h.session.view().stats.turns == 1).await;
    let view = h.session.view();
    assert_eq!(view.stats.turns, 1);
    assert_eq!(view.transcript.len(), 1);
}

#[tokio::test]
async fn malformed_audio_chunk_is_dropped_not_fatal() {
    let h = harness();
    connect(&h).await;

    h.events
        .send(VoiceEvent::Audio {
            payload: "@@not-base64@@".to_string(),
        })
        .unwrap();
    h.events
        .send(VoiceEvent::Audio {
            payload: inbound_payload(),
        })
        .unwrap();

    wait_until("good chunk played", || {
        h.devices.played.load(Ordering::SeqCst) == 1
    })
    .await;

    let view = h.session.view();
    assert_eq!(view.status, SessionStatus::Connected);
    assert_eq!(view.stats.audio_chunks_in, 1);
}

#[tokio::test]
async fn provider_error_fails_and_releases() {
    let h = harness();
    connect(&h).await;

    h.events
        .send(VoiceEvent::Error {
            message: "rate limited".to_string(),
        })
        .unwrap();

    wait_until("error state", || h.session.status() == SessionStatus::Error).await;
    assert_eq!(h.transport.close_count(), 1);

    let view = h.session.view();
    assert!(view.error_reason.as_deref().unwrap().contains("rate limited"));

    // Nothing was handed to evaluation; a failed call is not scored.
    assert!(h.evaluation.submissions.lock().unwrap().is_empty());

    h.session.reset().await.unwrap();
    assert_eq!(h.session.status(), SessionStatus::Idle);
    assert_eq!(h.transport.close_count(), 1);
}

#[tokio::test]
async fn unexpected_remote_close_is_a_failure() {
    let h = harness();
    connect(&h).await;

    h.events.send(VoiceEvent::Closed).unwrap();
    wait_until("error state", || h.session.status() == SessionStatus::Error).await;

    let view = h.session.view();
    assert!(view
        .error_reason
        .as_deref()
        .unwrap()
        .contains("closed unexpectedly"));
}

#[tokio::test]
async fn mic_frames_before_connected_are_dropped() {
    let h = harness();
    h.session.start().unwrap();
    h.session.answer().await.unwrap();

    // Still connecting: frames must not reach the transport.
    let mic = h.devices.mic();
    mic.send(pcm::encode_outbound(&[0.3_f32; 480])).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.sent_count(), 0);

    h.events.send(VoiceEvent::Opened).unwrap();
    wait_until("connected", || h.session.status() == SessionStatus::Connected).await;

    mic.send(pcm::encode_outbound(&[0.3_f32; 480])).unwrap();
    wait_until("live frame forwarded", || h.transport.sent_count() == 1).await;
}
