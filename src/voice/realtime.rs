//! Duplex WebSocket transport to the remote conversational voice service.
//!
//! ## Protocol Overview
//!
//! 1. **Connect** — WebSocket to `wss://…/realtime?model=…` with bearer auth
//! 2. **Setup** — send `session.update` carrying the scenario instructions,
//!    PCM16 audio formats, and server-side turn detection
//! 3. **Stream** — send `input_audio_buffer.append` (base64 PCM16 16 kHz),
//!    receive audio deltas (base64 PCM16 24 kHz) and transcript deltas
//! 4. **Close** — gracefully close the WebSocket session
//!
//! Inbound frames are parsed into the enumerable [`VoiceEvent`] set; there is
//! no other path from the wire into the session. The adapter never retries on
//! its own — an automatic reconnect mid-sentence would silently corrupt
//! transcript ordering, so retry stays a deliberate user action.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::error::{VoiceError, VoiceResult};
use super::pcm::{self, AudioChunk};
use super::transcript::Channel;
use super::VoiceEvent;
use crate::config::RealtimeConfig;
use crate::scenario::ScenarioContext;

// ── Transport seam ─────────────────────────────────────────────────

/// The duplex connection as the session sees it: outbound audio frames in,
/// an ordered stream of [`VoiceEvent`]s out.
#[async_trait]
pub trait DuplexTransport: Send + Sync {
    /// Forward one outbound microphone chunk.
    async fn send_audio(&self, chunk: &AudioChunk) -> VoiceResult<()>;

    /// Receive the next inbound event; `None` once the connection is done.
    async fn next_event(&self) -> Option<VoiceEvent>;

    /// Close the connection gracefully. Safe to call more than once.
    async fn close(&self);
}

/// Opens a [`DuplexTransport`] for a session. Seam for tests and for
/// alternate providers.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        session_id: &str,
        scenario: &ScenarioContext,
    ) -> VoiceResult<Arc<dyn DuplexTransport>>;
}

// ── Outbound frame ─────────────────────────────────────────────────

/// Frame queued for the outbound WebSocket loop.
#[derive(Debug)]
enum OutboundFrame {
    /// Raw PCM16 bytes (base64-wrapped into `input_audio_buffer.append`).
    Audio(Vec<u8>),
    /// Close the connection.
    Close,
}

// ── Realtime transport ─────────────────────────────────────────────

/// Production transport: one persistent WebSocket session per call.
pub struct RealtimeTransport {
    outbound_tx: mpsc::Sender<OutboundFrame>,
    event_rx: Arc<Mutex<mpsc::Receiver<VoiceEvent>>>,
    session_id: String,
}

impl RealtimeTransport {
    /// Establish the connection, send `session.update`, and spawn the
    /// outbound and inbound loops.
    pub async fn open(
        config: &RealtimeConfig,
        session_id: String,
        scenario: &ScenarioContext,
    ) -> VoiceResult<Self> {
        let url = format!("{}?model={}", config.ws_url, config.model);

        tracing::info!(
            session_id = %session_id,
            model = %config.model,
            scenario_id = %scenario.id,
            "Opening duplex voice transport"
        );

        let mut request = url
            .into_client_request()
            .map_err(|e| VoiceError::TransportOpenFailed(format!("bad request: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", config.api_key)
                .parse()
                .map_err(|e| VoiceError::TransportOpenFailed(format!("bad auth header: {e}")))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|e| VoiceError::TransportOpenFailed(format!("bad header: {e}")))?,
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoiceError::TransportOpenFailed(e.to_string()))?;

        let (ws_sender, ws_receiver) = ws_stream.split();
        let ws_sender = Arc::new(Mutex::new(ws_sender));

        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundFrame>(256);
        let (event_tx, event_rx) = mpsc::channel::<VoiceEvent>(256);

        // Configure the simulated customer before any audio flows.
        let session_update = build_session_update(config, scenario);
        let update_json = serde_json::to_string(&session_update)
            .map_err(|e| VoiceError::TransportOpenFailed(e.to_string()))?;
        tracing::debug!(session_id = %session_id, "Sending session.update");
        {
            let mut sender = ws_sender.lock().await;
            sender
                .send(WsMessage::text(update_json))
                .await
                .map_err(|e| VoiceError::TransportOpenFailed(e.to_string()))?;
        }

        let ws_sender_out = Arc::clone(&ws_sender);
        let sid_out = session_id.clone();
        tokio::spawn(async move {
            Self::outbound_loop(outbound_rx, ws_sender_out, sid_out).await;
        });

        let sid_in = session_id.clone();
        tokio::spawn(async move {
            Self::inbound_loop(ws_receiver, event_tx, sid_in).await;
        });

        Ok(Self {
            outbound_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // ── Internal loops ────────────────────────────────────────────

    /// Outbound loop: base64-wrap PCM frames and push them onto the socket.
    async fn outbound_loop(
        mut rx: mpsc::Receiver<OutboundFrame>,
        ws_sender: Arc<
            Mutex<
                futures_util::stream::SplitSink<
                    tokio_tungstenite::WebSocketStream<
                        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
                    >,
                    WsMessage,
                >,
            >,
        >,
        session_id: String,
    ) {
        let mut audio_chunk_count: u64 = 0;

        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Audio(pcm_bytes) => {
                    audio_chunk_count += 1;
                    let msg = serde_json::json!({
                        "type": "input_audio_buffer.append",
                        "audio": pcm::encode_transport(&pcm_bytes),
                    });
                    if let Ok(json) = serde_json::to_string(&msg) {
                        if audio_chunk_count == 1 || audio_chunk_count % 50 == 0 {
                            tracing::info!(
                                session_id = %session_id,
                                chunk = audio_chunk_count,
                                pcm_bytes = pcm_bytes.len(),
                                "Forwarding mic audio"
                            );
                        }
                        let mut sender = ws_sender.lock().await;
                        if sender.send(WsMessage::text(json)).await.is_err() {
                            tracing::warn!(
                                session_id = %session_id,
                                "WebSocket send failed, closing outbound loop"
                            );
                            break;
                        }
                    }
                }
                OutboundFrame::Close => {
                    let mut sender = ws_sender.lock().await;
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }

        tracing::debug!(session_id = %session_id, "Outbound loop terminated");
    }

    /// Inbound loop: parse server frames into events. Always ends with a
    /// final `Closed` so the session can release resources exactly once.
    async fn inbound_loop(
        mut ws_receiver: futures_util::stream::SplitStream<
            tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
        >,
        event_tx: mpsc::Sender<VoiceEvent>,
        session_id: String,
    ) {
        let mut audio_response_count: u64 = 0;

        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(WsMessage::Text(text)) => {
                    let events =
                        parse_server_event(text.as_str(), &session_id, &mut audio_response_count);
                    for event in events {
                        if event_tx.send(event).await.is_err() {
                            tracing::debug!(
                                session_id = %session_id,
                                "Event receiver dropped, closing inbound loop"
                            );
                            return;
                        }
                    }
                }
                Ok(WsMessage::Close(frame)) => {
                    tracing::info!(
                        session_id = %session_id,
                        close_frame = ?frame,
                        "Remote closed the connection"
                    );
                    break;
                }
                Ok(
                    WsMessage::Ping(_)
                    | WsMessage::Pong(_)
                    | WsMessage::Frame(_)
                    | WsMessage::Binary(_),
                ) => {
                    // Binary frames are not part of the contract; ping/pong
                    // is handled by tungstenite.
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %session_id,
                        error = %e,
                        "WebSocket error"
                    );
                    let _ = event_tx
                        .send(VoiceEvent::Error {
                            message: format!("WebSocket error: {e}"),
                        })
                        .await;
                    break;
                }
            }
        }

        let _ = event_tx.send(VoiceEvent::Closed).await;
        tracing::debug!(session_id = %session_id, "Inbound loop terminated");
    }
}

#[async_trait]
impl DuplexTransport for RealtimeTransport {
    async fn send_audio(&self, chunk: &AudioChunk) -> VoiceResult<()> {
        if chunk.data.is_empty() {
            return Ok(());
        }
        self.outbound_tx
            .send(OutboundFrame::Audio(chunk.data.clone()))
            .await
            .map_err(|_| VoiceError::Transport("outbound channel closed".to_string()))
    }

    async fn next_event(&self) -> Option<VoiceEvent> {
        self.event_rx.lock().await.recv().await
    }

    async fn close(&self) {
        let _ = self.outbound_tx.send(OutboundFrame::Close).await;
    }
}

/// Connector producing [`RealtimeTransport`]s from one shared config.
pub struct RealtimeConnector {
    config: RealtimeConfig,
}

impl RealtimeConnector {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportConnector for RealtimeConnector {
    async fn connect(
        &self,
        session_id: &str,
        scenario: &ScenarioContext,
    ) -> VoiceResult<Arc<dyn DuplexTransport>> {
        let transport =
            RealtimeTransport::open(&self.config, session_id.to_string(), scenario).await?;
        Ok(Arc::new(transport))
    }
}

// ── Session update message ─────────────────────────────────────────

/// Build the `session.update` configuring the simulated customer.
fn build_session_update(config: &RealtimeConfig, scenario: &ScenarioContext) -> serde_json::Value {
    serde_json::json!({
        "type": "session.update",
        "session": {
            "instructions": scenario.instructions,
            "voice": config.voice,
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": {
                "model": "gpt-4o-mini-transcribe"
            },
            "turn_detection": {
                "type": "server_vad"
            }
        }
    })
}

// ── Server event parsing ───────────────────────────────────────────

/// Parse one server frame into zero or more [`VoiceEvent`]s.
///
/// Audio payloads are left base64-encoded; decoding (and the per-chunk
/// drop-on-`DecodeError` policy) belongs to the dispatcher, not the wire.
fn parse_server_event(
    json_text: &str,
    session_id: &str,
    audio_response_count: &mut u64,
) -> Vec<VoiceEvent> {
    let mut events = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            events.push(VoiceEvent::Error {
                message: format!("Failed to parse server event: {e}"),
            });
            return events;
        }
    };

    let event_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        // Session lifecycle
        "session.created" | "session.updated" => {
            tracing::info!(
                session_id = %session_id,
                event_type = event_type,
                "Remote session ready"
            );
            events.push(VoiceEvent::Opened);
        }

        // Synthetic speech from the simulated customer
        "response.audio.delta" => {
            if let Some(delta_b64) = value.get("delta").and_then(|v| v.as_str()) {
                *audio_response_count += 1;
                if *audio_response_count == 1 || *audio_response_count % 50 == 0 {
                    tracing::info!(
                        session_id = %session_id,
                        audio_n = *audio_response_count,
                        "⬇ Audio delta"
                    );
                }
                events.push(VoiceEvent::Audio {
                    payload: delta_b64.to_string(),
                });
            }
        }

        // Customer speech transcript (streamed while speaking)
        "response.audio_transcript.delta" => {
            if let Some(text) = value.get("delta").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    events.push(VoiceEvent::PartialTranscript {
                        channel: Channel::Customer,
                        text: text.to_string(),
                    });
                }
            }
        }

        // Trainee speech transcript — streamed deltas where supported,
        // whole-utterance `completed` otherwise. Both append.
        "conversation.item.input_audio_transcription.delta" => {
            if let Some(text) = value.get("delta").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    events.push(VoiceEvent::PartialTranscript {
                        channel: Channel::Trainee,
                        text: text.to_string(),
                    });
                }
            }
        }
        "conversation.item.input_audio_transcription.completed" => {
            if let Some(text) = value.get("transcript").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    events.push(VoiceEvent::PartialTranscript {
                        channel: Channel::Trainee,
                        text: text.to_string(),
                    });
                }
            }
        }

        // Turn boundary
        "response.done" => {
            tracing::info!(session_id = %session_id, "⬇ Turn complete");
            events.push(VoiceEvent::TurnComplete);
        }

        // Barge-in: trainee spoke over the customer
        "response.cancelled" => {
            tracing::info!(session_id = %session_id, "⬇ Interrupted");
            events.push(VoiceEvent::Interrupted);
        }

        // VAD progress — informational only
        "input_audio_buffer.speech_started" | "input_audio_buffer.speech_stopped" => {
            tracing::debug!(session_id = %session_id, event_type = event_type, "⬇ VAD");
        }

        "error" => {
            let message = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown provider error");
            tracing::error!(session_id = %session_id, error = %message, "Provider error");
            events.push(VoiceEvent::Error {
                message: message.to_string(),
            });
        }

        _ => {
            tracing::debug!(
                session_id = %session_id,
                event_type = event_type,
                "Unhandled server event"
            );
        }
    }

    events
}

// ── Tests ──────────────────────────────────────────────────────────
