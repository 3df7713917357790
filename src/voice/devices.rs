//! Audio device acquisition and release.
//!
//! Both OS handles involved here are not `Send`: the cpal input stream and
//! the rodio output stream. Each one lives on its own dedicated thread for
//! the whole session, and the rest of the crate talks to them through
//! channels. Acquisition happens only on an explicit answer, never on
//! session creation, and release is idempotent.

use std::sync::mpsc as std_mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::{VoiceError, VoiceResult};
use super::pcm::{self, AudioChunk, OUTBOUND_SAMPLE_RATE};
use super::playback::OutputSink;

/// Samples per outbound capture chunk: 30 ms at 16 kHz.
const CAPTURE_CHUNK_SAMPLES: usize = (OUTBOUND_SAMPLE_RATE as usize * 30) / 1000;

// ── Device manager seam ────────────────────────────────────────────

/// Acquires microphone and speaker for one session. Seam for tests, which
/// substitute fakes and never touch real hardware.
pub trait DeviceManager: Send + Sync {
    /// Acquire both devices, start capture, and return live handles.
    ///
    /// Captured audio arrives on `capture_tx` already encoded as outbound
    /// 16 kHz PCM chunks. Nothing is left half-acquired on failure: the
    /// speaker handle is dropped if the microphone cannot be opened.
    fn acquire(
        &self,
        session_id: &str,
        capture_tx: mpsc::UnboundedSender<AudioChunk>,
    ) -> VoiceResult<ActiveDevices>;
}

/// Live device handles for one connected session.
pub struct ActiveDevices {
    /// Microphone capture; stops on [`CaptureHandle::stop`] or drop.
    pub capture: CaptureHandle,
    /// Speaker sink, handed to the playback scheduler.
    pub output: Box<dyn OutputSink>,
}

// ── Capture ────────────────────────────────────────────────────────

/// Handle to the dedicated capture thread that owns the cpal input stream.
pub struct CaptureHandle {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// A handle with no backing thread. Device fakes use this to satisfy
    /// the [`ActiveDevices`] shape without touching hardware.
    pub fn detached(stop_tx: std_mpsc::Sender<()>) -> Self {
        Self {
            stop_tx,
            thread: None,
        }
    }

    /// Stop capture and join the thread. Idempotent.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the capture thread and wait for the input stream to start.
///
/// The cpal stream must be built, played, and dropped on one thread. The
/// build outcome is reported back over a one-shot channel so acquisition
/// failures surface synchronously.
fn start_capture(
    session_id: &str,
    capture_tx: mpsc::UnboundedSender<AudioChunk>,
) -> VoiceResult<CaptureHandle> {
    let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let sid = session_id.to_string();

    let thread = thread::Builder::new()
        .name(format!("capture-{sid}"))
        .spawn(move || {
            let stream = match build_input_stream(&sid, capture_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Park until release; the stream keeps capturing meanwhile.
            let _ = stop_rx.recv();
            drop(stream);
            debug!(session_id = %sid, "Capture thread terminated");
        })
        .map_err(|e| VoiceError::DeviceUnavailable(format!("capture thread: {e}")))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle {
            stop_tx,
            thread: Some(thread),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(VoiceError::DeviceUnavailable(
                "capture thread exited before reporting".to_string(),
            ))
        }
    }
}

/// Build and start the cpal input stream: mono f32 at 16 kHz, accumulated
/// into 30 ms chunks and encoded to outbound PCM in the callback.
fn build_input_stream(
    session_id: &str,
    capture_tx: mpsc::UnboundedSender<AudioChunk>,
) -> VoiceResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable("no input device".to_string()))?;

    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    info!(session_id = %session_id, device = %device_name, "Opening microphone");

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(OUTBOUND_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let sid = session_id.to_string();
    let mut sample_buffer: Vec<f32> = Vec::with_capacity(CAPTURE_CHUNK_SAMPLES);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    sample_buffer.push(sample);
                    if sample_buffer.len() >= CAPTURE_CHUNK_SAMPLES {
                        let chunk = pcm::encode_outbound(&sample_buffer);
                        sample_buffer.clear();
                        if capture_tx.send(chunk).is_err() {
                            // Session released while the callback was live.
                            return;
                        }
                    }
                }
            },
            {
                let sid = sid.clone();
                move |err| {
                    warn!(session_id = %sid, error = %err, "Input stream error");
                }
            },
            None,
        )
        .map_err(map_build_stream_error)?;

    stream
        .play()
        .map_err(|e| VoiceError::DeviceUnavailable(format!("input stream start: {e}")))?;

    Ok(stream)
}

fn map_build_stream_error(e: cpal::BuildStreamError) -> VoiceError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            VoiceError::DeviceUnavailable("input device disappeared".to_string())
        }
        other => {
            let message = other.to_string();
            if message.to_ascii_lowercase().contains("permission") {
                VoiceError::PermissionDenied
            } else {
                VoiceError::DeviceUnavailable(message)
            }
        }
    }
}

// ── Playback output ────────────────────────────────────────────────

enum PlaybackCommand {
    Play(AudioChunk),
    Stop,
}

/// Speaker sink backed by a dedicated thread owning the rodio output
/// stream. `stop` drains everything queued, for barge-in.
pub struct RodioOutput {
    command_tx: std_mpsc::Sender<PlaybackCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RodioOutput {
    /// Open the default output device and spawn the playback thread.
    pub fn open(session_id: &str) -> VoiceResult<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
        let (command_tx, command_rx) = std_mpsc::channel::<PlaybackCommand>();
        let sid = session_id.to_string();

        let thread = thread::Builder::new()
            .name(format!("playback-{sid}"))
            .spawn(move || playback_thread(&sid, ready_tx, command_rx))
            .map_err(|e| VoiceError::DeviceUnavailable(format!("playback thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                command_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(VoiceError::DeviceUnavailable(
                    "playback thread exited before reporting".to_string(),
                ))
            }
        }
    }
}

impl OutputSink for RodioOutput {
    fn play(&self, chunk: &AudioChunk) {
        let _ = self.command_tx.send(PlaybackCommand::Play(chunk.clone()));
    }

    fn stop(&self) {
        let _ = self.command_tx.send(PlaybackCommand::Stop);
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        // Dropping the sender ends the thread's command loop.
        let (dead_tx, _) = std_mpsc::channel();
        self.command_tx = dead_tx;
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Playback thread body: owns the output stream and sink for its lifetime.
fn playback_thread(
    session_id: &str,
    ready_tx: std_mpsc::Sender<VoiceResult<()>>,
    command_rx: std_mpsc::Receiver<PlaybackCommand>,
) {
    let (stream, stream_handle) = match rodio::OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(format!(
                "output device: {e}"
            ))));
            return;
        }
    };
    let mut sink = match rodio::Sink::try_new(&stream_handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(format!(
                "output sink: {e}"
            ))));
            return;
        }
    };
    info!(session_id = %session_id, "Speaker ready");
    let _ = ready_tx.send(Ok(()));

    while let Ok(command) = command_rx.recv() {
        match command {
            PlaybackCommand::Play(chunk) => {
                let source = rodio::buffer::SamplesBuffer::new(
                    chunk.channels,
                    chunk.sample_rate,
                    chunk.samples_i16(),
                );
                sink.append(source);
            }
            PlaybackCommand::Stop => {
                sink.stop();
                // A stopped sink will not accept new sources; rebuild it so
                // the conversation can continue after a barge-in.
                if let Ok(fresh) = rodio::Sink::try_new(&stream_handle) {
                    sink = fresh;
                }
            }
        }
    }

    drop(sink);
    drop(stream);
    debug!(session_id = %session_id, "Playback thread terminated");
}

// ── Production device manager ──────────────────────────────────────

/// Default [`DeviceManager`]: system default microphone via cpal, system
/// default speaker via rodio.
#[derive(Default)]
pub struct CpalDevices;

impl CpalDevices {
    pub fn new() -> Self {
        Self
    }

    /// Names of the available input devices, for diagnostics.
    pub fn input_device_names() -> Vec<String> {
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl DeviceManager for CpalDevices {
    fn acquire(
        &self,
        session_id: &str,
        capture_tx: mpsc::UnboundedSender<AudioChunk>,
    ) -> VoiceResult<ActiveDevices> {
        // Speaker first: if the microphone then fails, dropping the speaker
        // handle releases it and nothing stays half-acquired.
        let output = RodioOutput::open(session_id)?;
        let capture = start_capture(session_id, capture_tx)?;
        info!(session_id = %session_id, "Devices acquired");
        Ok(ActiveDevices {
            capture,
            output: Box::new(output),
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────
