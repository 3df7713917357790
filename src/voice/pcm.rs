//! PCM codec: float samples ⇄ 16-bit signed PCM ⇄ base64 transport text.
//!
//! Outbound: microphone f32 samples become PCM16LE at 16 kHz mono.
//! Inbound: base64 payloads from the remote service become PCM16LE chunks
//! interpreted at 24 kHz mono. Both directions are pure functions.

use base64::Engine;

use super::error::{VoiceError, VoiceResult};

// ── Constants ──────────────────────────────────────────────────────

/// Capture/send sample rate (Hz): microphone audio forwarded to the service.
pub const OUTBOUND_SAMPLE_RATE: u32 = 16_000;

/// Receive/playback sample rate (Hz): synthetic speech from the service.
pub const INBOUND_SAMPLE_RATE: u32 = 24_000;

// ── Audio chunk ────────────────────────────────────────────────────

/// One transient buffer of PCM16LE audio tagged with its format.
///
/// Chunks are created per frame, consumed, and discarded — never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Raw little-endian 16-bit signed samples.
    pub data: Vec<u8>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (always 1 in this core).
    pub channels: u16,
}

impl AudioChunk {
    /// Number of samples per channel in this chunk.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2 / self.channels as usize
    }

    /// Playback duration computed from sample count and rate.
    pub fn duration(&self) -> std::time::Duration {
        let secs = self.sample_count() as f64 / self.sample_rate as f64;
        std::time::Duration::from_secs_f64(secs)
    }

    /// Decode the byte buffer into i16 samples (little-endian).
    pub fn samples_i16(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

// ── Encode / decode ────────────────────────────────────────────────

/// Encode captured float samples into an outbound 16 kHz mono chunk.
///
/// Each sample is clamped into [-1.0, 1.0], scaled by 32768, and packed
/// little-endian. No dithering. Never fails.
pub fn encode_outbound(samples: &[f32]) -> AudioChunk {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        // 32768 * 1.0 overflows i16; saturating cast lands on i16::MAX.
        let value = (clamped * 32768.0) as i32;
        let pcm = value.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        data.extend_from_slice(&pcm.to_le_bytes());
    }
    AudioChunk {
        data,
        sample_rate: OUTBOUND_SAMPLE_RATE,
        channels: 1,
    }
}

/// Decode an inbound transport payload into a 24 kHz mono chunk.
///
/// Fails with [`VoiceError::Decode`] when the payload is not valid base64;
/// the caller drops the chunk and the session continues.
pub fn decode_inbound(payload: &str) -> VoiceResult<AudioChunk> {
    let data = decode_transport(payload)?;
    Ok(AudioChunk {
        data,
        sample_rate: INBOUND_SAMPLE_RATE,
        channels: 1,
    })
}

/// Binary-safe transport text encoding (base64, standard alphabet).
pub fn encode_transport(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Reverse of [`encode_transport`]. `decode(encode(x)) == x` for all `x`.
pub fn decode_transport(text: &str) -> VoiceResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| VoiceError::Decode(e.to_string()))
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_round_trip_is_lossless() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![0xFF; 3],
            (0..=255u8).collect(),
            vec![0x00, 0x80, 0x7F, 0xFF, 0x01],
        ];
        for bytes in cases {
            let encoded = encode_transport(&bytes);
            assert_eq!(decode_transport(&encoded).unwrap(), bytes);
        }
    }

    #[test]
    fn encode_outbound_packs_little_endian() {
        let chunk = encode_outbound(&[0.0, 0.5, -0.5]);
        assert_eq!(chunk.sample_rate, OUTBOUND_SAMPLE_RATE);
        assert_eq!(chunk.channels, 1);
        let samples = chunk.samples_i16();
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], 16384);
        assert_eq!(samples[2], -16384);
    }

    #[test]
    fn encode_outbound_clamps_out_of_range() {
        let chunk = encode_outbound(&[2.0, -2.0, 1.0, -1.0]);
        let samples = chunk.samples_i16();
        assert_eq!(samples[0], i16::MAX);
        assert_eq!(samples[1], i16::MIN);
        assert_eq!(samples[2], i16::MAX);
        assert_eq!(samples[3], i16::MIN);
    }

    #[test]
    fn decode_inbound_tags_24khz() {
        let payload = encode_transport(&[1, 0, 2, 0]);
        let chunk = decode_inbound(&payload).unwrap();
        assert_eq!(chunk.sample_rate, INBOUND_SAMPLE_RATE);
        assert_eq!(chunk.sample_count(), 2);
    }

    #[test]
    fn decode_inbound_rejects_garbage() {
        let err = decode_inbound("not!!valid@@base64").unwrap_err();
        assert!(matches!(err, VoiceError::Decode(_)));
    }

    #[test]
    fn chunk_duration_from_rate() {
        // 24000 samples at 24kHz = exactly one second
        let chunk = AudioChunk {
            data: vec![0; 48_000],
            sample_rate: INBOUND_SAMPLE_RATE,
            channels: 1,
        };
        assert_eq!(chunk.duration(), std::time::Duration::from_secs(1));
    }
}
