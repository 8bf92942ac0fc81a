mod device;
mod queue;

pub use device::RodioSink;
pub use queue::{PlaybackQueue, SinkOpener};

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use base64::Engine;

/// Decoded mono audio ready for playback.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as f32 / self.sample_rate as f32 * 1000.0) as u64
    }
}

/// Speech-synthesis collaborator: text fragment in, base64 PCM16 out.
///
/// `Ok(None)` means the provider produced no audio for this fragment; the
/// queue treats that as a no-op, not an error.
#[async_trait]
pub trait SpeechSource: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Option<String>>;
}

/// Playback device abstraction. `play` resolves only once the buffer has
/// finished sounding (or the sink is stopped); dropping the sink releases
/// the device.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, buffer: AudioBuffer) -> Result<()>;

    /// Cut any in-flight audio immediately, resolving a pending `play`.
    fn stop(&self);
}

/// Decode base64-encoded raw little-endian PCM16 samples into a playable
/// buffer at the given sample rate.
pub fn decode_pcm_base64(encoded: &str, sample_rate: u32) -> Result<AudioBuffer> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("audio payload is not valid base64")?;
    ensure!(
        bytes.len() % 2 == 0,
        "PCM16 payload has odd length ({} bytes)",
        bytes.len()
    );

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(AudioBuffer {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn decode_pcm_maps_full_scale_values() {
        // 0, i16::MAX, i16::MIN as little-endian pairs
        let encoded = encode(&[0x00, 0x00, 0xFF, 0x7F, 0x00, 0x80]);
        let buffer = decode_pcm_base64(&encoded, 24_000).unwrap();
        assert_eq!(buffer.sample_rate, 24_000);
        assert_eq!(buffer.samples.len(), 3);
        assert_eq!(buffer.samples[0], 0.0);
        assert!((buffer.samples[1] - 32767.0 / 32768.0).abs() < f32::EPSILON);
        assert_eq!(buffer.samples[2], -1.0);
    }

    #[test]
    fn decode_pcm_rejects_odd_payloads() {
        let encoded = encode(&[0x01, 0x02, 0x03]);
        assert!(decode_pcm_base64(&encoded, 24_000).is_err());
    }

    #[test]
    fn decode_pcm_rejects_invalid_base64() {
        assert!(decode_pcm_base64("not base64!!!", 24_000).is_err());
    }

    #[test]
    fn duration_reflects_sample_count() {
        let buffer = AudioBuffer {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
        };
        assert_eq!(buffer.duration_ms(), 1000);
    }
}
