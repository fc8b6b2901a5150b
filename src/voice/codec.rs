//! PCM codec
//!
//! The live API speaks 16-bit little-endian mono PCM: 16kHz upstream and
//! 24kHz downstream. Exported files carry the same payload behind a WAV
//! header, so the container step is kept separate from sample conversion.

use std::io::Cursor;

use base64::Engine as _;

use crate::{Error, Result};

/// Sample rate of microphone audio sent to the live API
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio produced by the remote service
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Size of the WAV header written by [`wrap_as_container`]
pub const WAV_HEADER_LEN: usize = 44;

/// Bytes per 16-bit sample
const SAMPLE_WIDTH: usize = 2;

/// Scale between normalized floats and 16-bit integers
const I16_SCALE: f32 = 32768.0;

/// One fixed-size window of captured samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame from raw samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Samples in this frame
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square amplitude of the frame
    #[must_use]
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    /// Encode the frame at its own sample rate, consuming it
    #[must_use]
    pub fn encode(self) -> EncodedChunk {
        encode_frame(&self.samples, self.sample_rate)
    }
}

/// Wire-ready PCM bytes plus their type descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// 16-bit little-endian PCM
    pub data: Vec<u8>,
    /// MIME-like descriptor, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl EncodedChunk {
    /// Base64 form used inside JSON protocol messages
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// Decoded audio ready to be scheduled
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    /// Create a buffer from normalized samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Normalized samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Take ownership of the samples
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// MIME descriptor for raw PCM at the given rate
#[must_use]
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Convert a normalized sample to a saturated 16-bit integer
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn sample_to_i16(sample: f32) -> i16 {
    // `as` saturates and maps NaN to 0
    (sample.clamp(-1.0, 1.0) * I16_SCALE) as i16
}

/// Encode float samples as 16-bit little-endian PCM
///
/// Out-of-range samples saturate at the i16 bounds instead of wrapping.
#[must_use]
pub fn encode_frame(samples: &[f32], target_rate: u32) -> EncodedChunk {
    let mut data = Vec::with_capacity(samples.len() * SAMPLE_WIDTH);
    for &sample in samples {
        data.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }

    EncodedChunk {
        data,
        mime_type: pcm_mime_type(target_rate),
    }
}

/// Decode 16-bit little-endian PCM into a playable buffer
///
/// # Errors
///
/// Returns [`Error::Decode`] if the byte length is not a whole number of samples
pub fn decode_chunk(bytes: &[u8], sample_rate: u32) -> Result<PlaybackBuffer> {
    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(Error::Decode(format!(
            "{} bytes is not a multiple of the {SAMPLE_WIDTH}-byte sample width",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / I16_SCALE)
        .collect();

    Ok(PlaybackBuffer::new(samples, sample_rate))
}

/// Decode the base64 payload of a protocol message
///
/// # Errors
///
/// Returns [`Error::Decode`] if the text is not valid base64
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::Decode(format!("invalid base64 audio: {e}")))
}

/// Wrap raw 24kHz mono PCM in a WAV container for export
///
/// # Errors
///
/// Returns [`Error::Decode`] for a payload that is not whole samples, or
/// [`Error::Encode`] if the WAV writer fails
pub fn wrap_as_container(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.len() % SAMPLE_WIDTH != 0 {
        return Err(Error::Decode(format!(
            "PCM payload of {} bytes is not whole 16-bit samples",
            raw.len()
        )));
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: OUTPUT_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + raw.len()));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Encode(e.to_string()))?;

        for pair in raw.chunks_exact(SAMPLE_WIDTH) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| Error::Encode(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Encode(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Root-mean-square amplitude
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
