//! Sample rate conversion
//!
//! Devices rarely run natively at the 16kHz/24kHz the live session speaks, so
//! capture and playback convert through [`RateConverter`], a streaming
//! wrapper around rubato's FFT resampler. [`PlaybackRate`] reuses the same
//! conversion to play a buffer faster, slower, higher or lower.

use rubato::{FftFixedIn, Resampler};

use super::codec::PlaybackBuffer;
use crate::{Error, Result};

/// Input frames fed to the resampler per step
const CHUNK_SIZE: usize = 256;

/// Streaming mono resampler
///
/// Input accumulates until a full chunk is available; converted samples are
/// appended to the caller's output. Converting one chunk at a time after
/// construction does not allocate.
pub struct RateConverter {
    resampler: FftFixedIn<f32>,
    input: Vec<f32>,
    output: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Converter from `from_rate` to `to_rate` Hz
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if either rate is zero or the resampler
    /// cannot be built
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(Error::Audio(format!(
                "invalid resample rates: {from_rate} -> {to_rate}"
            )));
        }

        let resampler =
            FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
                .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        let input = Vec::with_capacity(resampler.input_frames_max() * 2);
        let output = vec![vec![0.0; resampler.output_frames_max()]];

        Ok(Self {
            resampler,
            input,
            output,
        })
    }

    /// Input frames consumed per conversion step
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.resampler.input_frames_next()
    }

    /// Output frames produced per conversion step
    #[must_use]
    pub fn output_chunk_size(&self) -> usize {
        self.resampler.output_frames_next()
    }

    /// Feed `samples` and append every converted sample to `out`
    ///
    /// Leftover input shorter than a chunk waits for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the resampler rejects a chunk
    pub fn push<E: Extend<f32>>(&mut self, samples: &[f32], out: &mut E) -> Result<()> {
        self.input.extend_from_slice(samples);

        loop {
            let needed = self.resampler.input_frames_next();
            if self.input.len() < needed {
                return Ok(());
            }
            let produced = self.resampler.output_frames_next();

            self.resampler
                .process_into_buffer(&[&self.input[..needed]], &mut self.output[..], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;

            out.extend(self.output[0][..produced].iter().copied());
            self.input.drain(..needed);
        }
    }

    /// Samples waiting for a complete chunk
    #[must_use]
    pub fn pending(&self) -> usize {
        self.input.len()
    }
}

/// Convert a whole buffer from `from_rate` to `to_rate`
///
/// The result holds exactly `len * to_rate / from_rate` samples (rounded).
///
/// # Errors
///
/// Returns [`Error::Audio`] if the conversion fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;

    let mut converter = RateConverter::new(from_rate, to_rate)?;
    let mut output = Vec::with_capacity(expected + converter.output_chunk_size());
    converter.push(samples, &mut output)?;

    // Flush the tail and the resampler's delay line with silence
    let flush = vec![0.0; converter.chunk_size() * 2];
    while output.len() < expected {
        converter.push(&flush, &mut output)?;
    }

    output.truncate(expected);
    Ok(output)
}

/// Playback speed and pitch shift, combined as a rate multiplier
///
/// As with a tape or a varispeed deck, pitch shifts change duration too:
/// the effective rate is `speed * 2^(semitones / 12)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackRate {
    speed: f32,
    semitones: i8,
}

impl PlaybackRate {
    /// Slowest allowed speed
    pub const MIN_SPEED: f32 = 0.5;
    /// Fastest allowed speed
    pub const MAX_SPEED: f32 = 2.0;
    /// Largest pitch shift in either direction
    pub const MAX_SEMITONES: i8 = 12;

    /// Unchanged playback
    pub const NORMAL: Self = Self {
        speed: 1.0,
        semitones: 0,
    };

    /// Validated speed and pitch
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if speed is outside 0.5..=2.0 or the pitch
    /// shift is outside -12..=12 semitones
    pub fn new(speed: f32, semitones: i8) -> Result<Self> {
        if !(Self::MIN_SPEED..=Self::MAX_SPEED).contains(&speed) {
            return Err(Error::Config(format!(
                "playback speed {speed} outside {}..={}",
                Self::MIN_SPEED,
                Self::MAX_SPEED
            )));
        }
        if semitones.unsigned_abs() > Self::MAX_SEMITONES.unsigned_abs() {
            return Err(Error::Config(format!(
                "pitch shift {semitones} outside -{0}..={0} semitones",
                Self::MAX_SEMITONES
            )));
        }

        Ok(Self { speed, semitones })
    }

    /// Effective rate multiplier
    #[must_use]
    pub fn factor(&self) -> f64 {
        f64::from(self.speed) * 2.0_f64.powf(f64::from(self.semitones) / 12.0)
    }

    /// Whether playback is unchanged
    #[must_use]
    pub fn is_normal(&self) -> bool {
        (self.factor() - 1.0).abs() < 1e-6
    }

    /// Re-time `buffer` so that playing it at its own rate sounds like
    /// playing the original at this rate
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the conversion fails
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn apply(&self, buffer: PlaybackBuffer) -> Result<PlaybackBuffer> {
        if self.is_normal() {
            return Ok(buffer);
        }

        // Whole hundreds of Hz keep the FFT sizes small
        let rate = buffer.sample_rate();
        let apparent = ((f64::from(rate) * self.factor() / 100.0).round() * 100.0) as u32;
        let samples = resample(buffer.samples(), apparent, rate)?;

        tracing::debug!(
            speed = self.speed,
            semitones = self.semitones,
            factor = self.factor(),
            "playback rate applied"
        );

        Ok(PlaybackBuffer::new(samples, rate))
    }
}

impl Default for PlaybackRate {
    fn default() -> Self {
        Self::NORMAL
    }
}
