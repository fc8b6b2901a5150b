//! Audio playback to speakers
//!
//! Buffers are placed on a sample-accurate output clock by [`Mixer`]; the
//! cpal stream in [`AudioPlayback`] pulls mixed samples from it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};

use super::codec::{OUTPUT_SAMPLE_RATE, PlaybackBuffer};
use super::resample::{PlaybackRate, RateConverter};
use super::visualizer::WAVEFORM_POINTS;
use crate::{Error, Result};

/// Handle for one scheduled buffer
pub type VoiceId = u64;

/// Poll interval while waiting for one-shot playback to drain
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// An output that can start buffers at absolute clock times
pub trait AudioOutput {
    /// Output clock in seconds
    fn current_time(&self) -> f64;

    /// Start `buffer` at `start` seconds on the output clock
    fn schedule(&mut self, buffer: PlaybackBuffer, start: f64) -> VoiceId;

    /// Stop a pending or playing buffer; unknown ids are ignored
    fn stop(&mut self, id: VoiceId);

    /// Most recently rendered samples
    fn recent_samples(&self) -> Vec<f32>;

    /// Release the device; idempotent
    fn release(&mut self) {}
}

struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mono mixer driven by a frame counter
pub struct Mixer {
    sample_rate: u32,
    position: u64,
    voices: Vec<Voice>,
    next_id: VoiceId,
    recent: VecDeque<f32>,
}

impl Mixer {
    /// Create a mixer at the given rate with its clock at zero
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            voices: Vec::new(),
            next_id: 0,
            recent: VecDeque::with_capacity(WAVEFORM_POINTS),
        }
    }

    /// Frames rendered so far
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Buffers pending or playing
    #[must_use]
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Whether `id` is still pending or playing
    #[must_use]
    pub fn is_active(&self, id: VoiceId) -> bool {
        self.voices.iter().any(|v| v.id == id)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn seconds_to_frame(&self, seconds: f64) -> u64 {
        (seconds * f64::from(self.sample_rate)).round().max(0.0) as u64
    }

    /// Fill `out` with the mix of every voice and advance the clock
    pub fn render(&mut self, out: &mut [f32]) {
        for (offset, slot) in out.iter_mut().enumerate() {
            let frame = self.position + offset as u64;
            let mut mixed = 0.0_f32;
            for voice in &self.voices {
                if frame >= voice.start_frame && frame < voice.end_frame() {
                    #[allow(clippy::cast_possible_truncation)]
                    let index = (frame - voice.start_frame) as usize;
                    mixed += voice.samples[index];
                }
            }
            *slot = mixed.clamp(-1.0, 1.0);
        }

        self.position += out.len() as u64;
        let position = self.position;
        self.voices.retain(|v| v.end_frame() > position);

        for &sample in out.iter() {
            if self.recent.len() == WAVEFORM_POINTS {
                self.recent.pop_front();
            }
            self.recent.push_back(sample);
        }
    }
}

impl AudioOutput for Mixer {
    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.position as f64 / f64::from(self.sample_rate)
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start: f64) -> VoiceId {
        let id = self.next_id;
        self.next_id += 1;

        let start_frame = self.seconds_to_frame(start).max(self.position);
        tracing::trace!(id, start_frame, samples = buffer.len(), "voice scheduled");

        self.voices.push(Voice {
            id,
            start_frame,
            samples: buffer.into_samples(),
        });
        id
    }

    fn stop(&mut self, id: VoiceId) {
        self.voices.retain(|v| v.id != id);
    }

    fn recent_samples(&self) -> Vec<f32> {
        self.recent.iter().copied().collect()
    }
}

/// Adapts mixer output to the device's rate and channel layout
///
/// Lives inside the cpal callback; buffers are reused across calls.
struct DeviceFeed {
    mixer: Arc<Mutex<Mixer>>,
    converter: Option<RateConverter>,
    scratch: Vec<f32>,
    converted: VecDeque<f32>,
}

impl DeviceFeed {
    fn new(mixer: Arc<Mutex<Mixer>>, converter: Option<RateConverter>) -> Self {
        let scratch_len = converter.as_ref().map_or(0, RateConverter::chunk_size);
        Self {
            mixer,
            converter,
            scratch: vec![0.0; scratch_len],
            converted: VecDeque::new(),
        }
    }

    /// Fill one interleaved device buffer
    fn fill(&mut self, data: &mut [f32], channels: usize) {
        let frames = data.len() / channels;
        let Self {
            mixer,
            converter,
            scratch,
            converted,
        } = self;

        match converter {
            None => {
                if scratch.len() < frames {
                    scratch.resize(frames, 0.0);
                }
                let mono = &mut scratch[..frames];
                match mixer.lock() {
                    Ok(mut mixer) => mixer.render(mono),
                    Err(_) => mono.fill(0.0),
                }
                for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(sample);
                }
            }
            Some(converter) => {
                if let Ok(mut mixer) = mixer.lock() {
                    while converted.len() < frames {
                        mixer.render(scratch);
                        if let Err(e) = converter.push(scratch, converted) {
                            tracing::error!(error = %e, "output resampling failed");
                            break;
                        }
                    }
                }
                for frame in data.chunks_mut(channels) {
                    frame.fill(converted.pop_front().unwrap_or(0.0));
                }
            }
        }
    }
}

/// Plays audio to the default output device
///
/// The mixer always runs at 24kHz; devices without a native 24kHz mode are
/// fed through a resampler at their default rate.
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<Stream>,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let config = negotiate_output(&device)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            device,
            config,
            mixer: Arc::new(Mutex::new(Mixer::new(OUTPUT_SAMPLE_RATE))),
            stream: None,
        })
    }

    /// Sample rate the device runs at
    #[must_use]
    pub const fn device_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Channels the mono mix is copied to
    #[must_use]
    pub const fn device_channels(&self) -> u16 {
        self.config.channels
    }

    /// Whether the 24kHz mix is resampled for the device
    #[must_use]
    pub const fn is_resampling(&self) -> bool {
        self.config.sample_rate.0 != OUTPUT_SAMPLE_RATE
    }

    /// Start the output stream; the clock only advances while it runs
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let converter = if self.is_resampling() {
            Some(RateConverter::new(OUTPUT_SAMPLE_RATE, self.device_rate())?)
        } else {
            None
        };
        let mut feed = DeviceFeed::new(Arc::clone(&self.mixer), converter);
        let channels = usize::from(self.config.channels);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    feed.fill(data, channels);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio playback started");
        Ok(())
    }

    /// Play one buffer from now at `rate` and wait until it has drained
    ///
    /// # Errors
    ///
    /// Returns error if the rate cannot be applied or the output stream
    /// cannot be started
    pub async fn play(&mut self, buffer: PlaybackBuffer, rate: PlaybackRate) -> Result<()> {
        let buffer = rate.apply(buffer)?;
        if buffer.is_empty() {
            return Ok(());
        }

        self.start()?;

        let start = self.current_time();
        let end = start + buffer.duration();
        let sample_count = buffer.len();
        let id = self.schedule(buffer, start);

        // Bail out if the device clock stalls
        let timeout = Duration::from_secs_f64(end - start) + Duration::from_millis(500);
        let started = tokio::time::Instant::now();

        while self.is_voice_active(id) && self.current_time() < end {
            if started.elapsed() > timeout {
                tracing::warn!("playback clock stalled, giving up");
                self.stop(id);
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        tracing::debug!(samples = sample_count, "playback complete");
        Ok(())
    }

    fn is_voice_active(&self, id: VoiceId) -> bool {
        self.mixer.lock().is_ok_and(|m| m.is_active(id))
    }
}

/// Native 24kHz (mono, then stereo) if offered, else the default rate
fn negotiate_output(device: &Device) -> Result<StreamConfig> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let target = SampleRate(OUTPUT_SAMPLE_RATE);
    let supports = |c: &SupportedStreamConfigRange, rate: SampleRate| {
        c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    let native = configs
        .iter()
        .find(|c| c.channels() == 1 && supports(c, target))
        .or_else(|| configs.iter().find(|c| c.channels() == 2 && supports(c, target)));
    if let Some(native) = native {
        return Ok(native.clone().with_sample_rate(target).config());
    }

    let default_rate = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?
        .sample_rate();

    configs
        .into_iter()
        .filter(|c| supports(c, default_rate))
        .min_by_key(SupportedStreamConfigRange::channels)
        .map(|c| c.with_sample_rate(default_rate).config())
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))
}

impl AudioOutput for AudioPlayback {
    fn current_time(&self) -> f64 {
        self.mixer.lock().map_or(0.0, |m| m.current_time())
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start: f64) -> VoiceId {
        self.mixer
            .lock()
            .map_or(VoiceId::MAX, |mut m| m.schedule(buffer, start))
    }

    fn stop(&mut self, id: VoiceId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop(id);
        }
    }

    fn recent_samples(&self) -> Vec<f32> {
        self.mixer
            .lock()
            .map(|m| m.recent_samples())
            .unwrap_or_default()
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio playback released");
        }
    }
}
