//! Audio capture from microphone
//!
//! [`AudioCapture`] owns the cpal input stream. [`CapturePipeline`] turns
//! whatever the device has buffered into fixed-size frames on each tick and
//! hands the encoded frames to the active session, if any.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleFormat, SampleRate, Stream, StreamConfig};
use tokio::sync::watch;

use super::codec::{AudioFrame, EncodedChunk, INPUT_SAMPLE_RATE};
use super::resample::RateConverter;
use crate::{Error, Result};

/// Samples per captured frame
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Anything that yields captured samples
pub trait SampleSource {
    /// Drain the samples captured since the last call
    fn take_samples(&mut self) -> Vec<f32>;

    /// Capture sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Whether the source is producing samples
    fn is_capturing(&self) -> bool;

    /// Release the device; must be idempotent
    fn stop(&mut self);
}

/// Destination for encoded capture frames
pub trait FrameSink {
    /// Whether frames can be delivered right now
    fn is_open(&self) -> bool;

    /// Hand one encoded frame over without waiting for acknowledgement
    ///
    /// # Errors
    ///
    /// Returns error if the sink rejects the frame
    fn deliver(&mut self, chunk: EncodedChunk) -> Result<()>;
}

/// Captures audio from the default input device
///
/// Devices without a native 16kHz mono mode are opened at their default
/// rate; input is then downmixed and resampled to 16kHz.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
    converter: Option<RateConverter>,
}

impl AudioCapture {
    /// Open the default input device for 16kHz mono capture
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if no input device can be acquired
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::PermissionDenied("no input device available".to_string()))?;

        let config = negotiate_input(&device)?;
        let converter = if config.sample_rate.0 == INPUT_SAMPLE_RATE {
            None
        } else {
            Some(RateConverter::new(config.sample_rate.0, INPUT_SAMPLE_RATE)?)
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            channels = config.channels,
            resampling = converter.is_some(),
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
            converter,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if the device refuses the stream
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let channels = usize::from(self.config.channels);
        let scale = 1.0 / f32::from(self.config.channels);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        if channels == 1 {
                            buf.extend_from_slice(data);
                        } else {
                            buf.extend(
                                data.chunks(channels)
                                    .map(|frame| frame.iter().sum::<f32>() * scale),
                            );
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| match e {
                BuildStreamError::DeviceNotAvailable => Error::PermissionDenied(e.to_string()),
                other => Error::Audio(other.to_string()),
            })?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Sample rate the device runs at
    #[must_use]
    pub const fn device_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Channels the device delivers before downmixing
    #[must_use]
    pub const fn device_channels(&self) -> u16 {
        self.config.channels
    }

    /// Whether input is resampled to 16kHz
    #[must_use]
    pub const fn is_resampling(&self) -> bool {
        self.converter.is_some()
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }
}

/// Native 16kHz mono if the device offers it, else its default rate
fn negotiate_input(device: &Device) -> Result<StreamConfig> {
    let configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::PermissionDenied(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let target = SampleRate(INPUT_SAMPLE_RATE);
    if let Some(native) = configs.iter().find(|c| {
        c.channels() == 1 && c.min_sample_rate() <= target && c.max_sample_rate() >= target
    }) {
        return Ok(native.clone().with_sample_rate(target).config());
    }

    let default_rate = device
        .default_input_config()
        .map_err(|e| Error::PermissionDenied(e.to_string()))?
        .sample_rate();

    configs
        .into_iter()
        .filter(|c| c.min_sample_rate() <= default_rate && c.max_sample_rate() >= default_rate)
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .map(|c| c.with_sample_rate(default_rate).config())
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))
}

impl SampleSource for AudioCapture {
    fn take_samples(&mut self) -> Vec<f32> {
        let raw = self
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        let Some(converter) = self.converter.as_mut() else {
            return raw;
        };

        let mut samples = Vec::with_capacity(raw.len());
        if let Err(e) = converter.push(&raw, &mut samples) {
            tracing::warn!(error = %e, "dropping unconvertible capture block");
        }
        samples
    }

    fn sample_rate(&self) -> u32 {
        INPUT_SAMPLE_RATE
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.clear_buffer();
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outcome of one capture tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Complete frames cut from the input
    pub frames: usize,
    /// Frames handed to an open sink
    pub delivered: usize,
    /// Frames discarded because no sink was open
    pub dropped: usize,
}

/// Frames microphone input and forwards it to the open session
///
/// Frames produced while no session is open are discarded, never queued.
pub struct CapturePipeline<S: SampleSource> {
    source: S,
    frame_size: usize,
    pending: Vec<f32>,
    last_window: Vec<f32>,
    level: watch::Sender<f32>,
}

impl<S: SampleSource> CapturePipeline<S> {
    /// Wrap a started source
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero frame size
    pub fn new(source: S, frame_size: usize) -> Result<Self> {
        if frame_size == 0 {
            return Err(Error::Config("capture frame size must be non-zero".to_string()));
        }

        let (level, _) = watch::channel(0.0);

        Ok(Self {
            source,
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
            last_window: Vec::new(),
            level,
        })
    }

    /// Observe the RMS level of the most recent frame
    #[must_use]
    pub fn subscribe_level(&self) -> watch::Receiver<f32> {
        self.level.subscribe()
    }

    /// RMS level of the most recent frame
    #[must_use]
    pub fn level(&self) -> f32 {
        *self.level.borrow()
    }

    /// Samples of the most recent frame
    #[must_use]
    pub fn last_window(&self) -> &[f32] {
        &self.last_window
    }

    /// Samples per frame
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Whether the underlying source is still capturing
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.source.is_capturing()
    }

    /// Throw away everything captured so far
    ///
    /// Returns the number of samples discarded. Called when a session opens
    /// so that nothing recorded while it was connecting gets sent.
    pub fn discard_captured(&mut self) -> usize {
        let stale = self.source.take_samples().len() + self.pending.len();
        self.pending.clear();
        stale
    }

    /// Cut every complete frame out of the captured input and forward it
    ///
    /// Partial windows stay pending until the next tick.
    pub fn tick(&mut self, mut sink: Option<&mut dyn FrameSink>) -> TickReport {
        let mut report = TickReport::default();
        if !self.source.is_capturing() {
            return report;
        }

        let incoming = self.source.take_samples();
        self.pending.extend_from_slice(&incoming);
        let sample_rate = self.source.sample_rate();

        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let window = std::mem::replace(&mut self.pending, rest);
            let frame = AudioFrame::new(window, sample_rate);
            report.frames += 1;

            self.level.send_replace(frame.rms());
            self.last_window.clear();
            self.last_window.extend_from_slice(frame.samples());

            match sink.as_deref_mut() {
                Some(target) if target.is_open() => match target.deliver(frame.encode()) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        tracing::warn!(error = %e, "capture frame rejected");
                        report.dropped += 1;
                    }
                },
                _ => {
                    tracing::trace!("no open session, dropping capture frame");
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Stop capturing and release the device; idempotent
    pub fn stop(&mut self) {
        self.source.stop();
        self.pending.clear();
        self.last_window.clear();
        self.level.send_replace(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSource {
        batches: Vec<Vec<f32>>,
        capturing: bool,
        stops: usize,
    }

    impl SampleSource for ScriptedSource {
        fn take_samples(&mut self) -> Vec<f32> {
            if self.batches.is_empty() {
                Vec::new()
            } else {
                self.batches.remove(0)
            }
        }

        fn sample_rate(&self) -> u32 {
            INPUT_SAMPLE_RATE
        }

        fn is_capturing(&self) -> bool {
            self.capturing
        }

        fn stop(&mut self) {
            if self.capturing {
                self.stops += 1;
            }
            self.capturing = false;
        }
    }

    fn source(batches: Vec<Vec<f32>>) -> ScriptedSource {
        ScriptedSource {
            batches,
            capturing: true,
            stops: 0,
        }
    }

    #[test]
    fn zero_frame_size_is_rejected() {
        assert!(CapturePipeline::new(source(vec![]), 0).is_err());
    }

    #[test]
    fn partial_window_waits_for_next_tick() {
        let mut pipeline =
            CapturePipeline::new(source(vec![vec![0.1; 3], vec![0.1; 3]]), 4).unwrap();

        let first = pipeline.tick(None);
        assert_eq!(first.frames, 0);

        let second = pipeline.tick(None);
        assert_eq!(second.frames, 1);
        assert_eq!(second.dropped, 1);
        assert_eq!(pipeline.last_window().len(), 4);
    }

    #[test]
    fn level_tracks_latest_frame() {
        let mut pipeline =
            CapturePipeline::new(source(vec![[vec![0.5; 4], vec![0.25; 4]].concat()]), 4).unwrap();
        let level = pipeline.subscribe_level();

        pipeline.tick(None);
        assert!((*level.borrow() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn discarded_input_never_becomes_a_frame() {
        let mut pipeline =
            CapturePipeline::new(source(vec![vec![0.1; 3], vec![0.1; 6], vec![0.1; 4]]), 4)
                .unwrap();

        pipeline.tick(None);
        assert_eq!(pipeline.discard_captured(), 9);

        let report = pipeline.tick(None);
        assert_eq!(report.frames, 1);
        assert_eq!(pipeline.discard_captured(), 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut pipeline = CapturePipeline::new(source(vec![vec![0.5; 8]]), 4).unwrap();
        pipeline.stop();
        pipeline.stop();

        assert!(!pipeline.is_capturing());
        assert_eq!(pipeline.source.stops, 1);
        assert!(pipeline.level().abs() < f32::EPSILON);
        assert_eq!(pipeline.tick(None), TickReport::default());
    }
}
