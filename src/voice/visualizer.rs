//! Live level and waveform feeds for rendering

use tokio::sync::watch;

use super::codec::rms;

/// Points in a waveform snapshot
pub const WAVEFORM_POINTS: usize = 128;

/// Byte value of a zero sample in a waveform
const WAVEFORM_CENTER: u8 = 128;

/// Level and time-domain waveform of one tap
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSnapshot {
    /// RMS amplitude of the most recent window
    pub rms: f32,
    /// Unsigned byte waveform centred at 128
    pub waveform: Vec<u8>,
}

impl LevelSnapshot {
    /// Flat line at zero amplitude
    #[must_use]
    pub fn silent() -> Self {
        Self {
            rms: 0.0,
            waveform: vec![WAVEFORM_CENTER; WAVEFORM_POINTS],
        }
    }

    /// Snapshot of the trailing window of `samples`
    #[must_use]
    pub fn from_samples(samples: &[f32]) -> Self {
        let tail = &samples[samples.len().saturating_sub(WAVEFORM_POINTS)..];

        let mut waveform = vec![WAVEFORM_CENTER; WAVEFORM_POINTS - tail.len()];
        waveform.extend(tail.iter().map(|&s| sample_to_byte(s)));

        Self {
            rms: rms(samples),
            waveform,
        }
    }

    /// Whether this snapshot shows no signal
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.rms.abs() < f32::EPSILON && self.waveform.iter().all(|&b| b == WAVEFORM_CENTER)
    }
}

impl Default for LevelSnapshot {
    fn default() -> Self {
        Self::silent()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_to_byte(sample: f32) -> u8 {
    sample.clamp(-1.0, 1.0).mul_add(128.0, 128.0).clamp(0.0, 255.0) as u8
}

/// Input and output observables for one live conversation
///
/// Writers never block; readers see the latest value only.
#[derive(Debug)]
pub struct VisualizationFeed {
    input: watch::Sender<LevelSnapshot>,
    output: watch::Sender<LevelSnapshot>,
}

impl VisualizationFeed {
    /// Create a feed reporting silence on both taps
    #[must_use]
    pub fn new() -> Self {
        let (input, _) = watch::channel(LevelSnapshot::silent());
        let (output, _) = watch::channel(LevelSnapshot::silent());
        Self { input, output }
    }

    /// Observe the microphone tap
    #[must_use]
    pub fn subscribe_input(&self) -> watch::Receiver<LevelSnapshot> {
        self.input.subscribe()
    }

    /// Observe the playback tap
    #[must_use]
    pub fn subscribe_output(&self) -> watch::Receiver<LevelSnapshot> {
        self.output.subscribe()
    }

    /// Publish a captured window
    pub fn publish_input(&self, samples: &[f32]) {
        self.input.send_replace(LevelSnapshot::from_samples(samples));
    }

    /// Publish the most recently rendered output
    pub fn publish_output(&self, samples: &[f32]) {
        self.output.send_replace(LevelSnapshot::from_samples(samples));
    }

    /// Current input snapshot
    #[must_use]
    pub fn input(&self) -> LevelSnapshot {
        self.input.borrow().clone()
    }

    /// Current output snapshot
    #[must_use]
    pub fn output(&self) -> LevelSnapshot {
        self.output.borrow().clone()
    }

    /// Report silence on both taps
    pub fn reset(&self) {
        self.input.send_replace(LevelSnapshot::silent());
        self.output.send_replace(LevelSnapshot::silent());
    }
}

impl Default for VisualizationFeed {
    fn default() -> Self {
        Self::new()
    }
}
