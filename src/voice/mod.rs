//! Voice processing module
//!
//! Handles audio capture, PCM conversion, resampling, playback scheduling
//! and the level feeds used for visualization.

mod capture;
pub mod codec;
mod playback;
pub mod resample;
mod scheduler;
mod visualizer;

pub use capture::{
    AudioCapture, CapturePipeline, DEFAULT_FRAME_SIZE, FrameSink, SampleSource, TickReport,
};
pub use codec::{
    AudioFrame, EncodedChunk, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, PlaybackBuffer,
    WAV_HEADER_LEN, decode_chunk, encode_frame, wrap_as_container,
};
pub use playback::{AudioOutput, AudioPlayback, Mixer, VoiceId};
pub use resample::{PlaybackRate, RateConverter};
pub use scheduler::{PlaybackScheduler, ScheduledPlayback};
pub use visualizer::{LevelSnapshot, VisualizationFeed, WAVEFORM_POINTS};
