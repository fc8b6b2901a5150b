//! Gapless scheduling of streamed response audio
//!
//! Each decoded chunk starts exactly where the previous one ends on the
//! output clock. The cursor re-anchors to the current time when it is unset
//! or has fallen behind (underrun), and interruption stops everything.

use std::collections::BTreeMap;

use super::codec::{OUTPUT_SAMPLE_RATE, decode_chunk};
use super::playback::{AudioOutput, VoiceId};

/// A buffer placed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    /// Output handle
    pub id: VoiceId,
    /// Start time in output-clock seconds
    pub start: f64,
    /// Duration in seconds
    pub duration: f64,
}

impl ScheduledPlayback {
    /// End time in output-clock seconds
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Schedules response chunks back-to-back on an [`AudioOutput`]
pub struct PlaybackScheduler<O: AudioOutput> {
    output: O,
    sample_rate: u32,
    next_start_time: Option<f64>,
    active: BTreeMap<VoiceId, ScheduledPlayback>,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    /// Schedule 24kHz response audio on `output`
    #[must_use]
    pub const fn new(output: O) -> Self {
        Self::with_sample_rate(output, OUTPUT_SAMPLE_RATE)
    }

    /// Schedule audio of a different native rate on `output`
    #[must_use]
    pub const fn with_sample_rate(output: O, sample_rate: u32) -> Self {
        Self {
            output,
            sample_rate,
            next_start_time: None,
            active: BTreeMap::new(),
        }
    }

    /// Decode one chunk and append it to the timeline
    ///
    /// Malformed or empty chunks are dropped without affecting the session.
    pub fn on_audio_chunk(&mut self, bytes: &[u8]) -> Option<ScheduledPlayback> {
        let buffer = match decode_chunk(bytes, self.sample_rate) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "dropping undecodable audio chunk");
                return None;
            }
        };

        if buffer.is_empty() {
            tracing::trace!("ignoring empty audio chunk");
            return None;
        }

        self.reap_finished();

        let now = self.output.current_time();
        let start = match self.next_start_time {
            Some(cursor) if cursor >= now => cursor,
            Some(cursor) => {
                tracing::debug!(cursor, now, "playback underrun, re-anchoring to now");
                now
            }
            None => now,
        };

        let duration = buffer.duration();
        let id = self.output.schedule(buffer, start);
        self.next_start_time = Some(start + duration);

        let scheduled = ScheduledPlayback {
            id,
            start,
            duration,
        };
        self.active.insert(id, scheduled);

        tracing::trace!(id, start, duration, "audio chunk scheduled");
        Some(scheduled)
    }

    /// Stop all pending and playing audio and unset the cursor
    ///
    /// Returns how many buffers were stopped.
    pub fn on_interrupted(&mut self) -> usize {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.output.stop(id);
        }
        self.next_start_time = None;

        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Stop everything and release the output device
    pub fn on_session_end(&mut self) {
        self.on_interrupted();
        self.output.release();
    }

    /// Forget buffers whose end has passed on the output clock
    pub fn reap_finished(&mut self) {
        let now = self.output.current_time();
        self.active.retain(|_, p| p.end() > now);
    }

    /// Buffers pending or currently playing
    #[must_use]
    pub fn active_count(&self) -> usize {
        let now = self.output.current_time();
        self.active.values().filter(|p| p.end() > now).count()
    }

    /// Whether nothing is pending or playing
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active_count() == 0
    }

    /// Earliest start time of the next chunk, `None` when unset
    #[must_use]
    pub const fn next_start_time(&self) -> Option<f64> {
        self.next_start_time
    }

    /// Most recently rendered output, for visualization
    #[must_use]
    pub fn recent_samples(&self) -> Vec<f32> {
        self.output.recent_samples()
    }

    /// Underlying output
    #[must_use]
    pub const fn output(&self) -> &O {
        &self.output
    }

    /// Underlying output, mutably
    pub const fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}
