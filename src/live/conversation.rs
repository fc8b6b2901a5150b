//! Live conversation driver
//!
//! A [`LiveConversation`] owns every handle of one conversation: the capture
//! pipeline, the session transport, the playback scheduler and the
//! visualization feed. [`LiveConversation::run`] serially dispatches capture
//! ticks and remote events from a single task, so none of that state is
//! shared.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::protocol::SessionConfig;
use super::session::{Connector, SessionEvent, SessionTransport};
use crate::voice::{
    AudioOutput, CapturePipeline, DEFAULT_FRAME_SIZE, FrameSink, PlaybackScheduler, SampleSource,
    VisualizationFeed,
};
use crate::{Error, Result};

/// How often captured input is framed and forwarded
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Parameters for starting a conversation
#[derive(Debug, Clone)]
pub struct LiveOptions {
    /// Remote session parameters
    pub session: SessionConfig,
    /// Samples per capture frame
    pub frame_size: usize,
    /// Capture tick period
    pub tick_interval: Duration,
}

impl LiveOptions {
    /// Default framing for `session`
    #[must_use]
    pub const fn new(session: SessionConfig) -> Self {
        Self {
            session,
            frame_size: DEFAULT_FRAME_SIZE,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Why [`LiveConversation::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The shutdown signal fired
    Stopped,
    /// The remote closed the session
    RemoteClosed,
}

/// One running conversation
pub struct LiveConversation<S: SampleSource, O: AudioOutput> {
    capture: CapturePipeline<S>,
    transport: SessionTransport,
    scheduler: PlaybackScheduler<O>,
    feed: Arc<VisualizationFeed>,
    tick_interval: Duration,
}

impl<S: SampleSource, O: AudioOutput> LiveConversation<S, O> {
    /// Connect a new session and wire it to `source` and `output`
    ///
    /// # Errors
    ///
    /// Returns error if the options are invalid or the connection fails.
    /// Devices are released before the error is returned.
    pub async fn start(
        connector: &dyn Connector,
        options: LiveOptions,
        source: S,
        output: O,
        feed: Arc<VisualizationFeed>,
    ) -> Result<Self> {
        if options.tick_interval.is_zero() {
            return Err(Error::Config("tick interval must be non-zero".to_string()));
        }

        let capture = CapturePipeline::new(source, options.frame_size)?;
        let mut conversation = Self {
            capture,
            transport: SessionTransport::new(),
            scheduler: PlaybackScheduler::new(output),
            feed,
            tick_interval: options.tick_interval,
        };

        if let Err(e) = conversation
            .transport
            .connect(connector, &options.session)
            .await
        {
            conversation.stop();
            return Err(e);
        }

        // Audio recorded while connecting is never sent
        let stale = conversation.capture.discard_captured();
        if stale > 0 {
            tracing::debug!(samples = stale, "discarded input captured before open");
        }

        Ok(conversation)
    }

    /// Frame captured input, forward it and refresh the feed
    pub fn on_tick(&mut self) {
        let sink: &mut dyn FrameSink = &mut self.transport;
        let report = self.capture.tick(Some(sink));
        if report.frames > 0 {
            tracing::trace!(
                frames = report.frames,
                delivered = report.delivered,
                dropped = report.dropped,
                "capture tick"
            );
            self.feed.publish_input(self.capture.last_window());
        }

        self.scheduler.reap_finished();
        self.feed.publish_output(&self.scheduler.recent_samples());
    }

    /// Apply one remote event
    ///
    /// Returns the end reason once the session is over.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the remote reports a failure, after
    /// tearing the conversation down
    pub fn handle_event(&mut self, event: SessionEvent) -> Result<Option<EndReason>> {
        match event {
            SessionEvent::AudioChunk(bytes) => {
                self.scheduler.on_audio_chunk(&bytes);
            }
            SessionEvent::Interrupted => {
                let stopped = self.scheduler.on_interrupted();
                tracing::debug!(session = %self.transport.id(), stopped, "response interrupted");
            }
            SessionEvent::TurnComplete => {
                tracing::debug!(session = %self.transport.id(), "model turn complete");
            }
            SessionEvent::Closed => {
                self.stop();
                return Ok(Some(EndReason::RemoteClosed));
            }
            SessionEvent::Errored(reason) => {
                self.stop();
                return Err(Error::Connection(reason));
            }
        }

        Ok(None)
    }

    /// Drive the conversation until `shutdown` resolves or the session ends
    ///
    /// # Errors
    ///
    /// Returns error if the session fails mid-conversation
    pub async fn run<F: Future>(&mut self, shutdown: F) -> Result<EndReason> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(session = %self.transport.id(), "stopping live conversation");
                    self.stop();
                    return Ok(EndReason::Stopped);
                }
                _ = ticker.tick() => self.on_tick(),
                event = self.transport.next_event() => {
                    let Some(event) = event else {
                        self.stop();
                        return Ok(EndReason::RemoteClosed);
                    };
                    if let Some(reason) = self.handle_event(event)? {
                        return Ok(reason);
                    }
                }
            }
        }
    }

    /// Stop capture and playback, close the session and silence the feed
    ///
    /// Idempotent.
    pub fn stop(&mut self) {
        self.capture.stop();
        self.scheduler.on_session_end();
        self.transport.close();
        self.feed.reset();
    }

    /// Session transport
    #[must_use]
    pub const fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    /// Playback scheduler
    #[must_use]
    pub const fn scheduler(&self) -> &PlaybackScheduler<O> {
        &self.scheduler
    }

    /// Playback scheduler, mutably
    pub const fn scheduler_mut(&mut self) -> &mut PlaybackScheduler<O> {
        &mut self.scheduler
    }

    /// Capture pipeline
    #[must_use]
    pub const fn capture(&self) -> &CapturePipeline<S> {
        &self.capture
    }

    /// Visualization feed
    #[must_use]
    pub fn feed(&self) -> Arc<VisualizationFeed> {
        Arc::clone(&self.feed)
    }
}

/// Holds at most one active conversation
pub struct LiveController<S: SampleSource, O: AudioOutput> {
    active: Option<LiveConversation<S, O>>,
}

impl<S: SampleSource, O: AudioOutput> LiveController<S, O> {
    #[must_use]
    pub const fn new() -> Self {
        Self { active: None }
    }

    /// Start a conversation, stopping the current one first
    ///
    /// # Errors
    ///
    /// Returns error if the new conversation fails to start; the previous
    /// one is gone either way
    pub async fn start(
        &mut self,
        connector: &dyn Connector,
        options: LiveOptions,
        source: S,
        output: O,
        feed: Arc<VisualizationFeed>,
    ) -> Result<&mut LiveConversation<S, O>> {
        self.stop();

        let conversation = LiveConversation::start(connector, options, source, output, feed).await?;
        Ok(self.active.insert(conversation))
    }

    /// Stop and drop the active conversation, if any
    pub fn stop(&mut self) {
        if let Some(mut conversation) = self.active.take() {
            conversation.stop();
        }
    }

    /// Whether a conversation is held
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The active conversation
    pub const fn active(&mut self) -> Option<&mut LiveConversation<S, O>> {
        self.active.as_mut()
    }
}

impl<S: SampleSource, O: AudioOutput> Default for LiveController<S, O> {
    fn default() -> Self {
        Self::new()
    }
}
