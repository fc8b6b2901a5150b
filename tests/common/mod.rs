//! Shared test utilities
//!
//! In-memory stand-ins for the microphone and the live service so the
//! conversation can be driven without audio hardware or network.

#![allow(dead_code, clippy::new_without_default)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use voice_studio::live::{Connection, Connector, SessionConfig, SessionEvent};
use voice_studio::voice::{EncodedChunk, INPUT_SAMPLE_RATE, SampleSource};
use voice_studio::{Error, Result};

/// Microphone stand-in; clones share the same buffer
#[derive(Clone)]
pub struct FakeSource {
    samples: Arc<Mutex<Vec<f32>>>,
    capturing: Arc<AtomicBool>,
}

impl FakeSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::new())),
            capturing: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Append captured samples
    pub fn push(&self, samples: &[f32]) {
        self.samples.lock().unwrap().extend_from_slice(samples);
    }

    pub fn is_running(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }
}

impl SampleSource for FakeSource {
    fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut *self.samples.lock().unwrap())
    }

    fn sample_rate(&self) -> u32 {
        INPUT_SAMPLE_RATE
    }

    fn is_capturing(&self) -> bool {
        self.is_running()
    }

    fn stop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
    }
}

/// The service side of one fake connection
pub struct RemoteEnd {
    /// Frames sent by the client
    pub outbound: mpsc::UnboundedReceiver<EncodedChunk>,
    /// Events delivered to the client
    pub inbound: mpsc::UnboundedSender<SessionEvent>,
    /// Fires when the client releases the connection
    pub shutdown: oneshot::Receiver<()>,
}

impl RemoteEnd {
    pub fn emit(&self, event: SessionEvent) {
        self.inbound.send(event).unwrap();
    }

    /// Whether the client has released the connection
    pub fn was_shut_down(&mut self) -> bool {
        self.shutdown.try_recv().is_ok()
    }
}

/// Connector that opens in-memory connections
pub struct FakeConnector {
    failure: Option<String>,
    remotes: Mutex<Vec<RemoteEnd>>,
    opened: Mutex<Vec<SessionConfig>>,
}

impl FakeConnector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            failure: None,
            remotes: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Connector whose every attempt fails with `reason`
    #[must_use]
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::new()
        }
    }

    /// Take the oldest unclaimed remote end
    pub fn take_remote(&self) -> RemoteEnd {
        let mut remotes = self.remotes.lock().unwrap();
        assert!(!remotes.is_empty(), "no connection was opened");
        remotes.remove(0)
    }

    /// Configs of every attempted connection
    pub fn opened(&self) -> Vec<SessionConfig> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, config: &SessionConfig) -> Result<Connection> {
        self.opened.lock().unwrap().push(config.clone());

        if let Some(reason) = &self.failure {
            return Err(Error::Connection(reason.clone()));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        self.remotes.lock().unwrap().push(RemoteEnd {
            outbound: outbound_rx,
            inbound: inbound_tx,
            shutdown: shutdown_rx,
        });

        Ok(Connection::new(outbound_tx, inbound_rx, shutdown_tx))
    }
}

/// Test session parameters
#[must_use]
pub fn session_config() -> SessionConfig {
    SessionConfig::audio("test-live-model", "Be brief.", "Zephyr")
}

/// 16-bit PCM bytes for `samples` samples of a constant level
#[must_use]
pub fn pcm(samples: usize, level: i16) -> Vec<u8> {
    std::iter::repeat_n(level.to_le_bytes(), samples)
        .flatten()
        .collect()
}
