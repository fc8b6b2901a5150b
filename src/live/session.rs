//! Live session transport
//!
//! Explicit state machine over one streaming connection:
//!
//! ```text
//! Idle ──connect──▶ Connecting ──ack──▶ Open ──close──▶ Closing ──▶ Closed
//!                        │                │
//!                        └──fault─────────┴──fault/remote close──▶ Errored
//! ```
//!
//! Only a local close reaches `Closed`. A transport is used for exactly one
//! connection; reconnecting means building a new one.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::protocol::SessionConfig;
use crate::voice::{EncodedChunk, FrameSink};
use crate::{Error, Result};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet connected
    Idle,
    /// Waiting for the remote to acknowledge setup
    Connecting,
    /// Streaming in both directions
    Open,
    /// Local close in progress
    Closing,
    /// Closed locally
    Closed,
    /// Failed to open, failed mid-session or closed by the remote
    Errored,
}

impl SessionState {
    /// Whether the session can no longer carry audio
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Inbound event from the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Fragment of 16-bit PCM response audio
    AudioChunk(Vec<u8>),
    /// The user started speaking over the response
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// The remote closed the session
    Closed,
    /// The connection failed
    Errored(String),
}

impl SessionEvent {
    /// Whether this event ends the session
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored(_))
    }
}

/// Channels to a live network task
///
/// Dropping the connection, or firing `shutdown`, ends the task.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<EncodedChunk>,
    inbound: mpsc::UnboundedReceiver<SessionEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Connection {
    /// Bundle the channel ends handed back by a connector
    #[must_use]
    pub const fn new(
        outbound: mpsc::UnboundedSender<EncodedChunk>,
        inbound: mpsc::UnboundedReceiver<SessionEvent>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            shutdown: Some(shutdown),
        }
    }

    fn shut_down(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            // Receiver gone means the task already ended
            let _ = tx.send(());
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shut_down();
    }
}

/// Opens connections to a remote voice service
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection, returning once the remote has acknowledged setup
    ///
    /// There is no built-in deadline; callers may abandon the future.
    async fn open(&self, config: &SessionConfig) -> Result<Connection>;
}

/// One logical connection to the live service
#[derive(Debug)]
pub struct SessionTransport {
    id: Uuid,
    state: watch::Sender<SessionState>,
    connection: Option<Connection>,
}

impl SessionTransport {
    /// Create an idle transport
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            id: Uuid::new_v4(),
            state,
            connection: None,
        }
    }

    /// Session identifier used in logs
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whether frames can be sent
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    fn transition(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(session = %self.id, from = %prev, to = %next, "session state changed");
        }
    }

    /// Connect and wait for the remote to acknowledge
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the transport was already used or the
    /// connection fails; the transport is then `Errored`
    pub async fn connect(&mut self, connector: &dyn Connector, config: &SessionConfig) -> Result<()> {
        let state = self.state();
        if state != SessionState::Idle {
            return Err(Error::Connection(format!(
                "cannot connect a transport that is {state}"
            )));
        }

        self.transition(SessionState::Connecting);
        tracing::info!(session = %self.id, model = %config.model, voice = %config.voice, "connecting live session");

        match connector.open(config).await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.transition(SessionState::Open);
                tracing::info!(session = %self.id, "live session open");
                Ok(())
            }
            Err(e) => {
                self.transition(SessionState::Errored);
                tracing::error!(session = %self.id, error = %e, "live session failed to open");
                Err(match e {
                    Error::Connection(reason) => Error::Connection(reason),
                    other => Error::Connection(other.to_string()),
                })
            }
        }
    }

    /// Queue one frame without waiting for acknowledgement
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] outside the `Open` state, or
    /// [`Error::Connection`] if the network task has gone away
    pub fn send(&mut self, chunk: EncodedChunk) -> Result<()> {
        let state = self.state();
        if state != SessionState::Open {
            return Err(Error::NotOpen(state.to_string()));
        }

        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| Error::NotOpen(state.to_string()))?;

        connection
            .outbound
            .send(chunk)
            .map_err(|_| Error::Connection("connection task ended".to_string()))
    }

    /// Wait for the next inbound event
    ///
    /// Terminal events move the transport to `Errored` and release the
    /// connection; afterwards this returns `None`.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let connection = self.connection.as_mut()?;

        let event = connection.inbound.recv().await.unwrap_or(SessionEvent::Closed);

        match &event {
            SessionEvent::Closed => {
                tracing::info!(session = %self.id, "live session closed by remote");
                self.release();
                self.transition(SessionState::Errored);
            }
            SessionEvent::Errored(reason) => {
                tracing::error!(session = %self.id, reason = %reason, "live session error");
                self.release();
                self.transition(SessionState::Errored);
            }
            _ => {}
        }

        Some(event)
    }

    /// Close the session; idempotent and safe in every state
    pub fn close(&mut self) {
        match self.state() {
            SessionState::Open | SessionState::Connecting => {
                self.transition(SessionState::Closing);
                self.release();
                self.transition(SessionState::Closed);
            }
            _ => self.release(),
        }
    }

    fn release(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.shut_down();
            tracing::debug!(session = %self.id, "connection released");
        }
    }
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.release();
    }
}

impl FrameSink for SessionTransport {
    fn is_open(&self) -> bool {
        Self::is_open(self)
    }

    fn deliver(&mut self, chunk: EncodedChunk) -> Result<()> {
        self.send(chunk)
    }
}
