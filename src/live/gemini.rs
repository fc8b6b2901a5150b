//! Gemini Live WebSocket connector

use std::borrow::Cow;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::protocol::{ClientMessage, ServerMessage, SessionConfig};
use super::session::{Connection, Connector, SessionEvent};
use crate::voice::EncodedChunk;
use crate::{Error, Result};

/// Bidirectional streaming endpoint of the Generative Language API
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens live sessions against the Gemini API
pub struct GeminiConnector {
    api_key: SecretString,
    endpoint: String,
}

impl GeminiConnector {
    /// Connector for the public endpoint
    #[must_use]
    pub fn new(api_key: SecretString) -> Self {
        Self::with_endpoint(api_key, DEFAULT_LIVE_ENDPOINT.to_string())
    }

    /// Connector for a custom endpoint (proxies, tests)
    #[must_use]
    pub const fn with_endpoint(api_key: SecretString, endpoint: String) -> Self {
        Self { api_key, endpoint }
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key.expose_secret())
    }
}

#[async_trait]
impl Connector for GeminiConnector {
    async fn open(&self, config: &SessionConfig) -> Result<Connection> {
        let (mut socket, _) = connect_async(self.url())
            .await
            .map_err(|e| Error::Connection(format!("websocket connect failed: {e}")))?;

        tracing::debug!(endpoint = %self.endpoint, "websocket connected, sending setup");

        let setup = serde_json::to_string(&ClientMessage::setup(config))?;
        socket
            .send(Message::Text(setup))
            .await
            .map_err(|e| Error::Connection(format!("failed to send setup: {e}")))?;

        await_setup_complete(&mut socket).await?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let (sink, stream) = socket.split();
        tokio::spawn(run_connection(sink, stream, outbound_rx, inbound_tx, shutdown_rx));

        Ok(Connection::new(outbound_tx, inbound_rx, shutdown_tx))
    }
}

/// JSON payload of a text or binary frame
fn frame_payload(message: &Message) -> Option<Cow<'_, str>> {
    match message {
        Message::Text(text) => Some(Cow::Borrowed(text.as_str())),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(bytes)),
        _ => None,
    }
}

async fn await_setup_complete(socket: &mut Socket) -> Result<()> {
    while let Some(message) = socket.next().await {
        let message = message.map_err(|e| Error::Connection(e.to_string()))?;

        if let Message::Close(frame) = &message {
            let reason = frame
                .as_ref()
                .map_or_else(|| "no reason given".to_string(), |f| f.reason.to_string());
            return Err(Error::Connection(format!("closed during setup: {reason}")));
        }

        let Some(payload) = frame_payload(&message) else {
            continue;
        };

        match ServerMessage::parse(&payload) {
            Ok(parsed) if parsed.is_setup_complete() => {
                tracing::debug!("setup acknowledged");
                return Ok(());
            }
            Ok(_) => tracing::trace!("ignoring message before setup completed"),
            Err(e) => tracing::warn!(error = %e, "unparseable message during setup"),
        }
    }

    Err(Error::Connection(
        "connection closed before setup completed".to_string(),
    ))
}

/// Pump frames between the socket and the session channels
async fn run_connection(
    mut sink: SplitSink<Socket, Message>,
    mut stream: SplitStream<Socket>,
    mut outbound: mpsc::UnboundedReceiver<EncodedChunk>,
    inbound: mpsc::UnboundedSender<SessionEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::debug!("closing websocket");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            chunk = outbound.recv() => {
                let Some(chunk) = chunk else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&ClientMessage::audio(&chunk)) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize audio frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    let _ = inbound.send(SessionEvent::Errored(e.to_string()));
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "websocket closed by remote");
                        let _ = inbound.send(SessionEvent::Closed);
                        break;
                    }
                    Some(Ok(message)) => {
                        let Some(payload) = frame_payload(&message) else {
                            continue;
                        };
                        match ServerMessage::parse(&payload) {
                            Ok(parsed) => {
                                for event in parsed.into_events() {
                                    if inbound.send(event).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "unparseable server message"),
                        }
                    }
                    Some(Err(e)) => {
                        let _ = inbound.send(SessionEvent::Errored(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = inbound.send(SessionEvent::Closed);
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("live connection task finished");
}
