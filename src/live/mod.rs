//! Live voice conversation
//!
//! Session transport state machine, Gemini wire protocol and the driver that
//! ties capture, transport and playback together.

mod conversation;
mod gemini;
pub mod protocol;
mod session;

pub use conversation::{
    DEFAULT_TICK_INTERVAL, EndReason, LiveController, LiveConversation, LiveOptions,
};
pub use gemini::{DEFAULT_LIVE_ENDPOINT, GeminiConnector};
pub use protocol::{Modality, SessionConfig};
pub use session::{Connection, Connector, SessionEvent, SessionState, SessionTransport};
