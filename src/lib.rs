//! Voice Studio - real-time voice conversation and speech generation
//!
//! This library provides the core functionality for Voice Studio:
//! - Audio capture, PCM encoding and gapless playback scheduling
//! - Live streaming sessions with interruption handling
//! - Level and waveform feeds for visualization
//! - Text-to-speech and fast chat over request/response calls
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌──────────────────┐  events  ┌────────────────────┐
//! │   Capture    ├──────────▶│ SessionTransport ├─────────▶│ PlaybackScheduler  │
//! │  (16kHz mic) │           │   (WebSocket)    │          │ (24kHz, gapless)   │
//! └──────┬───────┘           └──────────────────┘          └─────────┬──────────┘
//!        │                                                           │
//!        └──────────────────▶ VisualizationFeed ◀────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod live;
pub mod studio;
pub mod voice;
pub mod voices;

pub use config::Config;
pub use error::{Error, Result};
pub use live::{LiveController, LiveConversation, SessionState, SessionTransport};
pub use studio::StudioClient;
