//! Gemini wire types
//!
//! Shared by the live WebSocket session and the request/response calls.
//! Field names follow the API's camelCase JSON.

use serde::{Deserialize, Serialize};

use super::session::SessionEvent;
use crate::voice::EncodedChunk;
use crate::voice::codec::decode_base64;

/// Output modality requested from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    /// Spoken audio
    Audio,
}

/// Parameters of one live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Model identifier, without the `models/` prefix
    pub model: String,
    /// Requested response modality
    pub response_modality: Modality,
    /// System instruction text
    pub system_instruction: String,
    /// Prebuilt voice name
    pub voice: String,
}

impl SessionConfig {
    /// Audio-response session for `model` speaking with `voice`
    #[must_use]
    pub fn audio(model: &str, system_instruction: &str, voice: &str) -> Self {
        Self {
            model: model.to_string(),
            response_modality: Modality::Audio,
            system_instruction: system_instruction.to_string(),
            voice: voice.to_string(),
        }
    }
}

/// Inline binary payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// MIME type, e.g. `audio/pcm;rate=24000`
    #[serde(default)]
    pub mime_type: String,
    /// Base64 data
    pub data: String,
}

/// One part of a content turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    /// Text-only part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

/// A content turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// Single text part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text of all parts
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect()
    }

    /// Inline payloads whose MIME type is audio (or unspecified)
    pub fn audio_blobs(&self) -> impl Iterator<Item = &Blob> {
        self.parts
            .iter()
            .filter_map(|p| p.inline_data.as_ref())
            .filter(|b| b.mime_type.is_empty() || b.mime_type.starts_with("audio/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

impl SpeechConfig {
    /// Use a prebuilt voice
    #[must_use]
    pub fn prebuilt(voice: &str) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice.to_string(),
                },
            },
        }
    }
}

/// Generation parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

impl GenerationConfig {
    /// Audio output spoken by a prebuilt voice
    #[must_use]
    pub fn spoken(voice: &str) -> Self {
        Self {
            response_modalities: vec![Modality::Audio],
            speech_config: Some(SpeechConfig::prebuilt(voice)),
        }
    }
}

/// First message of a live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

/// Streamed microphone input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Client-to-server live message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Session setup for `config`
    #[must_use]
    pub fn setup(config: &SessionConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };

        Self::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality],
                speech_config: Some(SpeechConfig::prebuilt(&config.voice)),
            },
            system_instruction: Content::text(config.system_instruction.clone()),
        })
    }

    /// One encoded microphone frame
    #[must_use]
    pub fn audio(chunk: &EncodedChunk) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: chunk.mime_type.clone(),
                data: chunk.to_base64(),
            }],
        })
    }
}

/// Model output within a live session
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

/// Server-to-client live message
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

impl ServerMessage {
    /// Parse one text or binary frame payload
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not a JSON server message
    pub fn parse(payload: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Whether the server acknowledged the setup message
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Session events carried by this message, audio before interruption
    ///
    /// Audio parts that fail base64 decoding are dropped individually.
    #[must_use]
    pub fn into_events(self) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if self.go_away.is_some() {
            tracing::warn!("server announced it will close the session soon");
        }

        let Some(content) = self.server_content else {
            return events;
        };

        if let Some(turn) = &content.model_turn {
            for blob in turn.audio_blobs() {
                match decode_base64(&blob.data) {
                    Ok(bytes) => events.push(SessionEvent::AudioChunk(bytes)),
                    Err(e) => tracing::warn!(error = %e, "dropping audio part"),
                }
            }
        }

        if content.interrupted {
            events.push(SessionEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(SessionEvent::TurnComplete);
        }

        events
    }
}
