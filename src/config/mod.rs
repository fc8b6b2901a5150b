//! Configuration management for Voice Studio

pub mod file;

use secrecy::{ExposeSecret, SecretString};

use crate::live::{DEFAULT_LIVE_ENDPOINT, SessionConfig};
use crate::studio::DEFAULT_API_BASE_URL;
use crate::voice::DEFAULT_FRAME_SIZE;
use crate::voices::{self, DEFAULT_LANGUAGE, DEFAULT_LIVE_VOICE, DEFAULT_TTS_VOICE};
use crate::{Error, Result};

/// Native-audio model used for live conversation
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Speech generation model
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";

/// Low-latency text model
pub const DEFAULT_CHAT_MODEL: &str = "gemini-flash-lite-latest";

/// System instruction for live conversation
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful and friendly AI assistant. \
     Keep your responses concise and natural for a voice conversation.";

/// Voice Studio configuration
#[derive(Debug)]
pub struct Config {
    /// Gemini API key
    pub api_key: Option<SecretString>,

    /// REST API base URL
    pub api_base_url: String,

    /// Live WebSocket endpoint
    pub live_endpoint: String,

    /// Live conversation settings
    pub live: LiveConfig,

    /// Text-to-speech settings
    pub tts: TtsConfig,

    /// Fast chat settings
    pub chat: ChatConfig,
}

/// Live conversation configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub frame_size: usize,
}

impl LiveConfig {
    /// Session parameters for a new conversation
    #[must_use]
    pub fn session(&self) -> SessionConfig {
        SessionConfig::audio(&self.model, &self.system_instruction, &self.voice)
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub model: String,
    pub voice: String,
    pub language: String,
}

/// Fast chat configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a configured voice, language or frame size is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, &|key| std::env::var(key).ok())
    }

    /// Layer `env` over the file config and defaults
    ///
    /// # Errors
    ///
    /// Returns error if a configured voice, language or frame size is invalid
    pub fn resolve(
        fc: file::StudioConfigFile,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("API_KEY"))
            .or(fc.api_key)
            .filter(|k| !k.is_empty())
            .map(SecretString::from);

        let live = LiveConfig {
            model: env("STUDIO_LIVE_MODEL")
                .or(fc.live.model)
                .unwrap_or_else(|| DEFAULT_LIVE_MODEL.to_string()),
            voice: env("STUDIO_LIVE_VOICE")
                .or(fc.live.voice)
                .unwrap_or_else(|| DEFAULT_LIVE_VOICE.to_string()),
            system_instruction: fc
                .live
                .system_instruction
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            frame_size: fc.live.frame_size.unwrap_or(DEFAULT_FRAME_SIZE),
        };

        let tts = TtsConfig {
            model: env("STUDIO_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
            voice: env("STUDIO_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| DEFAULT_TTS_VOICE.to_string()),
            language: fc
                .tts
                .language
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        };

        let chat = ChatConfig {
            model: env("STUDIO_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
        };

        let mut config = Self {
            api_key,
            api_base_url: fc
                .api_base_url
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            live_endpoint: fc
                .live_endpoint
                .unwrap_or_else(|| DEFAULT_LIVE_ENDPOINT.to_string()),
            live,
            tts,
            chat,
        };
        config.validate()?;

        tracing::debug!(
            live_model = %config.live.model,
            tts_model = %config.tts.model,
            chat_model = %config.chat.model,
            has_api_key = config.api_key.is_some(),
            "configuration resolved"
        );

        Ok(config)
    }

    /// Check voices, language and framing, normalizing names
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid setting
    pub fn validate(&mut self) -> Result<()> {
        self.live.voice = canonical_voice(&self.live.voice)?;
        self.tts.voice = canonical_voice(&self.tts.voice)?;
        self.tts.language = voices::find_language(&self.tts.language)
            .ok_or_else(|| Error::Config(format!("unsupported language: {}", self.tts.language)))?
            .to_string();

        if self.live.frame_size == 0 {
            return Err(Error::Config("live.frame_size must be non-zero".to_string()));
        }

        Ok(())
    }

    /// The API key, or an error explaining how to set one
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no key is configured
    pub fn require_api_key(&self) -> Result<SecretString> {
        self.api_key
            .as_ref()
            .map(|key| SecretString::from(key.expose_secret().to_string()))
            .ok_or_else(|| {
                Error::Config(
                    "no API key: set GEMINI_API_KEY or api_key in the config file".to_string(),
                )
            })
    }
}

fn canonical_voice(name: &str) -> Result<String> {
    voices::find_voice(name)
        .map(|v| v.name.to_string())
        .ok_or_else(|| Error::Config(format!("unknown voice: {name}")))
}
