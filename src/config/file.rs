//! TOML configuration file loading
//!
//! Supports `~/.config/voice-studio/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct StudioConfigFile {
    /// Gemini API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// REST base URL override
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Live WebSocket endpoint override
    #[serde(default)]
    pub live_endpoint: Option<String>,

    #[serde(default)]
    pub live: LiveFileConfig,

    #[serde(default)]
    pub tts: TtsFileConfig,

    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Live conversation configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// Native-audio model identifier
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Zephyr")
    pub voice: Option<String>,

    /// System instruction sent at setup
    pub system_instruction: Option<String>,

    /// Samples per capture frame
    pub frame_size: Option<usize>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub language: Option<String>,
}

/// Fast chat configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    pub model: Option<String>,
}

/// Load the config file from the default location
///
/// Returns `StudioConfigFile::default()` if the file doesn't exist or fails to parse.
pub fn load_config_file() -> StudioConfigFile {
    let Some(path) = config_file_path() else {
        return StudioConfigFile::default();
    };

    if !path.exists() {
        return StudioConfigFile::default();
    }

    load_from_path(&path)
}

/// Load a config file from `path`, falling back to defaults on any failure
pub fn load_from_path(path: &Path) -> StudioConfigFile {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                StudioConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            StudioConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voice-studio/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-studio").join("config.toml"))
}
