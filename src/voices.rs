//! Prebuilt voice catalog and supported languages

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Default voice for text-to-speech
pub const DEFAULT_TTS_VOICE: &str = "Kore";

/// Default voice for live conversation
pub const DEFAULT_LIVE_VOICE: &str = "Zephyr";

/// Default speech language
pub const DEFAULT_LANGUAGE: &str = "English";

/// Languages the speech models are prompted in
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "English",
    "Spanish",
    "French",
    "German",
    "Italian",
    "Portuguese",
    "Japanese",
    "Korean",
    "Chinese",
    "Hindi",
    "Russian",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Male => f.write_str("Male"),
            Self::Female => f.write_str("Female"),
        }
    }
}

impl FromStr for Gender {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Self::Male),
            "female" | "f" => Ok(Self::Female),
            other => Err(Error::Config(format!("unknown gender: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeGroup {
    Young,
    Middle,
    Old,
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Young => f.write_str("Young"),
            Self::Middle => f.write_str("Middle Aged"),
            Self::Old => f.write_str("Older"),
        }
    }
}

/// A prebuilt model voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceProfile {
    pub name: &'static str,
    pub gender: Gender,
    pub age: AgeGroup,
    pub description: &'static str,
}

/// All prebuilt voices
pub const VOICE_PROFILES: &[VoiceProfile] = &[
    VoiceProfile {
        name: "Puck",
        gender: Gender::Male,
        age: AgeGroup::Young,
        description: "Energetic and clear",
    },
    VoiceProfile {
        name: "Charon",
        gender: Gender::Male,
        age: AgeGroup::Old,
        description: "Deep and authoritative",
    },
    VoiceProfile {
        name: "Kore",
        gender: Gender::Female,
        age: AgeGroup::Middle,
        description: "Soothing and calm",
    },
    VoiceProfile {
        name: "Fenrir",
        gender: Gender::Male,
        age: AgeGroup::Old,
        description: "Rough and strong",
    },
    VoiceProfile {
        name: "Zephyr",
        gender: Gender::Female,
        age: AgeGroup::Young,
        description: "Friendly and high-pitched",
    },
];

/// Look up a voice by name, ignoring case
#[must_use]
pub fn find_voice(name: &str) -> Option<&'static VoiceProfile> {
    VOICE_PROFILES
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(name))
}

/// Voices matching `gender`, or all voices
pub fn voices_by_gender(gender: Option<Gender>) -> impl Iterator<Item = &'static VoiceProfile> {
    VOICE_PROFILES
        .iter()
        .filter(move |v| gender.is_none_or(|g| v.gender == g))
}

/// Canonical spelling of a supported language, ignoring case
#[must_use]
pub fn find_language(name: &str) -> Option<&'static str> {
    SUPPORTED_LANGUAGES
        .iter()
        .copied()
        .find(|l| l.eq_ignore_ascii_case(name))
}
