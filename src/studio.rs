//! Request/response calls: text-to-speech and fast chat

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::live::protocol::{Content, GenerationConfig};
use crate::voice::codec::decode_base64;
use crate::voices::DEFAULT_LANGUAGE;
use crate::{Error, Result};

/// Base URL of the Generative Language REST API
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Chat turns carried into each fast-chat prompt
const HISTORY_TURNS: usize = 4;

/// Build the speech prompt, steering non-English output
#[must_use]
pub fn speech_prompt(text: &str, language: &str) -> String {
    if language.eq_ignore_ascii_case(DEFAULT_LANGUAGE) {
        text.to_string()
    } else {
        format!("Say in {language}: {text}")
    }
}

/// Prompt asking for a short sample paragraph to read aloud
#[must_use]
pub fn suggestion_prompt(language: &str) -> String {
    format!(
        "Write a short, engaging paragraph (approx 30 words) about a futuristic technology \
         or a calm nature scene in {language}. Only return the text."
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<&'a GenerationConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn first_content(&self) -> Option<&Content> {
        self.candidates.first().and_then(|c| c.content.as_ref())
    }
}

/// Stateless client for `generateContent`
pub struct StudioClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    tts_model: String,
    chat_model: String,
}

impl StudioClient {
    /// Create a client against `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(
        api_key: SecretString,
        base_url: String,
        tts_model: String,
        chat_model: String,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Gemini API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            tts_model,
            chat_model,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{model}:generateContent", self.base_url)
    }

    async fn generate(
        &self,
        model: &str,
        prompt: String,
        generation_config: Option<&GenerationConfig>,
    ) -> Result<GenerateContentResponse> {
        let request = GenerateContentRequest {
            contents: vec![Content::text(prompt)],
            generation_config,
        };

        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{model} error {status}: {body}")));
        }

        Ok(response.json().await?)
    }

    /// Synthesize `text` with a prebuilt voice
    ///
    /// # Returns
    ///
    /// Raw 16-bit little-endian PCM at 24kHz
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response carries no audio
    pub async fn generate_speech(&self, text: &str, voice: &str, language: &str) -> Result<Vec<u8>> {
        let prompt = speech_prompt(text, language);
        tracing::debug!(voice, language, chars = text.len(), "requesting speech");

        let config = GenerationConfig::spoken(voice);
        let response = self.generate(&self.tts_model, prompt, Some(&config)).await?;

        let blob = response
            .first_content()
            .and_then(|c| c.audio_blobs().next())
            .ok_or_else(|| Error::Api("response contained no audio".to_string()))?;

        let pcm = decode_base64(&blob.data)?;
        tracing::debug!(bytes = pcm.len(), "speech received");
        Ok(pcm)
    }

    /// Single-shot text response from the fast chat model
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn generate_fast_response(&self, prompt: &str) -> Result<String> {
        let response = self
            .generate(&self.chat_model, prompt.to_string(), None)
            .await?;

        Ok(response
            .first_content()
            .map(Content::joined_text)
            .unwrap_or_default())
    }

    /// Ask for a short paragraph to try a voice with
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn suggest_text(&self, language: &str) -> Result<String> {
        let text = self.generate_fast_response(&suggestion_prompt(language)).await?;
        Ok(text.trim().to_string())
    }
}

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Model,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("User"),
            Self::Model => f.write_str("Model"),
        }
    }
}

/// Opening line of a fresh chat
pub const CHAT_GREETING: &str =
    "Hello! I am running on Gemini Flash Lite. I am optimized for speed. How can I help you today?";

/// Reply recorded in place of a failed exchange
pub const CHAT_ERROR_REPLY: &str = "Sorry, I encountered an error. Please try again.";

/// Running fast-chat transcript
///
/// Only the last few turns are replayed into each prompt.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    turns: Vec<(ChatRole, String)>,
}

impl ChatHistory {
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// History opened by the model's greeting
    #[must_use]
    pub fn greeted() -> Self {
        let mut history = Self::new();
        history.push(ChatRole::Model, CHAT_GREETING);
        history
    }

    pub fn push(&mut self, role: ChatRole, text: impl Into<String>) {
        self.turns.push((role, text.into()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Prompt for `message` with recent turns as context
    #[must_use]
    pub fn prompt_for(&self, message: &str) -> String {
        let start = self.turns.len().saturating_sub(HISTORY_TURNS);
        let mut lines: Vec<String> = self.turns[start..]
            .iter()
            .map(|(role, text)| format!("{role}: {text}"))
            .collect();
        lines.push(format!("User: {message}"));
        lines.push("Model:".to_string());
        lines.join("\n")
    }

    /// Send `message`, recording both sides of the exchange
    ///
    /// # Errors
    ///
    /// Returns error if the request fails; the user turn is still recorded,
    /// answered by [`CHAT_ERROR_REPLY`]
    pub async fn send(&mut self, client: &StudioClient, message: &str) -> Result<String> {
        let prompt = self.prompt_for(message);
        self.push(ChatRole::User, message);

        match client.generate_fast_response(&prompt).await {
            Ok(reply) => {
                self.push(ChatRole::Model, reply.clone());
                Ok(reply)
            }
            Err(e) => {
                self.push(ChatRole::Model, CHAT_ERROR_REPLY);
                Err(e)
            }
        }
    }

    /// Text of the most recent turn
    #[must_use]
    pub fn last(&self) -> Option<(ChatRole, &str)> {
        self.turns.last().map(|(role, text)| (*role, text.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> StudioClient {
        StudioClient::new(
            SecretString::from("key".to_string()),
            "https://example.test/v1beta/".to_string(),
            "models/tts".to_string(),
            "chat".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn english_prompt_is_verbatim() {
        assert_eq!(speech_prompt("Hello", "English"), "Hello");
        assert_eq!(speech_prompt("Hola", "Spanish"), "Say in Spanish: Hola");
    }

    #[test]
    fn suggestion_names_language() {
        assert!(suggestion_prompt("German").contains("in German."));
    }

    #[test]
    fn endpoint_normalizes_model() {
        let client = client();
        assert_eq!(
            client.endpoint("models/tts"),
            "https://example.test/v1beta/models/tts:generateContent"
        );
        assert_eq!(
            client.endpoint("chat"),
            "https://example.test/v1beta/models/chat:generateContent"
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        let result = StudioClient::new(
            SecretString::from(String::new()),
            DEFAULT_API_BASE_URL.to_string(),
            "tts".to_string(),
            "chat".to_string(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn speech_request_shape() {
        let config = GenerationConfig::spoken("Kore");
        let request = GenerateContentRequest {
            contents: vec![Content::text("Hi")],
            generation_config: Some(&config),
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "Hi");
        assert_eq!(json["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
    }

    #[test]
    fn response_audio_is_found() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[
                {"inlineData":{"mimeType":"audio/L16;codec=pcm;rate=24000","data":"AQA="}}
            ]}}]}"#,
        )
        .unwrap();

        let blob = response.first_content().and_then(|c| c.audio_blobs().next()).unwrap();
        assert_eq!(decode_base64(&blob.data).unwrap(), vec![1, 0]);
    }

    #[test]
    fn history_keeps_last_turns() {
        let mut history = ChatHistory::new();
        for i in 0..3 {
            history.push(ChatRole::User, format!("q{i}"));
            history.push(ChatRole::Model, format!("a{i}"));
        }

        let prompt = history.prompt_for("next");
        assert_eq!(prompt, "User: q1\nModel: a1\nUser: q2\nModel: a2\nUser: next\nModel:");
    }

    #[test]
    fn greeting_opens_the_context() {
        let history = ChatHistory::greeted();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history.prompt_for("hi"),
            format!("Model: {CHAT_GREETING}\nUser: hi\nModel:")
        );
    }

    #[tokio::test]
    async fn failed_exchange_is_recorded() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = StudioClient::new(
            SecretString::from("key".to_string()),
            format!("http://{addr}/v1beta"),
            "tts".to_string(),
            "chat".to_string(),
        )
        .unwrap();

        let mut history = ChatHistory::greeted();
        assert!(history.send(&client, "hello?").await.is_err());

        assert_eq!(history.len(), 3);
        assert_eq!(history.last(), Some((ChatRole::Model, CHAT_ERROR_REPLY)));
        assert!(history.prompt_for("again").contains("User: hello?\nModel: Sorry"));
    }
}
