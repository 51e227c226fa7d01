//! Speech synthesis client (ElevenLabs-style HTTP API)
//!
//! Speech generation is a remote call; transport and HTTP failures surface as
//! errors so the orchestrator can apply its retry policy. Custom voices are
//! created from a user-provided sample and referenced by voice ID on the
//! identity record.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io/v1";
const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
const TTS_MODEL: &str = "eleven_multilingual_v2";

/// TTS errors
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("TTS API key not configured")]
    MissingApiKey,

    #[error("TTS request failed: {0}")]
    Request(String),

    #[error("TTS API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for TTS operations
pub type Result<T> = std::result::Result<T, TtsError>;

/// TTS provider configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Voice used when an identity carries no voice profile
    pub default_voice_id: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("ELEVENLABS_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: std::env::var("ELEVENLABS_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            default_voice_id: std::env::var("ELEVENLABS_DEFAULT_VOICE_ID")
                .unwrap_or_else(|_| DEFAULT_VOICE_ID.to_string()),
        }
    }
}

/// Voice rendering parameters sent with each synthesis request
#[derive(Debug, Clone, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.6,
            similarity_boost: 0.8,
            style: 0.0,
            use_speaker_boost: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

#[derive(Debug, Deserialize)]
struct VoiceCreatedResponse {
    voice_id: String,
}

/// Client for the speech synthesis API
pub struct TtsClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    default_voice_id: String,
    voice_settings: VoiceSettings,
}

impl TtsClient {
    /// Build a client; fails when no API key is configured
    pub fn new(config: TtsConfig) -> Result<Self> {
        let api_key = config.api_key.ok_or(TtsError::MissingApiKey)?;
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: config.base_url,
            default_voice_id: config.default_voice_id,
            voice_settings: VoiceSettings::default(),
        })
    }

    /// Voice to use when the identity has no custom voice profile
    #[must_use]
    pub fn default_voice_id(&self) -> &str {
        &self.default_voice_id
    }

    /// Synthesize speech for `text` with the given voice, writing the audio
    /// to `output_path`
    pub async fn synthesize_to_file(
        &self,
        text: &str,
        voice_id: &str,
        output_path: &Path,
    ) -> Result<PathBuf> {
        let url = format!("{}/text-to-speech/{voice_id}", self.base_url);
        let payload = SynthesisRequest {
            text,
            model_id: TTS_MODEL,
            voice_settings: &self.voice_settings,
        };

        let response = self
            .http
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output_path, &audio).await?;

        info!(
            "Synthesized {} chars of speech to {} ({} bytes)",
            text.len(),
            output_path.display(),
            audio.len()
        );
        Ok(output_path.to_path_buf())
    }

    /// Create a custom voice from a sample recording, returning its voice ID
    pub async fn create_custom_voice(
        &self,
        name: &str,
        sample: Vec<u8>,
        description: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}/voices/add", self.base_url);

        let part = reqwest::multipart::Part::bytes(sample)
            .file_name("sample.wav")
            .mime_str("audio/wav")
            .map_err(|e| TtsError::Request(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .text("name", name.to_string())
            .part("files", part);
        if let Some(description) = description {
            form = form.text("description", description.to_string());
        }

        let response = self
            .http
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let created: VoiceCreatedResponse = response
            .json()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;
        Ok(created.voice_id)
    }
}
