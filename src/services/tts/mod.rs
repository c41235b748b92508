use crate::core::config::Config;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod openai;

/// Audio container requested from the provider. Also decides the file extension.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Opus,
    Aac,
    Flac,
    #[default]
    Wav,
    Pcm,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Opus => "opus",
            AudioFormat::Aac => "aac",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm => "pcm",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub input: String,
    pub voice: String,
    pub format: AudioFormat,
    pub speed: f32,
    pub instructions: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("request rejected ({status}): {message}")]
    InvalidRequest { status: u16, message: String },
    #[error("provider error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned no audio")]
    EmptyAudio,
}

impl ProviderError {
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ProviderError::Authentication { status, message },
            429 => ProviderError::RateLimited(message),
            400 | 404 | 413 | 422 => ProviderError::InvalidRequest { status, message },
            _ => ProviderError::Api { status, message },
        }
    }
}

/// Audio bytes as they arrive. An `Err` item aborts the clip.
pub type AudioStream = BoxStream<'static, Result<Bytes, ProviderError>>;

#[async_trait]
pub trait SpeechClient: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream, ProviderError>;
}

pub fn create_speech_client(config: &Config) -> Result<Box<dyn SpeechClient>> {
    match config.audio.provider.as_str() {
        "openai" => {
            let openai_config = config.audio.openai.clone().unwrap_or_default();
            let client = openai::OpenAiSpeechClient::new(openai_config)
                .context("Failed to initialize OpenAI speech client")?;
            Ok(Box::new(client))
        }
        _ => Err(anyhow!("Unknown TTS provider: {}", config.audio.provider)),
    }
}
