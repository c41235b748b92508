use crate::services::tts::{AudioFormat, AudioStream, ProviderError, SpeechClient, SpeechRequest};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAiSpeechConfig {
    /// Falls back to `OPENAI_API_KEY` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for OpenAiSpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "tts-1".to_string()
}

impl OpenAiSpeechConfig {
    pub fn speech_endpoint(&self) -> Result<Url> {
        let base = format!("{}/", self.base_url.trim_end_matches('/'));
        let base = Url::parse(&base).with_context(|| format!("Invalid base_url: {}", self.base_url))?;
        Ok(base.join("audio/speech")?)
    }

    fn resolve_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| anyhow!("No API key: set audio.openai.api_key or {}", API_KEY_ENV))
    }
}

// --- Wire types ---

#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: AudioFormat,
    speed: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.trim().to_string(),
    }
}

// --- Client ---

pub struct OpenAiSpeechClient {
    api_key: String,
    model: String,
    endpoint: Url,
    client: reqwest::Client,
}

impl OpenAiSpeechClient {
    pub fn new(config: OpenAiSpeechConfig) -> Result<Self> {
        Self::with_api_key(&config, config.resolve_api_key()?)
    }

    pub fn with_api_key(config: &OpenAiSpeechConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            api_key,
            model: config.model.clone(),
            endpoint: config.speech_endpoint()?,
            client: reqwest::Client::new(),
        })
    }

    fn body<'a>(&'a self, request: &'a SpeechRequest) -> SpeechBody<'a> {
        SpeechBody {
            model: &self.model,
            input: &request.input,
            voice: &request.voice,
            response_format: request.format,
            speed: request.speed,
            instructions: request.instructions.as_deref(),
        }
    }
}

#[async_trait]
impl SpeechClient for OpenAiSpeechClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream, ProviderError> {
        debug!(
            "POST {} model={} voice={} ({} chars)",
            self.endpoint,
            self.model,
            request.voice,
            request.input.chars().count()
        );

        let resp = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), error_message(&text)));
        }

        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(ProviderError::from))
            .boxed())
    }
}
