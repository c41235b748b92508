use anyhow::{bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::services::tts::openai::OpenAiSpeechConfig;
use crate::services::tts::AudioFormat;

pub const CONFIG_FILE: &str = "config.yml";

const MIN_SPEED: f32 = 0.25;
const MAX_SPEED: f32 = 4.0;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_script")]
    pub script_file: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    /// Unset means: pick by script layout (see `ScriptLayout::default_naming`).
    #[serde(default)]
    pub naming: Option<FileNaming>,

    #[serde(default)]
    pub audio: AudioConfig,
}

/// How output file names are derived from an item's `file` field.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileNaming {
    /// `{file}-{voice}.{ext}`
    WithVoice,
    /// `{file}.{ext}`, or `{file}` when it already carries the extension
    Identifier,
}

/// What to do with a speaker that has no entry in the voice map.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedSpeaker {
    #[default]
    Fallback,
    Reject,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    #[serde(default = "default_voice")]
    pub default_voice: String,

    /// Speaker name to voice id, layered over the built-in table.
    #[serde(default)]
    pub voices: HashMap<String, String>,

    #[serde(default)]
    pub unmapped_speaker: UnmappedSpeaker,

    #[serde(default)]
    pub format: AudioFormat,

    #[serde(default = "default_speed")]
    pub speed: f32,

    /// Style/tone prompt sent with every request of a run.
    #[serde(default)]
    pub instructions: Option<String>,

    pub openai: Option<OpenAiSpeechConfig>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            default_voice: default_voice(),
            voices: HashMap::new(),
            unmapped_speaker: UnmappedSpeaker::default(),
            format: AudioFormat::default(),
            speed: default_speed(),
            instructions: None,
            openai: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            script_file: default_script(),
            output_folder: default_output(),
            naming: None,
            audio: AudioConfig::default(),
        }
    }
}

fn default_script() -> String {
    "speech.json".to_string()
}
fn default_output() -> String {
    "public/speech".to_string()
}
fn default_tts_provider() -> String {
    "openai".to_string()
}
fn default_voice() -> String {
    "alloy".to_string()
}
fn default_speed() -> f32 {
    1.0
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Reads the YAML config at `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("{} not found, using built-in defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_yaml_ng::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.audio.provider.as_str() {
            "openai" => {}
            other => bail!("Unknown TTS provider: {}", other),
        }

        if !(MIN_SPEED..=MAX_SPEED).contains(&self.audio.speed) {
            bail!(
                "audio.speed must be between {} and {}, got {}",
                MIN_SPEED,
                MAX_SPEED,
                self.audio.speed
            );
        }

        if self.audio.default_voice.trim().is_empty() {
            bail!("audio.default_voice must not be empty");
        }

        if let Some(openai) = &self.audio.openai {
            openai.speech_endpoint()?;
        }

        Ok(())
    }
}
