use log::warn;
use std::collections::HashMap;
use std::fmt;

use crate::core::config::{AudioConfig, UnmappedSpeaker};
use crate::services::script::ItemError;

/// Speakers with a fixed voice regardless of configuration.
const BUILTIN_VOICES: &[(&str, &str)] = &[("KSE", "echo")];

#[derive(Debug, Clone)]
pub struct VoiceMap {
    voices: HashMap<String, String>,
    default_voice: String,
    unmapped: UnmappedSpeaker,
}

impl VoiceMap {
    pub fn new(default_voice: &str) -> Self {
        let voices = BUILTIN_VOICES
            .iter()
            .map(|(speaker, voice)| (speaker.to_string(), voice.to_string()))
            .collect();
        Self {
            voices,
            default_voice: default_voice.to_string(),
            unmapped: UnmappedSpeaker::Fallback,
        }
    }

    pub fn from_config(audio: &AudioConfig) -> Self {
        let mut map = Self::new(&audio.default_voice).with_policy(audio.unmapped_speaker);
        for (speaker, voice) in &audio.voices {
            map.voices.insert(speaker.clone(), voice.clone());
        }
        map
    }

    pub fn with_policy(mut self, policy: UnmappedSpeaker) -> Self {
        self.unmapped = policy;
        self
    }

    pub fn with_voice(mut self, speaker: &str, voice: &str) -> Self {
        self.voices.insert(speaker.to_string(), voice.to_string());
        self
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    pub fn resolve(&self, speaker: Option<&str>) -> Result<String, ItemError> {
        let Some(speaker) = speaker else {
            return Ok(self.default_voice.clone());
        };

        if let Some(voice) = self.voices.get(speaker) {
            return Ok(voice.clone());
        }

        match self.unmapped {
            UnmappedSpeaker::Fallback => {
                warn!(
                    "Speaker {} has no voice mapping, using default voice {}",
                    speaker, self.default_voice
                );
                Ok(self.default_voice.clone())
            }
            UnmappedSpeaker::Reject => Err(ItemError::UnmappedSpeaker(speaker.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub identifier: String,
    pub error: String,
}

/// Outcome counters for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub generated: usize,
    pub skipped_existing: usize,
    pub skipped_duplicate: usize,
    pub malformed: usize,
    pub failed: Vec<FailedItem>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.generated
            + self.skipped_existing
            + self.skipped_duplicate
            + self.malformed
            + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.malformed == 0 && self.failed.is_empty()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} generated, {} already present, {} duplicate, {} malformed, {} failed",
            self.generated,
            self.skipped_existing,
            self.skipped_duplicate,
            self.malformed,
            self.failed.len()
        )
    }
}
