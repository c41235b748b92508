use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::core::config::FileNaming;
use crate::core::state::VoiceMap;
use crate::services::tts::AudioFormat;

/// One line of dialogue, validated and with its voice resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueItem {
    pub identifier: String,
    pub text: String,
    pub speaker: Option<String>,
    pub voice: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("`{0}` is not a plain file name")]
    InvalidIdentifier(String),
    #[error("speaker `{0}` has no voice mapping")]
    UnmappedSpeaker(String),
    #[error("entry is not an object")]
    NotAnObject,
    #[error("invalid entry: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MalformedItem {
    /// 1-based position in the flattened script.
    pub position: usize,
    pub label: String,
    pub error: ItemError,
}

impl fmt::Display for MalformedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item #{} ({}): {}", self.position, self.label, self.error)
    }
}

pub type ScriptEntry = std::result::Result<DialogueItem, MalformedItem>;

/// Which of the two accepted document shapes a script was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLayout {
    /// A bare list of entries.
    Flat,
    /// `{"groups": [...]}` with `script` / `background_script` lists.
    Groups,
}

impl ScriptLayout {
    /// Flat scripts name clips after file and voice; grouped scripts are
    /// played back by their `file` value, so it is used as-is.
    pub fn default_naming(self) -> FileNaming {
        match self {
            ScriptLayout::Flat => FileNaming::WithVoice,
            ScriptLayout::Groups => FileNaming::Identifier,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub layout: ScriptLayout,
    pub entries: Vec<ScriptEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    file: Option<String>,
    #[serde(alias = "dialog", alias = "dialogue")]
    text: Option<String>,
    speaker: Option<String>,
}

#[derive(Deserialize)]
struct ScriptDocument {
    groups: Vec<ScriptGroup>,
}

#[derive(Deserialize)]
struct ScriptGroup {
    name: Option<String>,
    script: Option<Vec<Value>>,
    background_script: Option<Vec<Value>>,
}

pub fn load_script(path: &Path, voices: &VoiceMap) -> Result<Script> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    parse_script(&content, voices).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Accepts either a flat list of entries or a `{"groups": [...]}` document and
/// flattens both into one ordered sequence.
pub fn parse_script(json: &str, voices: &VoiceMap) -> Result<Script> {
    let document: Value = serde_json::from_str(json)?;

    let (layout, raw): (ScriptLayout, Vec<(String, Value)>) = match document {
        Value::Array(entries) => (
            ScriptLayout::Flat,
            entries
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("[{}]", i), v))
                .collect(),
        ),
        Value::Object(map) if map.contains_key("groups") => {
            let doc: ScriptDocument = serde_json::from_value(Value::Object(map))
                .context("Invalid `groups` document")?;
            (ScriptLayout::Groups, flatten_groups(doc))
        }
        _ => bail!("Script must be a list of entries or an object with `groups`"),
    };

    let entries = raw
        .into_iter()
        .enumerate()
        .map(|(i, (source, value))| build_entry(i + 1, &source, value, voices))
        .collect();
    Ok(Script { layout, entries })
}

fn flatten_groups(doc: ScriptDocument) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for (g, group) in doc.groups.into_iter().enumerate() {
        let group_label = group.name.unwrap_or_else(|| format!("groups[{}]", g));
        for (list, entries) in [("script", group.script), ("background_script", group.background_script)] {
            for (i, v) in entries.unwrap_or_default().into_iter().enumerate() {
                out.push((format!("{}.{}[{}]", group_label, list, i), v));
            }
        }
    }
    out
}

fn build_entry(position: usize, source: &str, value: Value, voices: &VoiceMap) -> ScriptEntry {
    let label = value
        .get("file")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| source.to_string());

    validate_entry(value, voices).map_err(|error| MalformedItem {
        position,
        label,
        error,
    })
}

fn validate_entry(value: Value, voices: &VoiceMap) -> std::result::Result<DialogueItem, ItemError> {
    if !value.is_object() {
        return Err(ItemError::NotAnObject);
    }
    let raw: RawEntry =
        serde_json::from_value(value).map_err(|e| ItemError::Invalid(e.to_string()))?;

    let identifier = required(raw.file, "file")?.trim().to_string();
    if !is_plain_file_name(&identifier) {
        return Err(ItemError::InvalidIdentifier(identifier));
    }
    let text = required(raw.text, "text")?;
    let speaker = raw
        .speaker
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let voice = voices.resolve(speaker.as_deref())?;

    Ok(DialogueItem {
        identifier,
        text,
        speaker,
        voice,
    })
}

fn required(value: Option<String>, field: &'static str) -> std::result::Result<String, ItemError> {
    let value = value.ok_or(ItemError::MissingField(field))?;
    if value.trim().is_empty() {
        return Err(ItemError::EmptyField(field));
    }
    Ok(value)
}

fn is_plain_file_name(name: &str) -> bool {
    !name.contains('/') && !name.contains('\\') && name != "." && name != ".."
}

pub fn derive_filename(item: &DialogueItem, naming: FileNaming, format: AudioFormat) -> String {
    let ext = format.extension();
    match naming {
        FileNaming::WithVoice => format!("{}-{}.{}", item.identifier, item.voice, ext),
        FileNaming::Identifier => {
            let suffix = format!(".{}", ext);
            if item.identifier.ends_with(&suffix) {
                item.identifier.clone()
            } else {
                format!("{}{}", item.identifier, suffix)
            }
        }
    }
}
