use crate::core::config::{Config, FileNaming};
use crate::core::io::OutputDir;
use crate::core::state::{BatchSummary, FailedItem, VoiceMap};
use crate::services::script::{derive_filename, load_script, DialogueItem, Script, ScriptEntry};
use crate::services::tts::{AudioFormat, ProviderError, SpeechClient, SpeechRequest};
use anyhow::Result;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

enum Outcome {
    Generated,
    Existing,
    Duplicate,
    Malformed,
    Failed(String, ProviderError),
}

/// Turns dialogue items into audio clips, one provider call per missing clip.
pub struct BatchGenerator {
    config: Config,
    client: Box<dyn SpeechClient>,
}

impl BatchGenerator {
    pub fn new(config: Config, client: Box<dyn SpeechClient>) -> Self {
        Self { config, client }
    }

    /// Loads the configured script and generates into the configured output folder.
    pub async fn run(&self) -> Result<BatchSummary> {
        let voices = VoiceMap::from_config(&self.config.audio);
        let script = load_script(Path::new(&self.config.script_file), &voices)?;
        info!(
            "Loaded {} script entries ({:?} layout) from {}",
            script.entries.len(),
            script.layout,
            self.config.script_file
        );
        self.generate(&script, Path::new(&self.config.output_folder))
            .await
    }

    /// Items are handled strictly in order. Provider failures and malformed
    /// items are recorded and skipped; filesystem errors abort the batch.
    pub async fn generate(&self, script: &Script, output_dir: &Path) -> Result<BatchSummary> {
        let output = OutputDir::new(output_dir);
        output.ensure().await?;

        let naming = self.config.naming.unwrap_or(script.layout.default_naming());
        let pb = ProgressBar::new(script.entries.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );

        let mut summary = BatchSummary::default();
        let mut scheduled: HashSet<PathBuf> = HashSet::new();

        for entry in &script.entries {
            match self.process(entry, naming, &output, &mut scheduled, &pb).await? {
                Outcome::Generated => summary.generated += 1,
                Outcome::Existing => summary.skipped_existing += 1,
                Outcome::Duplicate => summary.skipped_duplicate += 1,
                Outcome::Malformed => summary.malformed += 1,
                Outcome::Failed(identifier, e) => {
                    warn!("Speech generation failed for {}: {}", identifier, e);
                    summary.failed.push(FailedItem {
                        identifier,
                        error: e.to_string(),
                    });
                }
            }
            pb.inc(1);
        }

        pb.finish_with_message("done");
        info!("Batch finished: {}", summary);
        Ok(summary)
    }

    async fn process(
        &self,
        entry: &ScriptEntry,
        naming: FileNaming,
        output: &OutputDir,
        scheduled: &mut HashSet<PathBuf>,
        pb: &ProgressBar,
    ) -> Result<Outcome> {
        let item = match entry {
            Ok(item) => item,
            Err(malformed) => {
                warn!("Skipping malformed {}", malformed);
                return Ok(Outcome::Malformed);
            }
        };

        let path = output.artifact_path(&derive_filename(item, naming, self.format()));
        if !scheduled.insert(path.clone()) {
            debug!("{} already handled in this run", path.display());
            return Ok(Outcome::Duplicate);
        }
        if output.is_complete(&path).await? {
            debug!("{} exists, skipping", path.display());
            return Ok(Outcome::Existing);
        }

        pb.set_message(item.identifier.clone());
        info!("Generating speech for {}", item.identifier);

        let request = self.request_for(item);
        let mut stream = match self.client.synthesize(&request).await {
            Ok(stream) => stream,
            Err(e) => return Ok(Outcome::Failed(item.identifier.clone(), e)),
        };

        let mut artifact = output.begin(&path)?;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => artifact.write_chunk(&bytes).await?,
                Err(e) => return Ok(Outcome::Failed(item.identifier.clone(), e)),
            }
        }
        if artifact.written() == 0 {
            return Ok(Outcome::Failed(
                item.identifier.clone(),
                ProviderError::EmptyAudio,
            ));
        }

        let written = artifact.commit().await?;
        debug!("Wrote {} bytes to {}", written, path.display());
        Ok(Outcome::Generated)
    }

    fn request_for(&self, item: &DialogueItem) -> SpeechRequest {
        SpeechRequest {
            input: item.text.clone(),
            voice: item.voice.clone(),
            format: self.format(),
            speed: self.config.audio.speed,
            instructions: self.config.audio.instructions.clone(),
        }
    }

    fn format(&self) -> AudioFormat {
        self.config.audio.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::script::parse_script;
    use crate::services::tts::AudioStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;
    use std::fs;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        RejectText(&'static str),
        BreakMidStream,
        Empty,
    }

    struct MockSpeechClient {
        calls: Arc<Mutex<Vec<SpeechRequest>>>,
        behavior: Behavior,
    }

    impl MockSpeechClient {
        fn new(behavior: Behavior) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                behavior,
            }
        }
    }

    #[async_trait]
    impl SpeechClient for MockSpeechClient {
        fn name(&self) -> &str {
            "mock"
        }

        async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream, ProviderError> {
            self.calls.lock().unwrap().push(request.clone());

            let body = Bytes::from(request.input.clone().into_bytes());
            match self.behavior {
                Behavior::RejectText(text) if request.input == text => {
                    Err(ProviderError::RateLimited("slow down".to_string()))
                }
                Behavior::BreakMidStream => Ok(stream::iter(vec![
                    Ok(Bytes::from_static(b"RIFF")),
                    Err(ProviderError::Api {
                        status: 500,
                        message: "connection reset".to_string(),
                    }),
                ])
                .boxed()),
                Behavior::Empty => Ok(stream::iter(Vec::<Result<Bytes, ProviderError>>::new()).boxed()),
                _ => Ok(stream::iter(vec![Ok(Bytes::from_static(b"RIFF")), Ok(body)]).boxed()),
            }
        }
    }

    fn generator(behavior: Behavior) -> (BatchGenerator, Arc<Mutex<Vec<SpeechRequest>>>) {
        let client = MockSpeechClient::new(behavior);
        let calls = client.calls.clone();
        (BatchGenerator::new(Config::default(), Box::new(client)), calls)
    }

    fn entries(json: &str) -> Script {
        parse_script(json, &VoiceMap::new("alloy")).unwrap()
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_second_run_issues_no_calls() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let output_dir = temp_dir.path().join("speech");
        let script = entries(r#"[{"file":"a1","text":"hello"}]"#);

        let (generator, calls) = generator(Behavior::Succeed);

        let first = generator.generate(&script, &output_dir).await?;
        assert_eq!(first.generated, 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(calls.lock().unwrap()[0].voice, "alloy");
        assert_eq!(fs::read(output_dir.join("a1-alloy.wav"))?, b"RIFFhello");

        let second = generator.generate(&script, &output_dir).await?;
        assert_eq!(second.generated, 0);
        assert_eq!(second.skipped_existing, 1);
        assert_eq!(calls.lock().unwrap().len(), 1, "Second run must not call the provider");
        Ok(())
    }

    #[tokio::test]
    async fn test_every_item_generated_once() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let script = entries(
            r#"[
                {"file":"a1","text":"one"},
                {"file":"a2","text":"two","speaker":"KSE"},
                {"file":"a3","text":"three"}
            ]"#,
        );

        let (generator, calls) = generator(Behavior::Succeed);
        let summary = generator.generate(&script, temp_dir.path()).await?;

        assert_eq!(summary.generated, 3);
        assert!(summary.is_clean());
        assert_eq!(
            files_in(temp_dir.path()),
            vec!["a1-alloy.wav", "a2-echo.wav", "a3-alloy.wav"]
        );

        let calls = calls.lock().unwrap();
        let inputs: Vec<&str> = calls.iter().map(|r| r.input.as_str()).collect();
        assert_eq!(inputs, vec!["one", "two", "three"]);
        assert_eq!(calls[1].voice, "echo");
        assert!(calls.iter().all(|r| r.speed == 1.0 && r.format == AudioFormat::Wav));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_item_skipped() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let script = entries(r#"[{"text":"orphan"},{"file":"a2","text":"kept"}]"#);

        let (generator, calls) = generator(Behavior::Succeed);
        let summary = generator.generate(&script, temp_dir.path()).await?;

        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.generated, 1);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, "kept");
        Ok(())
    }

    #[tokio::test]
    async fn test_provider_error_does_not_abort_batch() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let script = entries(
            r#"[{"file":"a1","text":"one"},{"file":"a2","text":"two"},{"file":"a3","text":"three"}]"#,
        );

        let (generator, calls) = generator(Behavior::RejectText("two"));
        let summary = generator.generate(&script, temp_dir.path()).await?;

        assert_eq!(summary.generated, 2);
        assert_eq!(
            summary.failed,
            vec![FailedItem {
                identifier: "a2".to_string(),
                error: "rate limited: slow down".to_string(),
            }]
        );
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(
            files_in(temp_dir.path()),
            vec!["a1-alloy.wav", "a3-alloy.wav"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_broken_stream_leaves_no_artifact() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let script = entries(r#"[{"file":"a1","text":"hello"}]"#);

        let (generator, calls) = generator(Behavior::BreakMidStream);
        let summary = generator.generate(&script, temp_dir.path()).await?;

        assert_eq!(summary.failed.len(), 1);
        assert!(
            files_in(temp_dir.path()).is_empty(),
            "No partial or temp file may remain"
        );

        let rerun = generator.generate(&script, temp_dir.path()).await?;
        assert_eq!(rerun.skipped_existing, 0);
        assert_eq!(calls.lock().unwrap().len(), 2, "Rerun must retry the clip");
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_audio_is_a_failure() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let script = entries(r#"[{"file":"a1","text":"hello"}]"#);

        let (generator, _calls) = generator(Behavior::Empty);
        let summary = generator.generate(&script, temp_dir.path()).await?;

        assert_eq!(summary.failed[0].error, "provider returned no audio");
        assert!(files_in(temp_dir.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_clip_requested_once() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let script = entries(
            r#"{"groups": [
                {"name": "S1", "script": [
                    {"id": 1, "callsign": "KSE123", "file": "tower.wav", "dialog": "Cleared to land"}
                ]},
                {"name": "S2", "background_script": [
                    {"id": 1, "callsign": "TWR", "file": "tower.wav", "dialog": "Cleared to land"}
                ]}
            ]}"#,
        );

        let config = Config {
            naming: Some(FileNaming::Identifier),
            ..Config::default()
        };
        let client = MockSpeechClient::new(Behavior::RejectText("Cleared to land"));
        let calls = client.calls.clone();
        let generator = BatchGenerator::new(config, Box::new(client));

        let summary = generator.generate(&script, temp_dir.path()).await?;
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.skipped_duplicate, 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_nested_script_with_default_config() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let script = entries(
            r#"{"groups": [{
                "name": "S1",
                "script": [
                    {"id": 1, "callsign": "KSE123", "file": "s1-1.wav", "dialog": "Cleared to land"}
                ],
                "background_script": null
            }]}"#,
        );

        let (generator, calls) = generator(Behavior::Succeed);
        let summary = generator.generate(&script, temp_dir.path()).await?;

        assert_eq!(summary.generated, 1);
        assert!(summary.is_clean());
        assert_eq!(files_in(temp_dir.path()), vec!["s1-1.wav"]);
        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].input, "Cleared to land");
        assert_eq!(calls[0].voice, "alloy");
        Ok(())
    }

    #[tokio::test]
    async fn test_instructions_and_naming_from_config() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut config = Config {
            naming: Some(FileNaming::Identifier),
            ..Config::default()
        };
        config.audio.format = AudioFormat::Mp3;
        config.audio.instructions = Some("Terse radio phraseology.".to_string());

        let client = MockSpeechClient::new(Behavior::Succeed);
        let calls = client.calls.clone();
        let generator = BatchGenerator::new(config, Box::new(client));

        let script = entries(r#"[{"file":"a1","text":"one"},{"file":"a2","text":"two"}]"#);
        generator.generate(&script, temp_dir.path()).await?;

        assert_eq!(files_in(temp_dir.path()), vec!["a1.mp3", "a2.mp3"]);
        let calls = calls.lock().unwrap();
        assert!(calls
            .iter()
            .all(|r| r.instructions.as_deref() == Some("Terse radio phraseology.")
                && r.format == AudioFormat::Mp3));
        Ok(())
    }

    #[tokio::test]
    async fn test_run_reads_configured_script() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("speech.json");
        let output_dir = temp_dir.path().join("public").join("speech");
        fs::write(
            &script_path,
            r#"[{"file":"a1","text":"hello","speaker":"TWR"}]"#,
        )?;

        let mut config = Config {
            script_file: script_path.to_string_lossy().to_string(),
            output_folder: output_dir.to_string_lossy().to_string(),
            ..Config::default()
        };
        config.audio.voices.insert("TWR".to_string(), "onyx".to_string());

        let client = MockSpeechClient::new(Behavior::Succeed);
        let calls = client.calls.clone();
        let generator = BatchGenerator::new(config, Box::new(client));

        let summary = generator.run().await?;
        assert_eq!(summary.generated, 1);
        assert_eq!(calls.lock().unwrap()[0].voice, "onyx");
        assert!(output_dir.join("a1-onyx.wav").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_unwritable_output_is_fatal() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let blocker = temp_dir.path().join("speech");
        fs::write(&blocker, b"not a directory")?;

        let (generator, calls) = generator(Behavior::Succeed);
        let script = entries(r#"[{"file":"a1","text":"hello"}]"#);

        assert!(generator.generate(&script, &blocker).await.is_err());
        assert!(calls.lock().unwrap().is_empty());
        Ok(())
    }
}
