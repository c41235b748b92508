use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

/// The directory generated clips land in. A regular file at an artifact path
/// marks that clip as done.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create output folder {}", self.root.display()))
    }

    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub async fn is_complete(&self, path: &Path) -> Result<bool> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path.display())),
        }
    }

    /// Opens a hidden temp file next to `target`. Nothing appears at `target`
    /// until [`PartialArtifact::commit`]; dropping the artifact deletes the
    /// temp file.
    pub fn begin(&self, target: &Path) -> Result<PartialArtifact> {
        let temp = tempfile::Builder::new()
            .prefix(".speech-")
            .suffix(".part")
            .tempfile_in(&self.root)
            .with_context(|| format!("Failed to create temp file in {}", self.root.display()))?;
        let (file, temp_path) = temp.into_parts();

        Ok(PartialArtifact {
            file: tokio::fs::File::from_std(file),
            temp_path,
            target: target.to_path_buf(),
            written: 0,
        })
    }
}

pub struct PartialArtifact {
    // Declared before `temp_path` so the handle closes before the file is removed.
    file: tokio::fs::File,
    temp_path: TempPath,
    target: PathBuf,
    written: u64,
}

impl PartialArtifact {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .with_context(|| format!("Failed to write {}", self.temp_path.display()))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Flushes the temp file and renames it onto the target path.
    pub async fn commit(self) -> Result<u64> {
        let PartialArtifact {
            mut file,
            temp_path,
            target,
            written,
        } = self;

        file.flush().await?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync {}", temp_path.display()))?;
        drop(file);

        temp_path
            .persist(&target)
            .with_context(|| format!("Failed to move audio into {}", target.display()))?;
        Ok(written)
    }
}
