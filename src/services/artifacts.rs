use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::models::job::{ArtifactKind, BuildArtifacts};
use crate::services::toolchain::ArtifactPaths;

/// Directory of signed artifacts served for download.
///
/// Output filenames are `<url hash>_<build millis>.<ext>`; names are claimed
/// exclusively, so concurrent jobs never write to the same name. Downloads
/// read straight from disk and never consult the job store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

/// A file ready to be served.
#[derive(Debug)]
pub struct ArtifactFile {
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output names for one build of `source_url` at `built_at`.
    pub fn output_names(source_url: &str, built_at: DateTime<Utc>) -> BuildArtifacts {
        let digest = format!("{:x}", Sha256::digest(source_url.as_bytes()));
        let stem = format!("{}_{}", &digest[..16], built_at.timestamp_millis());
        BuildArtifacts {
            apk: format!("{}.{}", stem, ArtifactKind::Apk.extension()),
            aab: format!("{}.{}", stem, ArtifactKind::Aab.extension()),
        }
    }

    /// Move signed artifacts into the output directory under their final names.
    ///
    /// Both names are claimed with exclusive creates before anything is moved;
    /// if another build already holds them, the timestamp advances by 1 ms.
    pub async fn relocate(
        &self,
        signed: &ArtifactPaths,
        source_url: &str,
    ) -> Result<BuildArtifacts, ArtifactError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let names = self.claim_names(source_url, Utc::now()).await?;
        let apk = self.root.join(&names.apk);
        let aab = self.root.join(&names.aab);
        let moved = match move_file(&signed.apk, &apk).await {
            Ok(()) => move_file(&signed.aab, &aab).await,
            Err(e) => Err(e),
        };
        if let Err(e) = moved {
            // Release the claimed names.
            let _ = tokio::fs::remove_file(&apk).await;
            let _ = tokio::fs::remove_file(&aab).await;
            return Err(e);
        }
        Ok(names)
    }

    async fn claim_names(
        &self,
        source_url: &str,
        built_at: DateTime<Utc>,
    ) -> Result<BuildArtifacts, ArtifactError> {
        let mut at = built_at;
        loop {
            let names = Self::output_names(source_url, at);
            let apk = self.root.join(&names.apk);
            if claim(&apk).await? {
                if claim(&self.root.join(&names.aab)).await? {
                    return Ok(names);
                }
                tokio::fs::remove_file(&apk).await?;
            }
            tracing::debug!(name = %names.apk, "Artifact name taken, advancing timestamp");
            at += TimeDelta::milliseconds(1);
        }
    }

    /// Read an artifact by the filename recorded in a completed job.
    pub async fn open(&self, filename: &str) -> Result<ArtifactFile, ArtifactError> {
        let kind = artifact_kind(filename).ok_or(ArtifactError::NotFound)?;
        match tokio::fs::read(self.root.join(filename)).await {
            Ok(bytes) => Ok(ArtifactFile { kind, bytes }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ArtifactError::NotFound),
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }
}

/// Kind of a well-formed artifact filename; `None` for anything that could
/// escape the output directory or was never produced by a build.
pub fn artifact_kind(filename: &str) -> Option<ArtifactKind> {
    let (stem, extension) = filename.rsplit_once('.')?;
    if stem.is_empty()
        || !stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    ArtifactKind::from_str(extension).ok()
}

/// Create `path` only if nothing exists there yet. `false` when it is taken.
async fn claim(path: &Path) -> Result<bool, ArtifactError> {
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(ArtifactError::Io(e)),
    }
}

/// Rename over a claimed placeholder, falling back to copy + remove across
/// filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<(), ArtifactError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact not found")]
    NotFound,

    #[error("Artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
