//! Artifact directory access
//! Uses the object_store crate's local filesystem backend

use chrono::{DateTime, Utc};
use object_store::local::LocalFileSystem;
use object_store::{GetResult, ObjectStore, path::Path as StoragePath};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid artifact name: {0}")]
    InvalidName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// One file in the artifact directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMeta {
    pub filename: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Flat directory of `<job_id>.<ext>` files
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    root: PathBuf,
}

impl ArtifactStore {
    /// Open the artifact directory, creating it if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let root = dir.as_ref().canonicalize()?;
        let store = LocalFileSystem::new_with_prefix(&root)?;

        tracing::info!(dir = %root.display(), "Artifact directory ready");
        Ok(Self {
            store: Arc::new(store),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output template handed to the fetch tool; the tool fills in `%(ext)s`
    pub fn output_template(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{job_id}.%(ext)s"))
    }

    /// Absolute path of an artifact
    pub fn path_of(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.root.join(filename))
    }

    /// All regular files directly under the artifact directory
    ///
    /// Entries are read one at a time; a name that is not valid UTF-8 or not a
    /// bare artifact name is logged and skipped instead of failing the
    /// listing. object_store's local listing gives up at the first such entry.
    pub async fn list(&self) -> Result<Vec<ArtifactMeta>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut artifacts = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Ok(filename) = entry.file_name().into_string() else {
                tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                continue;
            };
            if validate_filename(&filename).is_err() {
                tracing::warn!(filename, "Skipping unexpected file name");
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                // removed between read_dir and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(filename, error = %e, "Skipping unreadable artifact");
                    continue;
                }
            };

            artifacts.push(ArtifactMeta {
                filename,
                size: metadata.len(),
                last_modified: metadata.modified().map(DateTime::<Utc>::from)?,
            });
        }

        Ok(artifacts)
    }

    /// First artifact, in byte order, whose name starts with `prefix`
    pub async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ArtifactMeta>> {
        let found = self
            .list()
            .await?
            .into_iter()
            .filter(|a| a.filename.starts_with(prefix))
            .min_by(|a, b| a.filename.cmp(&b.filename));
        Ok(found)
    }

    /// Open an artifact for streaming
    pub async fn get(&self, filename: &str) -> Result<GetResult> {
        validate_filename(filename)?;
        match self.store.get(&StoragePath::from(filename)).await {
            Ok(result) => Ok(result),
            Err(object_store::Error::NotFound { .. }) => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, filename: &str) -> Result<()> {
        validate_filename(filename)?;
        match self.store.delete(&StoragePath::from(filename)).await {
            Ok(()) => {
                tracing::debug!(filename, "Artifact deleted");
                Ok(())
            }
            Err(object_store::Error::NotFound { .. }) => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Accept bare file names only; anything that could step outside the
/// artifact directory is rejected.
pub fn validate_filename(filename: &str) -> Result<()> {
    let bad = filename.is_empty()
        || filename == "."
        || filename.contains("..")
        || filename.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidName(filename.to_string()));
    }
    Ok(())
}

/// Content type from the file extension, `fallback` when unknown
pub fn content_type_for(filename: &str, fallback: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let known = match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("m4a") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("vtt") => "text/vtt",
        Some("srt") => "application/x-subrip",
        Some("json") => return mime::APPLICATION_JSON.to_string(),
        Some("txt") => return mime::TEXT_PLAIN.to_string(),
        _ => fallback,
    };
    known.to_string()
}
