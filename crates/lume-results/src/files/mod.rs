//! File references stored on results and the filesystem they resolve against.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ResultsError;

mod serializers;

pub use serializers::{BytesSerializer, JsonSerializer, Serializer, TextSerializer};

/// Identifier of the local filesystem
pub const LOCAL_FILESYSTEM: &str = "local";

/// Content type of a referenced file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Hdf5,
    Image,
    Text,
    Json,
}

/// A file attached to a result, located on a named filesystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileReference {
    /// Path relative to the filesystem root, or absolute
    pub filename: String,
    /// Filesystem the file lives on
    pub filesystem_identifier: String,
    /// Content type
    pub kind: FileKind,
}

impl FileReference {
    /// Create a reference
    pub fn new(
        kind: FileKind,
        filename: impl Into<String>,
        filesystem_identifier: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            filesystem_identifier: filesystem_identifier.into(),
            kind,
        }
    }

    /// Reference an HDF5 archive
    pub fn hdf5(filename: impl Into<String>, filesystem_identifier: impl Into<String>) -> Self {
        Self::new(FileKind::Hdf5, filename, filesystem_identifier)
    }

    /// Reference an image
    pub fn image(filename: impl Into<String>, filesystem_identifier: impl Into<String>) -> Self {
        Self::new(FileKind::Image, filename, filesystem_identifier)
    }

    fn check_filesystem(&self, filesystem: &LocalFilesystem) -> Result<(), ResultsError> {
        if self.filesystem_identifier == filesystem.identifier() {
            Ok(())
        } else {
            Err(ResultsError::Configuration(format!(
                "File {} lives on filesystem {}, not {}",
                self.filename,
                self.filesystem_identifier,
                filesystem.identifier()
            )))
        }
    }

    /// Read the file through a serializer
    pub async fn read<S: Serializer>(
        &self,
        filesystem: &LocalFilesystem,
        serializer: &S,
    ) -> Result<S::Item, ResultsError> {
        self.check_filesystem(filesystem)?;
        filesystem.read(&self.filename, serializer).await
    }

    /// Write the file through a serializer
    pub async fn write<S: Serializer>(
        &self,
        filesystem: &LocalFilesystem,
        item: &S::Item,
        serializer: &S,
    ) -> Result<(), ResultsError> {
        self.check_filesystem(filesystem)?;
        filesystem.write(&self.filename, item, serializer, true).await
    }
}

/// Filesystem rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalFilesystem {
    root: PathBuf,
}

impl LocalFilesystem {
    /// Create a filesystem rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Identifier matched against `FileReference::filesystem_identifier`
    pub fn identifier(&self) -> &str {
        LOCAL_FILESYSTEM
    }

    /// Absolute path of a file on this filesystem
    pub fn resolve(&self, filename: &str) -> PathBuf {
        let path = Path::new(filename);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Whether the file exists
    pub async fn exists(&self, filename: &str) -> bool {
        tokio::fs::metadata(self.resolve(filename)).await.is_ok()
    }

    /// Read and decode a file
    pub async fn read<S: Serializer>(
        &self,
        filename: &str,
        serializer: &S,
    ) -> Result<S::Item, ResultsError> {
        let path = self.resolve(filename);
        debug!(path = %path.display(), "Reading file");
        let bytes = tokio::fs::read(&path).await?;
        serializer.deserialize(&bytes)
    }

    /// Encode and write a file, creating parent directories when asked
    pub async fn write<S: Serializer>(
        &self,
        filename: &str,
        item: &S::Item,
        serializer: &S,
        create_dirs: bool,
    ) -> Result<(), ResultsError> {
        let path = self.resolve(filename);
        if create_dirs {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serializer.serialize(item)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Writing file");
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }
}
