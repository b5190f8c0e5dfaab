//! File intake: a user-selected file staged for submission.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{DispatchError, Result};

/// A file selected by picker or drop, held until it is submitted or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    name: String,
    content: Vec<u8>,
}

impl StagedFile {
    /// Stage content that is already in memory (e.g., a dropped file).
    pub fn from_bytes(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Read a file from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path)
            .await
            .map_err(|source| DispatchError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        tracing::debug!(file = %name, size = content.len(), "Read file for staging");
        Ok(Self { name, content })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Content in the transport encoding.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_encoding() {
        let file = StagedFile::from_bytes("po.edi", "ISA*00*");
        assert_eq!(file.name(), "po.edi");
        assert_eq!(file.size(), 7);
        assert_eq!(file.to_base64(), "SVNBKjAwKg==");
    }

    #[tokio::test]
    async fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.json");
        tokio::fs::write(&path, br#"{"po":"4500012"}"#).await.unwrap();

        let file = StagedFile::from_path(&path).await.unwrap();
        assert_eq!(file.name(), "order.json");
        assert_eq!(file.size(), 16);
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StagedFile::from_path(dir.path().join("absent.edi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::FileRead { .. }));
    }
}
