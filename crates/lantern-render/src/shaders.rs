//! Compiled shader blobs loaded from disk.

use crate::error::{RenderError, Result};
use std::path::{Path, PathBuf};

/// SPIR-V bytecode read from a file.
///
/// The bytes are handed to the pipeline builder as-is; validation happens
/// when the module is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBlob {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl ShaderBlob {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = std::fs::read(&path).map_err(|source| RenderError::Shader {
            path: path.clone(),
            source,
        })?;
        tracing::debug!("Loaded shader {} ({} bytes)", path.display(), bytes.len());
        Ok(Self { path, bytes })
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reports_path() {
        let err = ShaderBlob::from_path("does/not/exist.spv").unwrap_err();
        match err {
            RenderError::Shader { path, source } => {
                assert_eq!(path, PathBuf::from("does/not/exist.spv"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reads_file_contents() {
        let path = std::env::temp_dir().join(format!("lantern-shader-{}.spv", std::process::id()));
        std::fs::write(&path, [0x03, 0x02, 0x23, 0x07]).unwrap();

        let blob = ShaderBlob::from_path(&path).unwrap();
        assert_eq!(blob.bytes(), &[0x03, 0x02, 0x23, 0x07]);
        assert_eq!(blob.path(), path.as_path());

        std::fs::remove_file(&path).unwrap();
    }
}
