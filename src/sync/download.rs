//! Path checks for serving export output

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Resolves export output paths against an optional allow-listed directory
#[derive(Debug, Clone, Default)]
pub struct DownloadGate {
    base_dir: Option<PathBuf>,
}

impl DownloadGate {
    #[must_use]
    pub const fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }

    #[must_use]
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Resolve a result's output path to a servable file
    ///
    /// # Errors
    ///
    /// Returns `UnprocessableEntity` if there is no output path or it is not a
    /// regular file, and `Forbidden` if the path cannot be resolved or
    /// escapes the base directory
    pub fn resolve(&self, output_path: Option<&str>) -> Result<PathBuf> {
        let raw = output_path
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::UnprocessableEntity("result has no output file".to_string()))?;

        let path = match &self.base_dir {
            Some(base) => Self::contain(base, Path::new(raw))?,
            None => PathBuf::from(raw),
        };

        let meta = std::fs::metadata(&path)
            .map_err(|_| Error::UnprocessableEntity("output file is no longer available".to_string()))?;
        if !meta.is_file() {
            return Err(Error::UnprocessableEntity(
                "output is not a single file".to_string(),
            ));
        }

        Ok(path)
    }

    fn contain(base: &Path, path: &Path) -> Result<PathBuf> {
        let base = base
            .canonicalize()
            .map_err(|_| Error::Forbidden("download directory cannot be resolved".to_string()))?;
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        };
        let resolved = joined
            .canonicalize()
            .map_err(|_| Error::Forbidden("output path cannot be resolved".to_string()))?;

        if resolved.strip_prefix(&base).is_err() {
            tracing::warn!(path = %path.display(), "download outside base directory refused");
            return Err(Error::Forbidden(
                "output path is outside the download directory".to_string(),
            ));
        }

        Ok(resolved)
    }
}
