//! On-disk storage for rendered results, one PNG per request.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResultStoreError {
    /// Ids are generated server side; anything else is refused as a file name.
    #[error("invalid request id {0:?}")]
    InvalidId(String),

    #[error("write result {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remove result {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> Result<PathBuf, ResultStoreError> {
        let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(ResultStoreError::InvalidId(id.to_owned()));
        }
        Ok(self.dir.join(format!("{id}.png")))
    }

    /// Write `png` for `id`, replacing any earlier file.
    pub async fn write(&self, id: &str, png: &[u8]) -> Result<PathBuf, ResultStoreError> {
        let path = self.path_for(id)?;
        let wrap = |source| ResultStoreError::Write {
            path: path.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(wrap)?;
        tokio::fs::write(&path, png).await.map_err(wrap)?;
        debug!(path = %path.display(), bytes = png.len(), "result written");
        Ok(path)
    }

    /// Delete the result for `id`, if one was ever written.
    pub async fn remove(&self, id: &str) -> Result<(), ResultStoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "result removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ResultStoreError::Remove { path, source }),
        }
    }
}
