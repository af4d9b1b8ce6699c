//! Size-rotated JSON data files.

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Picks which data file the writer appends to and rotates it by size.
///
/// Rotation is checked before each write: once the current file exceeds the
/// size limit, subsequent records go to a fresh timestamped file. The old
/// file is left in place and never touched again.
pub struct RotatingFileSink {
    dir: PathBuf,
    max_bytes: u64,
    current: Option<PathBuf>,
}

impl std::fmt::Debug for RotatingFileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingFileSink")
            .field("dir", &self.dir)
            .field("max_bytes", &self.max_bytes)
            .field("current", &self.current)
            .finish()
    }
}

impl RotatingFileSink {
    /// Create a sink writing under `dir` with the given size limit.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
            current: None,
        }
    }

    /// Directory the data files live in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve the path the next write should target, rotating if the
    /// current file has grown past the size limit.
    pub async fn current_path(&mut self) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        if let Some(path) = &self.current {
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.len() > self.max_bytes => {
                    let next = self.fresh_path();
                    info!(
                        from = %path.display(),
                        to = %next.display(),
                        size = meta.len(),
                        "rotating data file"
                    );
                    self.current = Some(next);
                }
                // Missing file: the path is still valid, the next write
                // recreates it.
                Ok(_) | Err(_) => {}
            }
        } else {
            self.current = Some(self.fresh_path());
        }

        // `current` is always set by this point.
        self.current
            .clone()
            .ok_or_else(|| io::Error::other("no current data file"))
    }

    fn fresh_path(&self) -> PathBuf {
        self.dir.join(crate::util::data_file_name(&Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_path_is_stable_below_limit() {
        let dir = TempDir::new().unwrap();
        let mut sink = RotatingFileSink::new(dir.path(), 1024);

        let first = sink.current_path().await.unwrap();
        tokio::fs::write(&first, b"small").await.unwrap();
        let second = sink.current_path().await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_rotates_past_limit() {
        let dir = TempDir::new().unwrap();
        let mut sink = RotatingFileSink::new(dir.path(), 16);

        let first = sink.current_path().await.unwrap();
        tokio::fs::write(&first, vec![b'x'; 64]).await.unwrap();

        // Rotation only kicks in once the file exceeds the limit, so the
        // next resolution must pick a new name.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let second = sink.current_path().await.unwrap();

        assert_ne!(first, second);
        // The full file stays behind untouched.
        let old = tokio::fs::read(&first).await.unwrap();
        assert_eq!(old.len(), 64);
    }

    #[tokio::test]
    async fn test_missing_file_keeps_path() {
        let dir = TempDir::new().unwrap();
        let mut sink = RotatingFileSink::new(dir.path(), 1024);

        let first = sink.current_path().await.unwrap();
        // Never written; the path should stay the same.
        let second = sink.current_path().await.unwrap();
        assert_eq!(first, second);
    }
}
