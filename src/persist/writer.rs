//! Background writer draining evicted sessions to disk.
//!
//! Evicted session records are queued on an unbounded channel and flushed to
//! JSON data files by a single writer task. One task owns the files, so no
//! write-path locking is needed.

use super::sink::RotatingFileSink;
use crate::error::{StorageError, StorageResult};
use crate::session::SessionRecord;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One queued unit of work: a user key and the session snapshot to persist.
pub type PersistItem = (String, SessionRecord);

/// Sending side of the persistence queue.
///
/// Cheap to clone; the refresher and the shutdown path both hold one.
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::UnboundedSender<PersistItem>,
}

impl std::fmt::Debug for PersistQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistQueue").finish_non_exhaustive()
    }
}

impl PersistQueue {
    /// Queue a session record for persistence. Records for one user are
    /// written in the order they were queued.
    pub fn enqueue(&self, user_id: impl Into<String>, record: SessionRecord) {
        let user_id = user_id.into();
        if self.tx.send((user_id.clone(), record)).is_err() {
            error!(user_id = %user_id, "persistence queue closed, record dropped");
        }
    }
}

/// Create a persistence queue pair.
#[must_use]
pub fn persist_queue() -> (PersistQueue, mpsc::UnboundedReceiver<PersistItem>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PersistQueue { tx }, rx)
}

/// Tunables for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Pause between writes while the queue has items.
    pub cadence: Duration,
    /// Pause after a failed write before retrying.
    pub error_backoff: Duration,
    /// Write attempts per record before it is dropped.
    pub max_retries: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(60),
            error_backoff: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

/// The background persistence writer.
pub struct PersistWriter {
    rx: mpsc::UnboundedReceiver<PersistItem>,
    sink: RotatingFileSink,
    config: WriterConfig,
}

impl std::fmt::Debug for PersistWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistWriter")
            .field("sink", &self.sink)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle to a running writer task.
pub struct WriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle").finish_non_exhaustive()
    }
}

impl WriterHandle {
    /// Stop the writer. Remaining queued records are written out before the
    /// task exits; cadence pauses are skipped during the drain.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "writer task panicked");
        }
    }
}

impl PersistWriter {
    /// Create a writer draining `rx` into `sink`.
    #[must_use]
    pub fn new(
        rx: mpsc::UnboundedReceiver<PersistItem>,
        sink: RotatingFileSink,
        config: WriterConfig,
    ) -> Self {
        Self { rx, sink, config }
    }

    /// Spawn the writer task.
    #[must_use]
    pub fn start(mut self) -> WriterHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            info!(dir = %self.sink.dir().display(), "persistence writer started");

            loop {
                tokio::select! {
                    item = self.rx.recv() => {
                        let Some(item) = item else {
                            debug!("persistence queue closed");
                            break;
                        };
                        self.process_with_retry(item).await;

                        // Pace the writes, but leave immediately on shutdown.
                        tokio::select! {
                            () = tokio::time::sleep(self.config.cadence) => {}
                            _ = shutdown_rx.recv() => {
                                self.drain().await;
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        self.drain().await;
                        break;
                    }
                }
            }

            info!("persistence writer stopped");
        });

        WriterHandle { shutdown_tx, task }
    }

    /// Write everything still queued, with no pauses between records.
    async fn drain(&mut self) {
        let mut drained = 0usize;
        while let Ok(item) = self.rx.try_recv() {
            self.process_with_retry(item).await;
            drained += 1;
        }
        if drained > 0 {
            info!(records = drained, "drained persistence queue on shutdown");
        }
    }

    async fn process_with_retry(&mut self, (user_id, record): PersistItem) {
        for attempt in 1..=self.config.max_retries {
            match self.write_record(&user_id, &record).await {
                Ok(path) => {
                    debug!(user_id = %user_id, file = %path.display(), "session record persisted");
                    return;
                }
                Err(e) => {
                    error!(
                        user_id = %user_id,
                        attempt,
                        max = self.config.max_retries,
                        error = %e,
                        "failed to persist session record"
                    );
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.config.error_backoff).await;
                    }
                }
            }
        }
        warn!(user_id = %user_id, "giving up on session record after retries");
    }

    async fn write_record(
        &mut self,
        user_id: &str,
        record: &SessionRecord,
    ) -> StorageResult<std::path::PathBuf> {
        let path = self.sink.current_path().await?;
        let mut data = load_data_file(&path).await?;

        data.entry(user_id.to_string()).or_default().push(record.clone());

        let json = serde_json::to_string_pretty(&data)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }
}

/// Contents of one data file: user key to the records appended for it.
type DataFile = BTreeMap<String, Vec<SessionRecord>>;

/// Load a data file, treating a missing file as empty.
///
/// A file that exists but fails to parse is moved aside so the history it
/// held is not overwritten, and the write proceeds against an empty map.
async fn load_data_file(path: &Path) -> StorageResult<DataFile> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DataFile::new()),
        Err(e) => return Err(StorageError::Io(e)),
    };

    match serde_json::from_str(&raw) {
        Ok(data) => Ok(data),
        Err(e) => {
            let quarantine = quarantine_path(path);
            warn!(
                file = %path.display(),
                moved_to = %quarantine.display(),
                error = %e,
                "data file is corrupt, quarantining"
            );
            tokio::fs::rename(path, &quarantine).await?;
            Ok(DataFile::new())
        }
    }
}

fn quarantine_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y-%m-%d_%H-%M-%S")));
    std::path::PathBuf::from(name)
}
