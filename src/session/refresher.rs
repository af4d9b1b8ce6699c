//! Periodic session maintenance.
//!
//! A background task scans the store on a fixed tick and evicts sessions
//! that went idle or grew past the message limit, handing their snapshots
//! to the persistence queue.

use super::store::SessionStore;
use crate::persist::PersistQueue;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Why a session was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// No inbound message within the idle timeout.
    Timeout,
    /// The dialog grew past the message limit.
    Overflow,
}

impl std::fmt::Display for EvictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Overflow => write!(f, "overflow"),
        }
    }
}

/// Tunables for the refresher task.
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// Interval between scans.
    pub tick: Duration,
    /// Idle time after which a session is evicted.
    pub session_timeout: Duration,
    /// Message count above which a session is evicted.
    pub max_messages: usize,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(30),
            session_timeout: Duration::from_secs(15 * 60),
            max_messages: 30,
        }
    }
}

/// Background task evicting stale and oversized sessions.
pub struct DialogRefresher {
    store: Arc<SessionStore>,
    queue: PersistQueue,
    config: RefresherConfig,
}

impl std::fmt::Debug for DialogRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogRefresher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle to a running refresher task.
pub struct RefresherHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for RefresherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefresherHandle").finish_non_exhaustive()
    }
}

impl RefresherHandle {
    /// Stop the refresher. Every remaining session is flushed to the
    /// persistence queue before the task exits.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "refresher task panicked");
        }
    }
}

impl DialogRefresher {
    /// Create a refresher over `store`, handing evicted records to `queue`.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, queue: PersistQueue, config: RefresherConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Spawn the refresher task.
    #[must_use]
    pub fn start(self) -> RefresherHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            info!(
                tick = ?self.config.tick,
                timeout = ?self.config.session_timeout,
                max_messages = self.config.max_messages,
                "dialog refresher started"
            );

            loop {
                tokio::select! {
                    () = tokio::time::sleep(self.config.tick) => {
                        self.run_tick().await;
                    }
                    _ = shutdown_rx.recv() => {
                        self.flush_all().await;
                        break;
                    }
                }
            }

            info!("dialog refresher stopped");
        });

        RefresherHandle { shutdown_tx, task }
    }

    /// One maintenance scan over all live sessions.
    async fn run_tick(&self) {
        let now = Utc::now();
        let timeout = match ChronoDuration::from_std(self.config.session_timeout) {
            Ok(d) => d,
            Err(_) => ChronoDuration::MAX,
        };

        for summary in self.store.snapshot().await {
            let reason = if now - summary.last_message_at >= timeout {
                EvictReason::Timeout
            } else if summary.message_count > self.config.max_messages {
                EvictReason::Overflow
            } else {
                continue;
            };

            // The session may have been touched or removed since the scan;
            // eviction re-reads its state and a missing session is skipped.
            if let Some(record) = self.store.evict(&summary.user_id).await {
                info!(
                    user_id = %summary.user_id,
                    reason = %reason,
                    messages = record.messages.len(),
                    "session evicted"
                );
                self.queue.enqueue(summary.user_id, record);
            } else {
                debug!(user_id = %summary.user_id, "session vanished before eviction");
            }
        }
    }

    /// Evict everything regardless of age or size. Shutdown path.
    async fn flush_all(&self) {
        let records = self.store.drain().await;
        let count = records.len();
        for (user_id, record) in records {
            self.queue.enqueue(user_id, record);
        }
        if count > 0 {
            info!(sessions = count, "flushed all sessions on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::EchoClient;
    use crate::persist::persist_queue;
    use crate::session::Role;

    fn store() -> Arc<SessionStore> {
        Arc::new(SessionStore::new(Arc::new(EchoClient::new()), "echo-model"))
    }

    #[tokio::test]
    async fn test_idle_session_evicted() {
        let store = store();
        let (queue, mut rx) = persist_queue();

        let (session, _) = store.get_or_create("cli:idle").await.unwrap();
        store
            .append_message("cli:idle", Role::User, "hi")
            .await
            .unwrap();
        session
            .lock()
            .await
            .set_last_message_at(Utc::now() - ChronoDuration::minutes(20));

        let refresher = DialogRefresher::new(
            Arc::clone(&store),
            queue,
            RefresherConfig {
                tick: Duration::from_millis(20),
                session_timeout: Duration::from_secs(15 * 60),
                max_messages: 30,
            },
        );
        let handle = refresher.start();

        let (user_id, record) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        handle.stop().await;

        assert_eq!(user_id, "cli:idle");
        assert_eq!(record.messages.len(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_session_evicted() {
        let store = store();
        let (queue, mut rx) = persist_queue();

        store.get_or_create("cli:chatty").await.unwrap();
        for i in 0..6 {
            store
                .append_message("cli:chatty", Role::User, format!("msg {i}"))
                .await
                .unwrap();
        }

        let refresher = DialogRefresher::new(
            Arc::clone(&store),
            queue,
            RefresherConfig {
                tick: Duration::from_millis(20),
                session_timeout: Duration::from_secs(15 * 60),
                max_messages: 5,
            },
        );
        let handle = refresher.start();

        let (user_id, record) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        handle.stop().await;

        assert_eq!(user_id, "cli:chatty");
        assert_eq!(record.messages.len(), 6);
    }

    #[tokio::test]
    async fn test_active_session_survives_tick() {
        let store = store();
        let (queue, mut rx) = persist_queue();

        store.get_or_create("cli:fresh").await.unwrap();
        store
            .append_message("cli:fresh", Role::User, "hi")
            .await
            .unwrap();

        let refresher = DialogRefresher::new(
            Arc::clone(&store),
            queue,
            RefresherConfig {
                tick: Duration::from_millis(10),
                session_timeout: Duration::from_secs(15 * 60),
                max_messages: 30,
            },
        );
        let handle = refresher.start();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.len().await, 1);
        handle.stop().await;

        // Only the shutdown flush produced a record.
        let (user_id, _) = rx.recv().await.unwrap();
        assert_eq!(user_id, "cli:fresh");
        assert!(rx.recv().await.is_none() || store.is_empty().await);
    }

    #[tokio::test]
    async fn test_stop_flushes_everything() {
        let store = store();
        let (queue, mut rx) = persist_queue();

        store.get_or_create("cli:a").await.unwrap();
        store.get_or_create("cli:b").await.unwrap();

        let refresher = DialogRefresher::new(
            Arc::clone(&store),
            queue,
            RefresherConfig {
                tick: Duration::from_secs(3600),
                ..RefresherConfig::default()
            },
        );
        let handle = refresher.start();
        handle.stop().await;

        let mut flushed = Vec::new();
        while let Ok(item) = rx.try_recv() {
            flushed.push(item.0);
        }
        flushed.sort();
        assert_eq!(flushed, vec!["cli:a", "cli:b"]);
        assert!(store.is_empty().await);
    }
}
