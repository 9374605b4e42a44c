//! Durable update queue.
//!
//! Task/activity/log updates the worker wants to report to the Manager are
//! enqueued here before the Upstream Client ever sees them, so a Manager
//! outage or a worker restart never loses an update. Backed by SQLite in
//! WAL mode, the same way the teacher's local metrics store is, but with a
//! simpler consumer contract: entries are delivered strictly oldest-first,
//! one at a time, and a failed delivery retries the same entry indefinitely
//! on `Transport`/`Http5xx` (sleeping and retrying) or drops it with a log
//! line on `Http4xx`. There is no permanent-failure state.

use crate::client::ClientError;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: i64,
    pub task_id: String,
    pub path: String,
    pub payload: String,
    pub created_at: i64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueueStats {
    pub pending: i64,
    pub sent: i64,
}

pub struct UpdateQueue {
    conn: Connection,
    sent_retention_hours: i64,
}

impl UpdateQueue {
    pub fn open(db_path: &Path, busy_timeout_seconds: u64, sent_retention_hours: i64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create queue directory: {}", parent.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open update queue database: {}", db_path.display()))?;

        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .context("failed to enable WAL mode")?;
        conn.query_row("PRAGMA wal_autocheckpoint=1000", [], |_| Ok(()))
            .context("failed to set WAL auto-checkpoint")?;
        conn.busy_timeout(std::time::Duration::from_secs(busy_timeout_seconds))
            .context("failed to set busy timeout")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS update_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                path TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                sent_at INTEGER
            )
            "#,
            [],
        )
        .context("failed to create update_queue table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_update_queue_pending ON update_queue(sent_at, created_at)",
            [],
        )?;

        info!("update queue opened at {}", db_path.display());
        Ok(Self { conn, sent_retention_hours })
    }

    /// Append an update to the tail of the queue.
    pub fn enqueue(&self, task_id: &str, path: &str, payload: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO update_queue (task_id, path, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![task_id, path, payload, current_timestamp()],
        )?;
        Ok(())
    }

    /// Number of updates not yet delivered. Drives the back-pressure
    /// threshold that defers task fetching while the queue is backed up.
    pub fn queue_size(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM update_queue WHERE sent_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn oldest_pending(&self) -> Result<Option<QueueEntry>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, task_id, path, payload, created_at FROM update_queue
                 WHERE sent_at IS NULL ORDER BY created_at ASC, id ASC LIMIT 1",
                [],
                |row| {
                    Ok(QueueEntry {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        path: row.get(2)?,
                        payload: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    fn mark_sent(&self, id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE update_queue SET sent_at = ?1 WHERE id = ?2", params![current_timestamp(), id])?;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM update_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Drain the queue one entry at a time, oldest first, delivering each
    /// through `deliver`. `Transport`/`Http5xx` failures sleep for
    /// `retry_delay` and retry the same entry; `Http4xx` logs the error and
    /// drops the entry. Returns once the queue is empty or `deadline` has
    /// elapsed (used for the bounded flush on graceful shutdown).
    pub async fn flush_and_report<F, Fut>(
        &self,
        retry_delay: std::time::Duration,
        deadline: Option<std::time::Instant>,
        mut deliver: F,
    ) -> Result<()>
    where
        F: FnMut(QueueEntry) -> Fut,
        Fut: std::future::Future<Output = Result<(), ClientError>>,
    {
        loop {
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    return Ok(());
                }
            }

            let Some(entry) = self.oldest_pending()? else {
                return Ok(());
            };

            match deliver(entry.clone()).await {
                Ok(()) => {
                    self.mark_sent(entry.id)?;
                }
                Err(e) if e.is_retryable() => {
                    warn!("update {} ({}) failed, retrying: {}", entry.id, entry.path, e);
                    if let Some(deadline) = deadline {
                        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                        tokio::time::sleep(retry_delay.min(remaining)).await;
                    } else {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
                Err(e) => {
                    warn!("update {} ({}) rejected by manager, dropping: {}", entry.id, entry.path, e);
                    self.delete(entry.id)?;
                }
            }
        }
    }

    /// Delete delivered entries older than the configured retention window.
    /// Pure local housekeeping; has no bearing on delivery semantics.
    pub fn cleanup_sent_entries(&self) -> Result<usize> {
        let cutoff = current_timestamp() - self.sent_retention_hours * 3600;
        let count = self
            .conn
            .execute("DELETE FROM update_queue WHERE sent_at IS NOT NULL AND sent_at < ?1", params![cutoff])?;
        if count > 0 {
            debug!("cleaned up {} delivered queue entries", count);
        }
        Ok(count)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let pending: i64 = self.conn.query_row("SELECT COUNT(*) FROM update_queue WHERE sent_at IS NULL", [], |r| r.get(0))?;
        let sent: i64 = self.conn.query_row("SELECT COUNT(*) FROM update_queue WHERE sent_at IS NOT NULL", [], |r| r.get(0))?;
        Ok(QueueStats { pending, sent })
    }

    pub fn checkpoint_wal(&self) -> Result<()> {
        self.conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }
}

fn current_timestamp() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open_test_queue() -> (tempfile::TempDir, UpdateQueue) {
        let dir = tempfile::tempdir().unwrap();
        let queue = UpdateQueue::open(&dir.path().join("queue.db"), 5, 24).unwrap();
        (dir, queue)
    }

    #[test]
    fn enqueue_increments_pending_count() {
        let (_dir, queue) = open_test_queue();
        queue.enqueue("T1", "/tasks/T1/update", "{}").unwrap();
        queue.enqueue("T1", "/tasks/T1/update", "{}").unwrap();
        assert_eq!(queue.queue_size().unwrap(), 2);
    }

    #[tokio::test]
    async fn flush_delivers_oldest_first_and_marks_sent() {
        let (_dir, queue) = open_test_queue();
        queue.enqueue("T1", "/a", "1").unwrap();
        queue.enqueue("T1", "/b", "2").unwrap();

        let mut delivered = Vec::new();
        queue
            .flush_and_report(std::time::Duration::from_millis(1), None, |entry| {
                delivered.push(entry.payload.clone());
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(delivered, vec!["1", "2"]);
        assert_eq!(queue.queue_size().unwrap(), 0);
    }

    #[tokio::test]
    async fn flush_retries_on_transport_error_then_succeeds() {
        let (_dir, queue) = open_test_queue();
        queue.enqueue("T1", "/a", "retry-me").unwrap();

        let attempts = AtomicUsize::new(0);
        queue
            .flush_and_report(std::time::Duration::from_millis(1), None, |_entry| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        return Err(ClientError::Http5xx { status: 503, body: "unavailable".into() });
                    }
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(queue.queue_size().unwrap(), 0);
    }

    #[tokio::test]
    async fn flush_drops_entry_on_4xx() {
        let (_dir, queue) = open_test_queue();
        queue.enqueue("T1", "/a", "reject-me").unwrap();

        queue
            .flush_and_report(std::time::Duration::from_millis(1), None, |_entry| async {
                Err(ClientError::Http4xx { status: 400, body: "rejected".into() })
            })
            .await
            .unwrap();

        assert_eq!(queue.queue_size().unwrap(), 0);
    }
}
