//! Transactional outbox publisher: a single-threaded polling loop that
//! moves `PENDING` rows into downstream queues exactly once, advancing
//! row status atomically with publication (spec §4.5).

use pipeline_core::error::Result;
use pipeline_core::model::{OutboxEventType, OutboxStatus};
use pipeline_queue::{Broker, QueueManager};
use pipeline_store::repositories::outbox;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const DEFAULT_BATCH_SIZE: i64 = 10;

/// Polls `outbox` rows in `PENDING` and republishes them, single-tick at
/// a time (the `in_flight` lock is the "no reentrancy" guard spec calls
/// for: a slow tick is skipped rather than overlapped).
pub struct OutboxPublisher<B: Broker> {
    pool: SqlitePool,
    queue_manager: Arc<QueueManager<B>>,
    batch_size: i64,
    poll_interval: Duration,
    in_flight: Mutex<()>,
}

impl<B: Broker + 'static> OutboxPublisher<B> {
    pub fn new(pool: SqlitePool, queue_manager: Arc<QueueManager<B>>) -> Self {
        Self {
            pool,
            queue_manager,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run one polling tick: select up to `batch_size` PENDING rows,
    /// route each by event type, enqueue, and flip status.
    pub async fn tick(&self) -> Result<usize> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("outbox tick already in flight, skipping this interval");
            return Ok(0);
        };

        let pending = outbox::list_pending(&self.pool, self.batch_size).await?;
        let mut published = 0;
        for event in pending {
            match self.publish_one(event.id, event.event_type, &event.payload).await {
                Ok(()) => {
                    outbox::set_status(&self.pool, event.id, OutboxStatus::Published).await?;
                    published += 1;
                }
                Err(e) => {
                    warn!(outbox_id = event.id, error = %e, "failed to publish outbox row, marking FAILED");
                    outbox::set_status(&self.pool, event.id, OutboxStatus::Failed).await?;
                }
            }
        }
        Ok(published)
    }

    async fn publish_one(&self, outbox_id: i64, event_type: OutboxEventType, payload: &str) -> Result<()> {
        let Some(queue) = event_type.target_queue() else {
            // Consumed by a trigger other than a queue poll (directory/global
            // findings ride the parent/child barrier instead).
            debug!(outbox_id, "event type has no target queue, nothing to publish");
            return Ok(());
        };
        self.queue_manager.enqueue(queue, payload.to_string()).await?;
        Ok(())
    }

    /// Sweep `FAILED` rows back to `PENDING` so the next tick retries them.
    pub async fn sweep_failed(&self) -> Result<u64> {
        outbox::sweep_failed(&self.pool).await
    }

    /// Run the polling loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => return,
            }
            if let Err(e) = self.tick().await {
                error!(error = %e, "outbox publisher tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_queue::{InMemoryBroker, RetryPolicy};
    use pipeline_store::connection::DatabaseConnection;

    async fn setup() -> (DatabaseConnection, Arc<QueueManager<InMemoryBroker>>) {
        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        let broker = Arc::new(InMemoryBroker::new());
        let manager = Arc::new(QueueManager::new(broker.clone(), RetryPolicy::default()));
        (conn, manager)
    }

    #[tokio::test]
    async fn routable_event_is_published_and_enqueued() {
        let (conn, manager) = setup().await;
        outbox::insert(conn.pool(), OutboxEventType::FileAnalysisFinding, r#"{"relationship_ids":["r1"]}"#)
            .await
            .unwrap();

        let publisher = OutboxPublisher::new(conn.pool().clone(), manager.clone());
        let published = publisher.tick().await.unwrap();
        assert_eq!(published, 1);
        assert!(outbox::list_pending(conn.pool(), 10).await.unwrap().is_empty());

        let claimed = manager
            .broker()
            .claim_next("relationship-resolution-queue", 1000)
            .await
            .unwrap();
        assert!(claimed.is_some());
    }

    #[tokio::test]
    async fn unroutable_event_type_is_marked_published_without_enqueue() {
        let (conn, manager) = setup().await;
        outbox::insert(conn.pool(), OutboxEventType::DirectoryAnalysisFinding, "{}").await.unwrap();

        let publisher = OutboxPublisher::new(conn.pool().clone(), manager.clone());
        publisher.tick().await.unwrap();
        assert!(outbox::list_pending(conn.pool(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_resets_failed_rows() {
        let (conn, manager) = setup().await;
        let id = outbox::insert(conn.pool(), OutboxEventType::FileAnalysisFinding, "{}").await.unwrap();
        outbox::set_status(conn.pool(), id, OutboxStatus::Failed).await.unwrap();

        let publisher = OutboxPublisher::new(conn.pool().clone(), manager.clone());
        let swept = publisher.sweep_failed().await.unwrap();
        assert_eq!(swept, 1);
    }
}
