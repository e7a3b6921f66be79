use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::db::Connector;
use crate::ops::{self, ExecSettings, FailureKind, OperationKind, Outcome};
use crate::pool::ConnectionPool;

/// Runs single operations: acquire, execute, release.
pub struct Worker<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    exec: ExecSettings,
    acquire_timeout: Duration,
}

impl<C: Connector> Worker<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>, exec: ExecSettings, acquire_timeout: Duration) -> Self {
        Self {
            pool,
            exec,
            acquire_timeout,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }

    pub async fn run(&self, kind: OperationKind) -> Outcome {
        let Some(mut lease) = self.pool.acquire(self.acquire_timeout).await else {
            return Outcome::connection_failed(kind);
        };
        debug!(
            "Running {} on {} connection",
            kind,
            if lease.from_pool() { "a pooled" } else { "an ad-hoc" }
        );

        let result = AssertUnwindSafe(ops::execute(kind, lease.connection(), &self.exec))
            .catch_unwind()
            .await;

        match result {
            Ok(outcome) => {
                self.pool.release(lease).await;
                outcome
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("{} operation panicked: {}", kind, reason);
                // the session may be mid-transaction, so it never goes back to the pool
                self.pool.discard(lease).await;
                Outcome::failed(
                    Some(kind),
                    FailureKind::Panicked,
                    format!("{} failed: operation panicked: {}", kind, reason),
                )
            }
        }
    }

    /// Like `run`, for operation names that have not been validated yet. An
    /// unknown name yields an "invalid operation" outcome instead of an error.
    /// The CLI validates names up front and calls `run` directly.
    #[allow(dead_code)]
    pub async fn run_labeled(&self, label: &str) -> Outcome {
        match OperationKind::from_label(label) {
            Some(kind) => self.run(kind).await,
            None => {
                debug!("Rejecting unknown operation {:?}", label);
                Outcome::invalid_operation(label)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::MemoryDatabase;

    fn worker(db: &MemoryDatabase) -> Worker<MemoryDatabase> {
        Worker::new(
            Arc::new(ConnectionPool::new(db.clone())),
            ExecSettings::default(),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn pooled_run_returns_connection() {
        let db = MemoryDatabase::new();
        let worker = worker(&db);
        worker.pool().initialize(2).await;

        let outcome = worker.run(OperationKind::Insert).await;

        assert!(outcome.is_success());
        assert_eq!(worker.pool().occupancy().await, (2, 0));
        assert_eq!(db.opened(), 2);
    }

    #[tokio::test]
    async fn ad_hoc_run_closes_connection() {
        let db = MemoryDatabase::new();
        let worker = worker(&db);

        let outcome = worker.run(OperationKind::Insert).await;

        assert!(outcome.is_success());
        assert_eq!(db.opened(), 1);
        assert_eq!(db.live(), 0);
    }

    #[tokio::test]
    async fn unreachable_database_is_connection_failure() {
        let db = MemoryDatabase::new();
        db.refuse_connections();
        let worker = worker(&db);

        let outcome = worker.run(OperationKind::Delete).await;

        assert_eq!(outcome.failure, Some(FailureKind::Connection));
        assert_eq!(outcome.kind, Some(OperationKind::Delete));
        assert!(outcome.message.contains("could not connect"));
    }

    #[tokio::test]
    async fn unknown_label_is_invalid_operation() {
        let db = MemoryDatabase::new();
        let worker = worker(&db);

        let outcome = worker.run_labeled("merge").await;

        assert_eq!(outcome.failure, Some(FailureKind::InvalidOperation));
        assert_eq!(outcome.kind, None);
        assert_eq!(db.opened(), 0);

        assert!(worker.run_labeled("Insert").await.is_success());
    }

    #[tokio::test]
    async fn panicking_executor_still_frees_connection() {
        let db = MemoryDatabase::new();
        let worker = worker(&db);
        worker.pool().initialize(1).await;
        db.panic_on_execute();

        let outcome = worker.run(OperationKind::Insert).await;

        assert_eq!(outcome.failure, Some(FailureKind::Panicked));
        assert!(outcome.message.contains("driver exploded"));
        assert_eq!(worker.pool().occupancy().await, (0, 0));
        assert_eq!(db.live(), 0);
    }
}
