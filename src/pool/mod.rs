use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time;
use tracing::{debug, info, warn};

use crate::db::{Connection, Connector};

// upper bound on concurrent connects while filling the pool
const OPEN_PARALLELISM: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Pooled { generation: u64 },
    AdHoc,
}

/// A connection checked out for a single operation.
pub struct Lease<T> {
    conn: T,
    origin: Origin,
}

impl<T> Lease<T> {
    pub fn from_pool(&self) -> bool {
        matches!(self.origin, Origin::Pooled { .. })
    }

    pub fn connection(&mut self) -> &mut T {
        &mut self.conn
    }
}

// both counts live under one lock so idle + checked_out is always read consistently
struct Idle<T> {
    conns: VecDeque<T>,
    checked_out: usize,
}

/// Connections of one pool generation. `available` carries one permit per
/// idle connection, so waiting on it is the blocking "get".
struct Slots<T> {
    generation: u64,
    capacity: usize,
    size: usize,
    idle: Mutex<Idle<T>>,
    available: Semaphore,
}

#[derive(Debug, Default)]
pub struct PoolStats {
    opened: AtomicU64,
    closed: AtomicU64,
    ad_hoc: AtomicU64,
    acquire_timeouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatsSnapshot {
    pub opened: u64,
    pub closed: u64,
    pub ad_hoc: u64,
    pub acquire_timeouts: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            ad_hoc: self.ad_hoc.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
        }
    }
}

pub struct ConnectionPool<C: Connector> {
    connector: Arc<C>,
    slots: Mutex<Option<Arc<Slots<C::Conn>>>>,
    generation: AtomicU64,
    stats: PoolStats,
}

impl<C: Connector> ConnectionPool<C> {
    /// Creates a disabled pool. Until `initialize` succeeds every acquire opens
    /// an ad-hoc connection.
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            slots: Mutex::new(None),
            generation: AtomicU64::new(0),
            stats: PoolStats::default(),
        }
    }

    pub async fn initialize(&self, capacity: usize) {
        let mut current = self.slots.lock().await;

        if let Some(slots) = current.as_ref() {
            if slots.capacity == capacity {
                info!(
                    "Reusing existing connection pool (capacity {}, {} connections)",
                    capacity, slots.size
                );
                return;
            }
        }

        if let Some(old) = current.take() {
            info!(
                "Rebuilding connection pool: capacity {} -> {}",
                old.capacity, capacity
            );
            self.close_idle(&old).await;
        }

        if capacity == 0 {
            info!("Connection pooling disabled");
            return;
        }

        let connector = self.connector.clone();
        let results: Vec<_> = stream::iter(0..capacity)
            .map(|_| {
                let connector = connector.clone();
                async move { connector.connect().await }
            })
            .buffer_unordered(OPEN_PARALLELISM)
            .collect()
            .await;

        let mut idle = VecDeque::with_capacity(capacity);
        for result in results {
            match result {
                Ok(conn) => {
                    self.stats.opened.fetch_add(1, Ordering::Relaxed);
                    idle.push_back(conn);
                }
                Err(e) => warn!("Failed to open pooled connection: {}", e),
            }
        }

        if idle.is_empty() {
            warn!("Could not open any pooled connection, falling back to ad-hoc connections");
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let size = idle.len();
        info!(
            "Connection pool initialized: target={}, opened={}",
            capacity, size
        );

        *current = Some(Arc::new(Slots {
            generation,
            capacity,
            size,
            idle: Mutex::new(Idle {
                conns: idle,
                checked_out: 0,
            }),
            available: Semaphore::new(size),
        }));
    }

    /// Checks out a pooled connection, waiting up to `timeout`. Falls back to an
    /// ad-hoc connection when the pool is disabled or exhausted; `None` means
    /// even that connect failed.
    pub async fn acquire(&self, timeout: Duration) -> Option<Lease<C::Conn>> {
        if let Some(slots) = self.current().await {
            match time::timeout(timeout, slots.available.acquire()).await {
                Ok(Ok(permit)) => {
                    permit.forget();
                    let mut idle = slots.idle.lock().await;
                    if let Some(conn) = idle.conns.pop_front() {
                        idle.checked_out += 1;
                        return Some(Lease {
                            conn,
                            origin: Origin::Pooled {
                                generation: slots.generation,
                            },
                        });
                    }
                    warn!("Pool permit granted without an idle connection");
                }
                Ok(Err(_)) => debug!("Pool shut down while waiting for a connection"),
                Err(_) => {
                    self.stats.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "No pooled connection within {:?}, opening an ad-hoc one",
                        timeout
                    );
                }
            }
        }

        self.open_ad_hoc().await
    }

    /// Returns a pooled connection to the pool it came from. Ad-hoc connections,
    /// and pooled ones whose pool has since been shut down or rebuilt, are closed.
    pub async fn release(&self, lease: Lease<C::Conn>) {
        let Origin::Pooled { generation } = lease.origin else {
            self.close(lease.conn).await;
            return;
        };

        match self.current().await {
            Some(slots) if slots.generation == generation => {
                self.return_to(&slots, lease.conn).await;
            }
            _ => {
                debug!("Connection outlived its pool, closing it");
                self.close(lease.conn).await;
            }
        }
    }

    // Shutdown may close `slots` between the generation check and the idle lock.
    // A closed semaphore means the idle queue has been drained for good.
    async fn return_to(&self, slots: &Slots<C::Conn>, conn: C::Conn) {
        let mut idle = slots.idle.lock().await;
        idle.checked_out -= 1;
        if slots.available.is_closed() {
            drop(idle);
            debug!("Pool shut down while connection was out, closing it");
            self.close(conn).await;
        } else if idle.conns.len() < slots.size {
            idle.conns.push_back(conn);
            slots.available.add_permits(1);
        } else {
            drop(idle);
            debug!("Pool full, closing returned connection");
            self.close(conn).await;
        }
    }

    /// Closes a leased connection instead of returning it, for sessions left in
    /// an unknown state. The pool keeps one fewer connection afterwards.
    pub async fn discard(&self, lease: Lease<C::Conn>) {
        if let Origin::Pooled { generation } = lease.origin {
            if let Some(slots) = self.current().await {
                if slots.generation == generation {
                    slots.idle.lock().await.checked_out -= 1;
                }
            }
        }
        self.close(lease.conn).await;
    }

    /// Closes every idle pooled connection and disables the pool. Safe to call
    /// repeatedly or on a pool that was never initialized.
    pub async fn shutdown(&self) {
        let Some(slots) = self.slots.lock().await.take() else {
            debug!("Connection pool already empty");
            return;
        };
        let closed = self.close_idle(&slots).await;
        info!("Connection pool shut down, closed {} connections", closed);
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn is_enabled(&self) -> bool {
        self.current().await.is_some()
    }

    /// Returns `(idle, checked_out)` for the live pool generation.
    pub async fn occupancy(&self) -> (usize, usize) {
        match self.current().await {
            Some(slots) => {
                let idle = slots.idle.lock().await;
                (idle.conns.len(), idle.checked_out)
            }
            None => (0, 0),
        }
    }

    async fn current(&self) -> Option<Arc<Slots<C::Conn>>> {
        self.slots.lock().await.clone()
    }

    async fn open_ad_hoc(&self) -> Option<Lease<C::Conn>> {
        match self.connector.connect().await {
            Ok(conn) => {
                self.stats.opened.fetch_add(1, Ordering::Relaxed);
                self.stats.ad_hoc.fetch_add(1, Ordering::Relaxed);
                Some(Lease {
                    conn,
                    origin: Origin::AdHoc,
                })
            }
            Err(e) => {
                warn!("Failed to open connection: {}", e);
                None
            }
        }
    }

    async fn close_idle(&self, slots: &Slots<C::Conn>) -> usize {
        slots.available.close();
        let drained: Vec<_> = slots.idle.lock().await.conns.drain(..).collect();
        let count = drained.len();
        for conn in drained {
            self.close(conn).await;
        }
        count
    }

    async fn close(&self, conn: C::Conn) {
        self.stats.closed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = conn.close().await {
            debug!("Error while closing connection: {}", e);
        }
    }
}
