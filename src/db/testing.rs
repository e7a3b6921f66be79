//! In-memory stand-in for a MySQL server, used by unit tests across the crate.
//!
//! It understands exactly the statements the executors issue (dispatching on the
//! leading keyword) and records enough bookkeeping to assert on connection
//! lifecycles and concurrency.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Connection, Connector, DbError, LogEntry, Param, Statement};

#[derive(Default)]
struct Inner {
    rows: Mutex<Vec<LogEntry>>,
    next_id: AtomicI64,
    connect_budget: Mutex<Option<usize>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    fail_statements: AtomicBool,
    panic_on_execute: AtomicBool,
    statement_delay: Mutex<Duration>,
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one `insert`-typed row per user id.
    pub fn with_rows(user_ids: impl IntoIterator<Item = i64>) -> Self {
        let db = Self::new();
        {
            let mut rows = db.inner.rows.lock().unwrap();
            for user_id in user_ids {
                let id = db.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                rows.push(LogEntry {
                    id,
                    user_id,
                    operation_type: "insert".to_string(),
                    content: format!("seed {}", id),
                });
            }
        }
        db
    }

    pub fn refuse_connections(&self) {
        self.allow_connections(0);
    }

    /// Lets the next `n` connects succeed, then refuses.
    pub fn allow_connections(&self, n: usize) {
        *self.inner.connect_budget.lock().unwrap() = Some(n);
    }

    pub fn accept_connections(&self) {
        *self.inner.connect_budget.lock().unwrap() = None;
    }

    pub fn fail_statements(&self) {
        self.inner.fail_statements.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_execute(&self) {
        self.inner.panic_on_execute.store(true, Ordering::SeqCst);
    }

    pub fn hold_statements(&self, delay: Duration) {
        *self.inner.statement_delay.lock().unwrap() = delay;
    }

    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.opened() - self.closed()
    }

    pub fn commits(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<LogEntry> {
        self.inner.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MemoryDatabase {
    type Conn = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, DbError> {
        {
            let mut budget = self.inner.connect_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => {
                    return Err(DbError::Connect(sqlx::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ))));
                }
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            inner: self.inner.clone(),
        })
    }
}

pub struct MemoryConnection {
    inner: Arc<Inner>,
}

fn int(stmt: &Statement, idx: usize) -> i64 {
    match stmt.params.get(idx) {
        Some(Param::Int(v)) => *v,
        other => panic!("expected int param at {}, got {:?}", idx, other),
    }
}

fn text(stmt: &Statement, idx: usize) -> String {
    match stmt.params.get(idx) {
        Some(Param::Text(v)) => v.clone(),
        other => panic!("expected text param at {}, got {:?}", idx, other),
    }
}

impl MemoryConnection {
    async fn enter(&self) -> Result<(), DbError> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.inner.statement_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.inner.fail_statements.load(Ordering::SeqCst) {
            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(DbError::Statement(sqlx::Error::Protocol(
                "Lock wait timeout exceeded".to_string(),
            )));
        }
        Ok(())
    }

    fn leave(&self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        if self.inner.panic_on_execute.load(Ordering::SeqCst) {
            panic!("driver exploded");
        }
        self.enter().await?;

        let keyword = stmt.sql.split_whitespace().next().unwrap_or_default();
        let affected = {
            let mut rows = self.inner.rows.lock().unwrap();
            match keyword {
                "INSERT" => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    rows.push(LogEntry {
                        id,
                        user_id: int(stmt, 0),
                        operation_type: "insert".to_string(),
                        content: text(stmt, 1),
                    });
                    1
                }
                "UPDATE" => {
                    let user_id = int(stmt, 1);
                    match rows
                        .iter_mut()
                        .find(|r| r.user_id == user_id && r.operation_type == "insert")
                    {
                        Some(row) => {
                            row.content = text(stmt, 0);
                            row.operation_type = "update".to_string();
                            1
                        }
                        None => 0,
                    }
                }
                "DELETE" => {
                    let user_id = int(stmt, 0);
                    match rows.iter().position(|r| r.user_id == user_id) {
                        Some(pos) => {
                            rows.remove(pos);
                            1
                        }
                        None => 0,
                    }
                }
                other => panic!("unexpected write statement {}", other),
            }
        };

        self.leave();
        Ok(affected)
    }

    async fn fetch_entry(&mut self, stmt: &Statement) -> Result<Option<LogEntry>, DbError> {
        self.enter().await?;
        let user_id = int(stmt, 0);
        let found = self
            .inner
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.user_id == user_id)
            .cloned();
        self.leave();
        Ok(found)
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(self) -> Result<(), DbError> {
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
