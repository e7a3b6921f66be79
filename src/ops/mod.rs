use clap::ValueEnum;
use rand::Rng;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::debug;

use crate::db::{Connection, DbError, Statement};

const INSERT_SQL: &str = "INSERT INTO user_operation_log (user_id, operation_type, content) \
     VALUES (?, 'insert', ?)";

// LIMIT 1 without ORDER BY: which matching row is touched is up to the engine
const UPDATE_SQL: &str = "UPDATE user_operation_log \
     SET content = ?, operation_type = 'update', operation_time = NOW() \
     WHERE user_id = ? AND operation_type = 'insert' LIMIT 1";

const DELETE_SQL: &str = "DELETE FROM user_operation_log WHERE user_id = ? LIMIT 1";

const SELECT_SQL: &str = "SELECT id, user_id, operation_type, content \
     FROM user_operation_log WHERE user_id = ? ORDER BY RAND() LIMIT 1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Select,
}

impl OperationKind {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "insert" => Some(OperationKind::Insert),
            "update" => Some(OperationKind::Update),
            "delete" => Some(OperationKind::Delete),
            "select" => Some(OperationKind::Select),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Select => "select",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an operation did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    /// The statement ran but found no row to act on.
    NoMatch,
    Statement,
    Connection,
    InvalidOperation,
    Panicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::NoMatch => "no matching row",
            FailureKind::Statement => "statement error",
            FailureKind::Connection => "connection failed",
            FailureKind::InvalidOperation => "invalid operation",
            FailureKind::Panicked => "panicked",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub kind: Option<OperationKind>,
    pub failure: Option<FailureKind>,
    pub message: String,
    pub affected_rows: Option<u64>,
}

impl Outcome {
    pub fn succeeded(kind: OperationKind, message: String, affected_rows: Option<u64>) -> Self {
        Self {
            kind: Some(kind),
            failure: None,
            message,
            affected_rows,
        }
    }

    pub fn failed(kind: Option<OperationKind>, failure: FailureKind, message: String) -> Self {
        Self {
            kind,
            failure: Some(failure),
            message,
            affected_rows: None,
        }
    }

    pub fn connection_failed(kind: OperationKind) -> Self {
        Self::failed(
            Some(kind),
            FailureKind::Connection,
            format!("{} failed: could not connect to MySQL", kind),
        )
    }

    pub fn invalid_operation(label: &str) -> Self {
        Self::failed(
            None,
            FailureKind::InvalidOperation,
            format!("invalid operation: {:?}", label),
        )
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Per-operation knobs shared by every executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecSettings {
    pub user_ids: RangeInclusive<i64>,
    /// Delay before commit (writes) or before returning (select).
    pub wait: Duration,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            user_ids: 1..=200,
            wait: Duration::ZERO,
        }
    }
}

impl ExecSettings {
    fn pick_user_id(&self) -> i64 {
        rand::rng().random_range(self.user_ids.clone())
    }

    async fn pause(&self) {
        if !self.wait.is_zero() {
            tokio::time::sleep(self.wait).await;
        }
    }
}

fn nonce() -> u32 {
    rand::rng().random_range(1000..=9999)
}

pub async fn execute<C: Connection>(
    kind: OperationKind,
    conn: &mut C,
    settings: &ExecSettings,
) -> Outcome {
    match kind {
        OperationKind::Insert => insert(conn, settings).await,
        OperationKind::Update => update(conn, settings).await,
        OperationKind::Delete => delete(conn, settings).await,
        OperationKind::Select => select(conn, settings).await,
    }
}

/// Runs one write statement, waits, then commits. Any error rolls back.
async fn write<C: Connection>(
    conn: &mut C,
    stmt: &Statement,
    settings: &ExecSettings,
) -> Result<u64, DbError> {
    let result = async {
        let affected = conn.execute(stmt).await?;
        settings.pause().await;
        conn.commit().await?;
        Ok::<_, DbError>(affected)
    }
    .await;

    if result.is_err() {
        if let Err(e) = conn.rollback().await {
            debug!("Rollback failed: {}", e);
        }
    }
    result
}

pub async fn insert<C: Connection>(conn: &mut C, settings: &ExecSettings) -> Outcome {
    let kind = OperationKind::Insert;
    let user_id = settings.pick_user_id();
    let content = format!(
        "concurrent insert user={} ts={} nonce={}",
        user_id,
        chrono::Utc::now().timestamp(),
        nonce()
    );
    let stmt = Statement::new(INSERT_SQL).bind(user_id).bind(content);

    match write(conn, &stmt, settings).await {
        Ok(affected) => Outcome::succeeded(
            kind,
            format!("insert ok: user_id={}", user_id),
            Some(affected),
        ),
        Err(e) => Outcome::failed(
            Some(kind),
            FailureKind::Statement,
            format!("insert failed: {}", e),
        ),
    }
}

pub async fn update<C: Connection>(conn: &mut C, settings: &ExecSettings) -> Outcome {
    let kind = OperationKind::Update;
    let user_id = settings.pick_user_id();
    let content = format!(
        "concurrent update ts={} nonce={}",
        chrono::Utc::now().timestamp(),
        nonce()
    );
    let stmt = Statement::new(UPDATE_SQL).bind(content).bind(user_id);

    match write(conn, &stmt, settings).await {
        Ok(0) => Outcome::failed(
            Some(kind),
            FailureKind::NoMatch,
            format!(
                "update failed: no matching row (user_id={}, operation_type=insert)",
                user_id
            ),
        ),
        Ok(affected) => Outcome::succeeded(
            kind,
            format!("update ok: user_id={}", user_id),
            Some(affected),
        ),
        Err(e) => Outcome::failed(
            Some(kind),
            FailureKind::Statement,
            format!("update failed: {}", e),
        ),
    }
}

pub async fn delete<C: Connection>(conn: &mut C, settings: &ExecSettings) -> Outcome {
    let kind = OperationKind::Delete;
    let user_id = settings.pick_user_id();
    let stmt = Statement::new(DELETE_SQL).bind(user_id);

    match write(conn, &stmt, settings).await {
        Ok(0) => Outcome::failed(
            Some(kind),
            FailureKind::NoMatch,
            format!("delete failed: no matching row (user_id={})", user_id),
        ),
        Ok(affected) => Outcome::succeeded(
            kind,
            format!("delete ok: user_id={}", user_id),
            Some(affected),
        ),
        Err(e) => Outcome::failed(
            Some(kind),
            FailureKind::Statement,
            format!("delete failed: {}", e),
        ),
    }
}

/// Reads one random row for a random user. Errors are reported without a
/// rollback; a completed read, hit or miss, commits so the session drops its
/// snapshot.
pub async fn select<C: Connection>(conn: &mut C, settings: &ExecSettings) -> Outcome {
    let kind = OperationKind::Select;
    let user_id = settings.pick_user_id();
    let stmt = Statement::new(SELECT_SQL).bind(user_id);

    let found = conn.fetch_entry(&stmt).await;
    settings.pause().await;

    if found.is_ok() {
        if let Err(e) = conn.commit().await {
            debug!("Commit after select failed: {}", e);
        }
    }

    match found {
        Ok(Some(entry)) => Outcome::succeeded(
            kind,
            format!(
                "select ok: id={} user_id={} type={}",
                entry.id, entry.user_id, entry.operation_type
            ),
            None,
        ),
        Ok(None) => Outcome::failed(
            Some(kind),
            FailureKind::NoMatch,
            format!("select failed: no row for user_id={}", user_id),
        ),
        Err(e) => Outcome::failed(
            Some(kind),
            FailureKind::Statement,
            format!("select failed: {}", e),
        ),
    }
}
