use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

mod mysql;
#[cfg(test)]
pub mod testing;

pub use mysql::MySqlConnector;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("connect failed: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("{0}")]
    Statement(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Int(i64),
    Text(String),
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

/// A single parameterized statement. Placeholders are positional (`?`).
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: &'static str,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: &'static str) -> Self {
        Self {
            sql,
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, param: impl Into<Param>) -> Self {
        self.params.push(param.into());
        self
    }
}

/// One row of `user_operation_log` as read back by the select path.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub user_id: i64,
    pub operation_type: String,
    pub content: String,
}

/// A live database session. Sessions run with autocommit disabled, so every
/// statement joins an implicit transaction that ends with `commit` or `rollback`.
#[async_trait]
pub trait Connection: Send + Sized + 'static {
    /// Runs a write statement and returns the affected-row count.
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError>;

    async fn fetch_entry(&mut self, stmt: &Statement) -> Result<Option<LogEntry>, DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;

    async fn close(self) -> Result<(), DbError>;
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    async fn connect(&self) -> Result<Self::Conn, DbError>;
}
