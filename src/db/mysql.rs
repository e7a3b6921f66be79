use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection as _, Row};
use std::time::Duration;
use tokio::time;
use tracing::debug;

use super::{Connection, Connector, DbError, LogEntry, Param, Statement};
use crate::config::DatabaseConfig;

pub struct MySqlConnector {
    options: MySqlConnectOptions,
    connect_timeout: Duration,
}

impl MySqlConnector {
    /// Builds connect options from the `[database]` table, or from `url` when given.
    pub fn new(config: &DatabaseConfig, url: Option<&str>) -> Result<Self, DbError> {
        let options = match url {
            Some(url) => url.parse::<MySqlConnectOptions>().map_err(DbError::Connect)?,
            None => MySqlConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .username(&config.user)
                .password(&config.password)
                .database(&config.database),
        };

        Ok(Self {
            options: options.charset(&config.charset),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    type Conn = MySqlSession;

    async fn connect(&self) -> Result<MySqlSession, DbError> {
        let mut conn = time::timeout(
            self.connect_timeout,
            MySqlConnection::connect_with(&self.options),
        )
        .await
        .map_err(|_| DbError::ConnectTimeout(self.connect_timeout))?
        .map_err(DbError::Connect)?;

        sqlx::query("SET autocommit = 0")
            .execute(&mut conn)
            .await
            .map_err(DbError::Connect)?;

        debug!("Opened MySQL session");
        Ok(MySqlSession { conn })
    }
}

pub struct MySqlSession {
    conn: MySqlConnection,
}

fn build(stmt: &Statement) -> sqlx::query::Query<'_, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    let mut query = sqlx::query(stmt.sql);
    for param in &stmt.params {
        query = match param {
            Param::Int(v) => query.bind(*v),
            Param::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

#[async_trait]
impl Connection for MySqlSession {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, DbError> {
        let result = build(stmt).execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_entry(&mut self, stmt: &Statement) -> Result<Option<LogEntry>, DbError> {
        let Some(row) = build(stmt).fetch_optional(&mut self.conn).await? else {
            return Ok(None);
        };

        Ok(Some(LogEntry {
            id: row.try_get("id")?,
            user_id: row.try_get::<i32, _>("user_id")?.into(),
            operation_type: row.try_get("operation_type")?,
            content: row.try_get("content")?,
        }))
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        sqlx::query("COMMIT").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), DbError> {
        self.conn.close().await?;
        Ok(())
    }
}
