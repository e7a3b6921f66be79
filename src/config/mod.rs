use anyhow::Context;
use serde::Deserialize;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::ops::{ExecSettings, OperationKind};

pub const DEFAULT_CONFIG_PATH: &str = "crudstorm.toml";

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub workload: WorkloadConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub charset: String,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: "testdb".to_string(),
            charset: "utf8mb4".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WorkloadConfig {
    pub user_id_min: i64,
    pub user_id_max: i64,
    pub acquire_timeout_ms: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            user_id_min: 1,
            user_id_max: 200,
            acquire_timeout_ms: 5000,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Loads an explicit config file, or `crudstorm.toml` from the working
    /// directory if one exists, or falls back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::from_file(path)
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    info!("Loading config from {}", default_path.display());
                    Self::from_file(default_path)
                } else {
                    debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                    Ok(Self::default())
                }
            }
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("--concurrency is required and must be greater than zero")]
    Concurrency,
    #[error("--operation is required")]
    MissingOperation,
    #[error("user id range is empty: min {min} > max {max}")]
    EmptyIdRange { min: i64, max: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundLimit {
    Fixed(u64),
    Unbounded,
}

impl RoundLimit {
    /// Zero or negative loop counts mean "run until interrupted".
    pub fn from_loops(loops: i64) -> Self {
        if loops <= 0 {
            RoundLimit::Unbounded
        } else {
            RoundLimit::Fixed(loops as u64)
        }
    }

    pub fn allows(&self, round: u64) -> bool {
        match self {
            RoundLimit::Fixed(n) => round <= *n,
            RoundLimit::Unbounded => true,
        }
    }
}

/// Effective run settings after merging CLI flags over the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub concurrency: usize,
    pub operation: OperationKind,
    pub total: usize,
    pub rounds: RoundLimit,
    pub use_pool: bool,
    pub acquire_timeout: Duration,
    pub exec: ExecSettings,
}

impl Settings {
    pub fn resolve(cli: &Cli, config: &Config) -> Result<Self, ConfigError> {
        let concurrency = match cli.concurrency {
            Some(n) if n > 0 => n,
            _ => return Err(ConfigError::Concurrency),
        };
        let operation = cli.operation.ok_or(ConfigError::MissingOperation)?;

        let workload = &config.workload;
        if workload.user_id_min > workload.user_id_max {
            return Err(ConfigError::EmptyIdRange {
                min: workload.user_id_min,
                max: workload.user_id_max,
            });
        }

        let acquire_timeout_ms = cli
            .acquire_timeout_ms
            .unwrap_or(workload.acquire_timeout_ms);

        Ok(Self {
            concurrency,
            operation,
            total: cli.total,
            rounds: RoundLimit::from_loops(cli.loops),
            use_pool: !cli.no_pool,
            acquire_timeout: Duration::from_millis(acquire_timeout_ms),
            exec: ExecSettings {
                user_ids: RangeInclusive::new(workload.user_id_min, workload.user_id_max),
                wait: Duration::from_millis(cli.wait_ms.max(0) as u64),
            },
        })
    }
}
