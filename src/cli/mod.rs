use clap::Parser;
use std::path::PathBuf;

use crate::ops::OperationKind;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Concurrent insert/update/delete/select load generator for MySQL"
)]
pub struct Cli {
    /// Number of operations in flight at once; also the connection pool size
    #[arg(short, long, required_unless_present = "print_schema")]
    pub concurrency: Option<usize>,

    /// Operation to run against user_operation_log
    #[arg(short, long, value_enum, required_unless_present = "print_schema")]
    pub operation: Option<OperationKind>,

    /// Operations per round
    #[arg(short, long, default_value_t = 1000)]
    pub total: usize,

    /// Milliseconds to wait before commit (writes) or before returning (select)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub wait_ms: i64,

    /// Number of rounds; 0 or negative runs until interrupted
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub loops: i64,

    /// Open a fresh connection per operation instead of using the pool
    #[arg(long)]
    pub no_pool: bool,

    /// TOML config file (defaults to ./crudstorm.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// MySQL URL, overrides the [database] table of the config file
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// How long a worker waits for a pooled connection before opening its own
    #[arg(long)]
    pub acquire_timeout_ms: Option<u64>,

    /// Print the prerequisite table DDL and seed data, then exit
    #[arg(long)]
    pub print_schema: bool,
}
