use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod db;
mod ops;
mod pool;
mod report;
mod runner;
mod schema;
mod worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crudstorm=info,warn")),
        )
        .init();

    let cli = cli::Cli::parse();
    if cli.print_schema {
        print!("{}", schema::PREREQUISITE_SQL);
        return Ok(());
    }

    let config = config::Config::load(cli.config.as_deref())?;
    let settings = config::Settings::resolve(&cli, &config)?;
    let connector = db::MySqlConnector::new(&config.database, cli.database_url.as_deref())
        .context("invalid database settings")?;

    report::print_banner(&settings);

    let pool = Arc::new(pool::ConnectionPool::new(connector));
    if settings.use_pool {
        pool.initialize(settings.concurrency).await;
        if !pool.is_enabled().await {
            warn!("Running without a connection pool, every operation opens its own connection");
        }
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Could not listen for Ctrl-C");
            return;
        }
        info!("Interrupt received, finishing the current round");
        signal_cancel.cancel();
    });

    let worker = worker::Worker::new(pool.clone(), settings.exec.clone(), settings.acquire_timeout);
    let runner = runner::Runner::new(worker, &settings);
    let completed = runner.run(&cancel, &mut report::ConsoleReporter).await;

    if cancel.is_cancelled() {
        report::print_interrupted();
    }

    pool.shutdown().await;

    let stats = pool.stats();
    info!(
        "Finished {} rounds; connections opened={}, closed={}, ad-hoc={}, acquire timeouts={}",
        completed, stats.opened, stats.closed, stats.ad_hoc, stats.acquire_timeouts
    );
    Ok(())
}
