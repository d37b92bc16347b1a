//! event-outbox - forward newline-delimited events to a collector.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use event_outbox::config::DEFAULT_COLLECTOR_URL;
use event_outbox::{OutboxClient, OutboxConfig, SqliteStore};
use observability::{LogConfig, LogFormat};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Forward events to a collector through a buffered outbox.
#[derive(Parser, Debug)]
#[command(name = "event-outbox")]
#[command(about = "Buffer newline-delimited events and deliver them to a collector")]
#[command(version)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Collector base URL
    #[arg(long)]
    collector_url: Option<String>,

    /// API key sent as X-Auth-Token
    #[arg(long)]
    api_key: Option<String>,

    /// Send each flush as one multipart request
    #[arg(long)]
    bulk: bool,

    /// Drop events that are not JSON objects
    #[arg(long)]
    strict: bool,

    /// Attempts allowed after the first failure (0 = unlimited)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Flush once this many events are stored
    #[arg(long)]
    flush_count: Option<usize>,

    /// Timer flush period in milliseconds
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Ingestion queue capacity
    #[arg(long)]
    queue_buffer: Option<usize>,

    /// SQLite file for pending events; in-memory when absent
    #[arg(long)]
    store: Option<PathBuf>,

    /// Input file with one event per line; stdin when absent
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Log per-request timing and collector responses
    #[arg(long)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// File, then environment, then flags.
    fn outbox_config(&self) -> Result<OutboxConfig> {
        let mut config = match &self.config {
            Some(path) => OutboxConfig::load_from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => OutboxConfig::builder(DEFAULT_COLLECTOR_URL).build()?,
        };
        config
            .load_from_env()
            .context("invalid EVENT_OUTBOX_* environment override")?;

        if let Some(url) = &self.collector_url {
            config.collector_url = url.clone();
        }
        if let Some(key) = &self.api_key {
            config.api_key = Some(key.clone());
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(count) = self.flush_count {
            config.flush_count = count;
        }
        if let Some(interval) = self.flush_interval_ms {
            config.flush_interval_ms = interval;
        }
        if let Some(capacity) = self.queue_buffer {
            config.queue_buffer = capacity;
        }
        config.bulk |= self.bulk;
        config.strict |= self.strict;
        config.debug |= self.debug;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    observability::init_with_config(LogConfig {
        service_name: "event-outbox".into(),
        default_level: cli.log_level.clone(),
        format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        },
        ..Default::default()
    })?;

    let config = cli.outbox_config()?;
    let client = match &cli.store {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("failed to open store {}", path.display()))?;
            OutboxClient::connect_with_store(config, store)?
        }
        None => OutboxClient::connect(config)?,
    };

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let enqueued = forward_lines(&client, input).await?;
    info!(enqueued, "Input exhausted, closing outbox");

    let report = client.close().await?;
    if report.stats.stored > 0 {
        warn!(pending = report.stats.stored, "Events left undelivered");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Enqueue every non-blank line, returning how many were enqueued.
async fn forward_lines<R>(client: &OutboxClient, input: R) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut enqueued = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        client.enqueue(line).await?;
        enqueued += 1;
    }

    Ok(enqueued)
}
