//! respcache - maintenance tool for the shared HTTP response cache

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use respcache_core::{CacheKey, CacheStore, HeaderValue, spawn_prune_task};
use respcache_db::TABLE_NAME;
use respcache_db::utils::format_bytes;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;

/// respcache - shared HTTP response cache maintenance
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/respcache.toml")]
    config: String,

    /// Database connection string (overrides the config file)
    #[arg(long, env = "RESPCACHE_DATABASE_URL")]
    database_url: Option<String>,

    /// Log level (overrides the config file)
    #[arg(long, env = "RESPCACHE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the cache table and indexes
    Init,
    /// Print entry counts and hit statistics
    Stats,
    /// Remove expired entries once
    Prune,
    /// Show the fresh entry answering a request
    Lookup(RequestArgs),
    /// Delete the entry answering a request
    Purge(RequestArgs),
    /// Prune periodically until interrupted
    Sweep {
        /// Seconds between passes (defaults to cache.prune_interval_secs)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// Request origin, e.g. https://example.com
    #[arg(long)]
    origin: String,

    /// Request path, e.g. /index.html
    #[arg(long)]
    path: String,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header as "name: value"; repeat for multiple
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
}

impl RequestArgs {
    fn to_key(&self) -> CacheKey {
        let mut key = CacheKey::new(&self.origin, &self.method, &self.path);
        for (name, value) in &self.headers {
            let combined = match key.header(name) {
                Some(HeaderValue::One(first)) => {
                    HeaderValue::Many(vec![first.clone(), value.clone()])
                }
                Some(HeaderValue::Many(values)) => {
                    let mut values = values.clone();
                    values.push(value.clone());
                    HeaderValue::Many(values)
                }
                None => HeaderValue::One(value.clone()),
            };
            key = key.with_header(name, combined);
        }
        key
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"name: value\", got {:?}", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let (mut config, loaded) = Config::load(&args.config)?;
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);
    Config::log_source(&args.config, loaded);

    info!("Starting respcache v{}", env!("CARGO_PKG_VERSION"));

    let store = CacheStore::connect(&config.database, config.cache.clone())
        .await
        .with_context(|| format!("Failed to open cache database {}", config.database.url))?;

    let result = run(&store, args.command).await;
    store.close().await;
    result
}

async fn run(store: &CacheStore, command: Command) -> Result<()> {
    match command {
        Command::Init => {
            let count = store.database().count_entries().await?;
            println!("Table {} ready ({} entries)", TABLE_NAME, count);
        }
        Command::Stats => {
            let stats = store.stats().await?;
            println!("entries:    {}", stats.entries.entry_count);
            println!("expired:    {}", stats.entries.expired_count);
            println!("body bytes: {}", format_bytes(stats.entries.total_body_bytes));
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Prune => {
            let removed = store.prune().await?;
            println!("Removed {} entries", removed);
        }
        Command::Lookup(request) => {
            let key = request.to_key();
            match store.get(&key).await? {
                Some(response) => {
                    let body_bytes = response.body.as_ref().map_or(0, |body| body.len());
                    let mut json = serde_json::to_value(&response)?;
                    json["body_bytes"] = body_bytes.into();
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
                None => println!("not found"),
            }
        }
        Command::Purge(request) => {
            store.delete(&request.to_key()).await?;
            println!("Purged {} {}", request.method, request.to_key().url());
        }
        Command::Sweep { interval_secs } => {
            let period = interval_secs
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or_else(|| store.config().prune_interval());

            // Run one pass immediately; the task skips its first tick
            let removed = store.prune().await?;
            info!("Initial prune removed {} entries", removed);

            let task = spawn_prune_task(store.clone(), period);
            shutdown_signal().await;
            task.abort();
        }
    }
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Accept-Encoding: gzip, br").unwrap(),
            ("Accept-Encoding".to_string(), "gzip, br".to_string())
        );
        assert!(parse_header("no-colon").is_err());
    }

    #[test]
    fn test_repeated_headers_become_a_list() {
        let args = Args::parse_from([
            "respcache",
            "lookup",
            "--origin",
            "https://a",
            "--path",
            "/x",
            "-H",
            "Accept: text/html",
            "-H",
            "accept: application/json",
            "-H",
            "Accept-Encoding: gzip",
        ]);
        let Command::Lookup(request) = args.command else {
            panic!("expected lookup");
        };

        let key = request.to_key();
        assert_eq!(key.method, "GET");
        assert_eq!(
            key.header("accept"),
            Some(&HeaderValue::from(["text/html", "application/json"]))
        );
        assert_eq!(key.header("accept-encoding"), Some(&HeaderValue::from("gzip")));
    }

    #[test]
    fn test_sweep_interval_flag() {
        let args = Args::parse_from(["respcache", "sweep", "--interval-secs", "60"]);
        assert!(matches!(
            args.command,
            Command::Sweep {
                interval_secs: Some(60)
            }
        ));
    }
}
