//! Datalayer CLI: run the query API, query datasets directly, manage the cache.
//!
//! Commands:
//! - `serve` — run the HTTP query surface until Ctrl-C
//! - `prices` / `realestate` — filtered rows as JSON or CSV
//! - `providers` — distinct provider names
//! - `summary` — per-provider mean/sum/count of a metric
//! - `cache status` — entry count, fresh entries, bytes on disk
//! - `cache clean` — remove entries older than the cache TTL
//!
//! Settings come from `DATALAYER_CONFIG` (TOML) and the environment; flags
//! override individual values.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use datalayer_core::data::{CacheManager, HttpFetcher, PRICES_DATASET};
use datalayer_core::{
    AnalyticsQuery, DataRepository, LogFormat, PriceQuery, QueryParams, RealEstateQuery, Row,
    Settings,
};
use datalayer_server::AppState;
use serde::Serialize;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "datalayer",
    about = "Datalayer CLI — query API and tools for the clean data tier"
)]
struct Cli {
    /// Override DATA_BASE_PATH.
    #[arg(long, global = true)]
    data_path: Option<PathBuf>,

    /// Override CACHE_DIR.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP query API.
    Serve {
        /// Listen address. Defaults to BIND_ADDR (127.0.0.1:8000).
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Query the prices dataset.
    Prices {
        #[command(flatten)]
        filters: FilterArgs,

        #[arg(long)]
        min_price: Option<f64>,

        #[arg(long)]
        max_price: Option<f64>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Query the real-estate dataset.
    Realestate {
        #[command(flatten)]
        filters: FilterArgs,

        #[arg(long)]
        min_bedrooms: Option<i64>,

        #[arg(long)]
        max_bedrooms: Option<i64>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// List provider names.
    Providers {
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Aggregate a metric per provider.
    Summary {
        /// Dataset to aggregate.
        #[arg(long, default_value = PRICES_DATASET)]
        dataset: String,

        /// Metric column. Defaults to `price`, then `value`.
        #[arg(long)]
        metric: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report entry count, fresh entries and size.
    Status,
    /// Remove entries older than the cache TTL.
    Clean,
}

/// Filters shared by every dataset query.
#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    provider: Option<String>,

    /// ISO country code (2-3 letters).
    #[arg(long)]
    country: Option<String>,

    #[arg(long)]
    region: Option<String>,

    /// Start date (YYYY-MM-DD), inclusive.
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// End date (YYYY-MM-DD), inclusive.
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Row cap (1-10000). Defaults to 1000.
    #[arg(long, allow_negative_numbers = true)]
    limit: Option<i64>,
}

impl FilterArgs {
    fn into_params(self) -> QueryParams {
        QueryParams {
            provider: self.provider,
            country: self.country,
            region: self.region,
            start_date: self.start_date,
            end_date: self.end_date,
            limit: self.limit,
            ..QueryParams::default()
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load().context("failed to load settings")?;
    if let Some(path) = cli.data_path {
        settings.data_base_path = Some(path);
    }
    if let Some(dir) = cli.cache_dir {
        settings.cache_dir = dir;
    }

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    init_tracing(settings.log_format, default_level);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(addr) = bind {
                settings.bind_addr = addr;
            }
            run_serve(settings)
        }
        Commands::Prices {
            filters,
            min_price,
            max_price,
            format,
        } => {
            let query = PriceQuery::try_from(QueryParams {
                min_price,
                max_price,
                ..filters.into_params()
            })?;
            let rows = repository(&settings)?.fetch_prices(&query)?;
            print_rows(&rows, format)
        }
        Commands::Realestate {
            filters,
            min_bedrooms,
            max_bedrooms,
            format,
        } => {
            let query = RealEstateQuery::try_from(QueryParams {
                min_bedrooms,
                max_bedrooms,
                ..filters.into_params()
            })?;
            let rows = repository(&settings)?.fetch_realestate(&query)?;
            print_rows(&rows, format)
        }
        Commands::Providers { format } => {
            let names = repository(&settings)?.list_providers()?;
            match format {
                OutputFormat::Json => print_json(&names),
                OutputFormat::Csv => {
                    let records = names.iter().map(|provider| ProviderRecord { provider });
                    print_csv_records(records)
                }
            }
        }
        Commands::Summary {
            dataset,
            metric,
            filters,
            format,
        } => {
            let query = AnalyticsQuery::try_from(QueryParams {
                metric,
                ..filters.into_params()
            })?;
            let summary = repository(&settings)?.fetch_provider_summary(&dataset, &query)?;
            match format {
                OutputFormat::Json => print_json(&summary),
                OutputFormat::Csv => print_csv_records(summary.iter()),
            }
        }
        Commands::Cache { action } => {
            let cache = CacheManager::new(&settings.cache_dir, settings.cache_ttl)?;
            match action {
                CacheAction::Status => run_cache_status(&cache),
                CacheAction::Clean => run_cache_clean(&cache),
            }
        }
    }
}

fn init_tracing(format: LogFormat, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init(),
    }
}

fn repository(settings: &Settings) -> Result<DataRepository> {
    let cache = CacheManager::new(&settings.cache_dir, settings.cache_ttl)?;
    let fetcher = Arc::new(HttpFetcher::new(settings.download_timeout)?);
    Ok(DataRepository::new(settings, cache, fetcher))
}

fn run_serve(settings: Settings) -> Result<()> {
    // The blocking HTTP client must be built outside the async runtime
    let state = AppState::from_settings(settings)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(datalayer_server::serve(state.clone(), shutdown_signal()))?;
    drop(runtime);
    info!("datalayer-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed
        std::future::pending::<()>().await;
    }
}

fn run_cache_status(cache: &CacheManager) -> Result<()> {
    let status = cache.status()?;
    println!("Cache directory: {}", cache.base_dir().display());
    println!("TTL:             {}s", cache.ttl().as_secs());
    println!("Entries:         {}", status.entries);
    println!("Fresh:           {}", status.fresh);
    println!("Size:            {}", format_size(status.total_bytes));
    Ok(())
}

fn run_cache_clean(cache: &CacheManager) -> Result<()> {
    let removed = cache.purge_expired()?;
    if removed == 0 {
        println!("No expired entries to remove.");
    } else {
        println!("Removed {removed} expired entr{}.", if removed == 1 { "y" } else { "ies" });
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[derive(Serialize)]
struct ProviderRecord<'a> {
    provider: &'a str,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn print_csv_records<T: Serialize>(records: impl IntoIterator<Item = T>) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout().lock());
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn print_rows(rows: &[Row], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(rows),
        OutputFormat::Csv => write_rows_csv(rows, io::stdout().lock()),
    }
}

/// Header is every column in first-seen order; nulls render as empty cells.
fn write_rows_csv<W: Write>(rows: &[Row], out: W) -> Result<()> {
    let mut header: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !header.contains(&key.as_str()) {
                header.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&header)?;
    for row in rows {
        let record = header.iter().map(|col| match row.get(*col) {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        });
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn cli_parses_query_flags() {
        let cli = Cli::try_parse_from([
            "datalayer",
            "prices",
            "--provider",
            "one",
            "--start-date",
            "2024-01-01",
            "--limit",
            "5",
            "--format",
            "csv",
        ])
        .unwrap();
        match cli.command {
            Commands::Prices {
                filters, format, ..
            } => {
                let params = filters.into_params();
                assert_eq!(params.provider.as_deref(), Some("one"));
                assert_eq!(params.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
                assert_eq!(params.limit, Some(5));
                assert!(format == OutputFormat::Csv);
            }
            _ => panic!("expected prices command"),
        }
    }

    #[test]
    fn invalid_date_flag_is_rejected() {
        assert!(Cli::try_parse_from(["datalayer", "prices", "--end-date", "yesterday"]).is_err());
    }

    #[test]
    fn csv_rows_union_columns_and_blank_nulls() {
        let rows = vec![
            row(json!({"provider": "ONE", "price": 10.0})),
            row(json!({"provider": "TWO", "price": null, "date": "2024-01-01"})),
        ];
        let mut out = Vec::new();
        write_rows_csv(&rows, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "provider,price,date");
        assert_eq!(lines[1], "ONE,10.0,");
        assert_eq!(lines[2], "TWO,,2024-01-01");
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
