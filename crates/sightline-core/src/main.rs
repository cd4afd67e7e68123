//! Sightline CLI
//!
//! Operator interface for the Sightline aggregation engine.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sightline::config::LoggingConfig;
use sightline::db::Database;
use sightline::domains::{Commits, Issues, JobRuns, PullRequests, ScanFindings};
use sightline::models::{AggregationRecord, AggregationResponse, Page};
use sightline::query::{Domain, DomainFilter};
use sightline::registry::PgFieldRegistry;
use sightline::{AggregationService, Config};

/// Sightline - Aggregation engine for engineering analytics
#[derive(Parser)]
#[command(name = "sightline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "SIGHTLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum DomainName {
    Issues,
    PullRequests,
    Commits,
    CicdJobRuns,
    ScanFindings,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Check database connectivity
    Health,

    /// Run an aggregation from a JSON filter
    Aggregate {
        /// Domain to aggregate
        #[arg(long, value_enum)]
        domain: DomainName,

        /// Path to the filter JSON
        #[arg(long)]
        filter: PathBuf,
    },

    /// List one page of records from a JSON filter
    List {
        /// Domain to list
        #[arg(long, value_enum)]
        domain: DomainName,

        /// Path to the filter JSON
        #[arg(long)]
        filter: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging, cli.verbose);

    let result = match cli.command {
        Commands::Migrate => run_migrate(&config).await,
        Commands::Health => run_health(&config).await,
        Commands::Aggregate { domain, filter } => {
            run_aggregate(&config, domain, &filter, cli.format).await
        }
        Commands::List { domain, filter } => run_list(&config, domain, &filter, cli.format).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_migrate(config: &Config) -> anyhow::Result<()> {
    let db = Database::new(config).await.context("connecting to database")?;
    db.migrate().await.context("applying migrations")?;
    info!("Migrations applied");
    println!("Migrations applied");
    Ok(())
}

async fn run_health(config: &Config) -> anyhow::Result<()> {
    let db = Database::new(config).await.context("connecting to database")?;
    db.health_check().await.context("health check")?;
    println!("Database: ok");
    Ok(())
}

async fn run_aggregate(
    config: &Config,
    domain: DomainName,
    filter: &Path,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let json = read_filter(filter)?;
    let db = Database::new(config).await.context("connecting to database")?;
    match domain {
        DomainName::Issues => aggregate::<Issues>(config, db, &json, format).await,
        DomainName::PullRequests => aggregate::<PullRequests>(config, db, &json, format).await,
        DomainName::Commits => aggregate::<Commits>(config, db, &json, format).await,
        DomainName::CicdJobRuns => aggregate::<JobRuns>(config, db, &json, format).await,
        DomainName::ScanFindings => aggregate::<ScanFindings>(config, db, &json, format).await,
    }
}

async fn run_list(
    config: &Config,
    domain: DomainName,
    filter: &Path,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let json = read_filter(filter)?;
    let db = Database::new(config).await.context("connecting to database")?;
    match domain {
        DomainName::Issues => list::<Issues>(config, db, &json, format).await,
        DomainName::PullRequests => list::<PullRequests>(config, db, &json, format).await,
        DomainName::Commits => list::<Commits>(config, db, &json, format).await,
        DomainName::CicdJobRuns => list::<JobRuns>(config, db, &json, format).await,
        DomainName::ScanFindings => list::<ScanFindings>(config, db, &json, format).await,
    }
}

fn read_filter(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading filter {}", path.display()))
}

fn service<D: Domain>(config: &Config, db: Database) -> AggregationService<D> {
    let registry = Arc::new(PgFieldRegistry::new(db.pool().clone()));
    AggregationService::new(db, registry, config.query.clone())
}

async fn aggregate<D: Domain>(
    config: &Config,
    db: Database,
    json: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let filter = DomainFilter::<D>::from_json(json)?;
    let response = service::<D>(config, db).aggregate(&filter).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Table => print_aggregation(&response),
    }
    Ok(())
}

async fn list<D: Domain>(
    config: &Config,
    db: Database,
    json: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let filter = DomainFilter::<D>::from_json(json)?;
    let page = service::<D>(config, db).list(&filter).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&page)?),
        OutputFormat::Table => print_page(&page)?,
    }
    Ok(())
}

fn print_aggregation(response: &AggregationResponse) {
    println!(
        "{:<32} {:<24} {:<16} {:>8} {:>12} {:>12} {:>12}",
        "KEY", "ADDITIONAL", "STAGE", "COUNT", "MIN", "MEDIAN", "MAX"
    );
    for record in &response.records {
        print_record(record, 0);
    }
    println!();
    println!("{} buckets, filter {}", response.total_count, response.cache_hash);
}

fn print_record(record: &AggregationRecord, depth: usize) {
    let indent = "  ".repeat(depth);
    let stat = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
    println!(
        "{:<32} {:<24} {:<16} {:>8} {:>12} {:>12} {:>12}",
        format!("{indent}{}", record.key.as_deref().unwrap_or("-")),
        record.additional_key.as_deref().unwrap_or("-"),
        record.stage.as_deref().unwrap_or("-"),
        record.count,
        stat(record.min),
        stat(record.median),
        stat(record.max),
    );
    for stack in &record.stacks {
        print_record(stack, depth + 1);
    }
}

fn print_page<T: serde::Serialize>(page: &Page<T>) -> anyhow::Result<()> {
    for record in &page.records {
        println!("{}", serde_json::to_string(record)?);
    }
    println!();
    println!(
        "page {} ({} per page), {} of {} records",
        page.page,
        page.page_size,
        page.records.len(),
        page.total_count
    );
    Ok(())
}
