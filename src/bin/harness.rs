use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use nl2sql_backend::config::Config;
use nl2sql_backend::models::{LabeledQuery, SchemaContext};
use nl2sql_backend::services::harness::{default_query_set, render_text, sample_schema, EvaluationHarness};
use nl2sql_backend::services::strategies::StrategyRegistry;
use nl2sql_backend::storage::SqliteStorage;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Compare translation strategies over a labeled query set
#[derive(Parser, Debug)]
#[command(name = "harness", version)]
#[command(about = "Score NL-to-SQL strategies side by side and recommend one")]
struct Args {
    /// Schema JSON file (`{table_name, columns}`); defaults to the financial sample table
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Query set JSON file: an array of strings or `{query, expected}` objects
    #[arg(long)]
    queries: Option<PathBuf>,

    /// Strategy to include (pattern, llm, semantic); repeat for several, omit for all
    #[arg(long = "strategy")]
    strategies: Vec<String>,

    /// Maximum translations in flight
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Also store the report in this SQLite database
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryEntry {
    Text(String),
    Labeled(LabeledQuery),
}

fn load_schema(path: &Path) -> Result<SchemaContext> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid schema JSON in {}", path.display()))
}

fn load_queries(path: &Path) -> Result<Vec<LabeledQuery>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read query file {}", path.display()))?;
    let entries: Vec<QueryEntry> =
        serde_json::from_str(&raw).with_context(|| format!("Invalid query JSON in {}", path.display()))?;

    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            QueryEntry::Text(query) => LabeledQuery::unlabeled(query),
            QueryEntry::Labeled(labeled) => labeled,
        })
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let schema = match &args.schema {
        Some(path) => load_schema(path)?,
        None => sample_schema(),
    };
    let queries = match &args.queries {
        Some(path) => load_queries(path)?,
        None => default_query_set(),
    };
    if queries.is_empty() {
        anyhow::bail!("Query set is empty");
    }

    let registry = StrategyRegistry::from_config(&config)?;
    let strategies = registry.select(&args.strategies)?;
    let concurrency = args.concurrency.unwrap_or(config.harness.concurrency);

    let report = EvaluationHarness::new(strategies, concurrency)
        .run(&queries, &schema)
        .await;

    match args.format {
        OutputFormat::Text => print!("{}", render_text(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if let Some(path) = &args.save {
        let storage = SqliteStorage::new(path)
            .await
            .with_context(|| format!("Failed to open report store at {}", path.display()))?;
        storage.save_report(&report).await?;
        eprintln!("Saved report {} to {}", report.id, path.display());
    }

    Ok(())
}
