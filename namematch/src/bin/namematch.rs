//! Command-line front end for the name matcher.
//!
//! Configuration comes from the environment (`STORAGE`, `DATA_ROOT`, `DATASET_MODE`, ...)
//! and can be overridden with flags. Logs go to stderr, results to stdout as JSON.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use namematch::config::{DatasetMode, EngineConfig, ServiceConfig, StorageKind};
use namematch::records::build_store;
use namematch::{NameMatcher, NameMatcherApi, Query};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the environment configuration.
#[derive(Args, Debug)]
struct SourceArgs {
    /// Record store: csv or sqlite
    #[arg(long, global = true)]
    storage: Option<String>,

    /// Root of the raw/ and clean/ dataset directories
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// original, standardized or standardized+dedupe
    #[arg(long, global = true)]
    dataset_mode: Option<String>,

    /// Dataset CSV, overriding the mode default
    #[arg(long, global = true)]
    csv: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    sqlite_path: Option<PathBuf>,

    /// Re-import the CSV into SQLite even if the table has rows
    #[arg(long, global = true)]
    force_reload: bool,

    /// Character n-gram size
    #[arg(long, global = true)]
    ngram_n: Option<usize>,

    /// Candidate cap per query
    #[arg(long, global = true)]
    max_candidates: Option<usize>,

    /// Minimum shared n-grams for a candidate
    #[arg(long, global = true)]
    min_shared_ngrams: Option<usize>,

    /// Result cache capacity, 0 disables it
    #[arg(long, global = true)]
    cache_max: Option<usize>,
}

#[derive(Args, Debug, Clone)]
struct QueryArgs {
    /// Minimum similarity (0-100) [default: engine default, 70]
    #[arg(long)]
    threshold: Option<f64>,

    /// Maximum number of results [default: engine default, 10]
    #[arg(long)]
    limit: Option<usize>,

    /// Weight of the token score (0-1) [default: engine default, 0.65]
    #[arg(long)]
    w_token: Option<f64>,

    /// Include token and edit scores per result
    #[arg(long)]
    explain: bool,

    /// Omit the results_by_id map
    #[arg(long)]
    no_by_id: bool,
}

impl QueryArgs {
    /// Query for `name`: explicit flags first, then the engine defaults.
    fn query(&self, engine: &EngineConfig, name: impl Into<String>) -> Query {
        let base = engine.query(name);
        let threshold = self.threshold.unwrap_or(base.threshold);
        let limit = self.limit.unwrap_or(base.limit);
        let w_token = self.w_token.unwrap_or(base.w_token);
        base.threshold(threshold)
            .limit(limit)
            .w_token(w_token)
            .explain(self.explain)
            .include_by_id(!self.no_by_id)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match one name and print the response
    Match {
        name: String,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Match every line of a file (a name or a JSON query) and print one JSON line each,
    /// followed by the metrics snapshot
    Batch {
        file: PathBuf,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Load the dataset and print its description and the active configuration
    Stats,
}

fn service_config(args: &SourceArgs) -> Result<ServiceConfig> {
    let mut config = ServiceConfig::from_env().context("invalid environment configuration")?;
    if let Some(storage) = &args.storage {
        config.storage = StorageKind::parse(storage)?;
    }
    if let Some(root) = &args.data_root {
        config.data_root = root.clone();
    }
    if let Some(mode) = &args.dataset_mode {
        config.dataset_mode = DatasetMode::parse_lenient(mode);
    }
    if let Some(csv) = &args.csv {
        config.csv_path = Some(csv.clone());
    }
    if let Some(path) = &args.sqlite_path {
        config.sqlite_path = path.clone();
    }
    if args.force_reload {
        config.sqlite_force_reload = true;
    }
    if let Some(n) = args.ngram_n {
        anyhow::ensure!(n >= 1, "--ngram-n must be at least 1");
        config.engine.ngram_n = n;
    }
    if let Some(max) = args.max_candidates {
        anyhow::ensure!(max >= 1, "--max-candidates must be at least 1");
        config.engine.max_candidates = max;
    }
    if let Some(min) = args.min_shared_ngrams {
        anyhow::ensure!(min >= 1, "--min-shared-ngrams must be at least 1");
        config.engine.min_shared_ngrams = min;
    }
    if let Some(cache) = args.cache_max {
        config.engine.cache_capacity = cache;
    }
    Ok(config)
}

async fn load_matcher(config: ServiceConfig) -> Result<NameMatcher> {
    tokio::task::spawn_blocking(move || {
        let store = build_store(&config);
        NameMatcher::from_store(config.engine.clone(), store.as_ref())
    })
    .await
    .context("loader task failed")?
    .context("failed to load dataset")
}

/// A JSON line overrides only the fields it names; the rest come from the flags.
fn batch_query(line: &str, defaults: &QueryArgs, engine: &EngineConfig) -> Result<Query> {
    let base = defaults.query(engine, line);
    if !line.starts_with('{') {
        return Ok(base);
    }
    let overrides: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(line).context("invalid JSON query")?;
    let mut merged = serde_json::to_value(Query {
        name: String::new(),
        ..base
    })?;
    if let Some(fields) = merged.as_object_mut() {
        fields.extend(overrides);
    }
    serde_json::from_value(merged).context("invalid JSON query")
}

async fn run_batch(matcher: &NameMatcher, file: PathBuf, defaults: QueryArgs) -> Result<()> {
    let reader = BufReader::new(
        std::fs::File::open(&file).with_context(|| format!("cannot open {}", file.display()))?,
    );
    let mut out = std::io::stdout();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry = match batch_query(line, &defaults, matcher.config()) {
            Ok(query) => {
                let name = query.name.clone();
                match matcher.match_async(query).await {
                    Ok(response) => json!({ "query": name, "response": response }),
                    Err(e) => json!({ "query": name, "error": e.to_string() }),
                }
            }
            Err(e) => json!({ "query": line, "error": format!("{e:#}") }),
        };
        writeln!(out, "{entry}")?;
    }

    writeln!(out, "{}", serde_json::to_string(&json!({ "metrics": matcher.metrics() }))?)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = service_config(&cli.source)?;
    tracing::info!(
        storage = config.storage.as_str(),
        mode = config.dataset_mode.as_str(),
        dataset = %config.dataset_path().display(),
        "loading dataset"
    );
    let matcher = load_matcher(config).await?;

    match cli.command {
        Command::Match { name, query } => {
            let response = matcher.match_async(query.query(matcher.config(), name)).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Batch { file, query } => {
            run_batch(&matcher, file, query).await?;
        }
        Command::Stats => {
            let snapshot = matcher.metrics();
            let body = json!({ "dataset": snapshot.dataset, "config": snapshot.config });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }
    Ok(())
}
