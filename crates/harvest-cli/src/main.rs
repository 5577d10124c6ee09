use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use harvest_client::{DefaultCrawlerFactory, FetchConfig, HtmdCleaner, OpenAiCompletion, ReqwestFetcher};
use harvest_core::models::{CollectedRecord, SavedRecordQuery};
use harvest_core::source::{RawSourceConfig, SourceConfig, SourceId};
use harvest_core::traits::{CollectionStore, DeepOutcome, MemoryStore};
use harvest_core::{
    CollectionConfig, CollectionOrchestrator, DeepCollectionService, ResultQueueEvent,
    RetryPolicy, StartCollection,
};
use harvest_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "harvest", version, about = "Keyword-driven web collection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a collection job and print its events to stdout
    Collect {
        /// Search keyword substituted into each source's templates
        #[arg(short, long)]
        keyword: String,

        /// Source ids to crawl, in order (default: every active source)
        #[arg(short, long = "source", value_name = "ID")]
        sources: Vec<SourceId>,

        /// Read sources from a JSON file instead of the database
        #[arg(long)]
        sources_file: Option<PathBuf>,

        /// First page
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Pages to crawl per source
        #[arg(long, default_value_t = 1)]
        pages: u32,

        /// Records per page
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Jsonl)]
        format: OutputFormat,

        /// Save collected records to the database (requires DATABASE_URL)
        #[arg(long, default_value_t = false)]
        save: bool,

        /// Retry transient failures this many times per page
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },

    /// List active sources
    Sources {
        /// Read sources from a JSON file instead of the database
        #[arg(long)]
        sources_file: Option<PathBuf>,
    },

    /// List saved records, newest first
    Saved {
        /// Substring filter on the collection keyword
        #[arg(short, long)]
        keyword: Option<String>,

        #[arg(long)]
        source_type: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Enrich saved records with an LLM analysis
    Deep {
        /// Saved record ids
        #[arg(required = true, value_name = "RECORD_ID")]
        record_ids: Vec<i64>,

        #[arg(short, long, env = "HARVEST_MODEL", default_value = harvest_client::llm::DEFAULT_MODEL)]
        model: String,

        #[arg(
            short,
            long,
            env = "HARVEST_BASE_URL",
            default_value = harvest_client::llm::DEFAULT_BASE_URL
        )]
        base_url: String,

        #[arg(short, long, env = "HARVEST_API_KEY", hide_env_values = true)]
        api_key: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Every stream event as one JSON object per line
    Jsonl,
    /// Records only, as CSV with a header row
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries results only.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            keyword,
            sources,
            sources_file,
            page,
            pages,
            limit,
            format,
            save,
            retries,
        } => {
            let request = StartCollection::new(keyword, sources)
                .with_page(page)
                .with_pages(pages)
                .with_limit(limit);
            let config = CollectionConfig::default()
                .with_retry(RetryPolicy::new(retries, Duration::from_secs(1)));

            let db = if save || sources_file.is_none() {
                Some(connect_db().await?)
            } else {
                None
            };

            let records = match sources_file {
                Some(path) => {
                    let store = MemoryStore::new(load_sources_file(&path)?);
                    cmd_collect(store, request, config, format).await?
                }
                None => {
                    let store = db.clone().context("Sources need a database or --sources-file")?;
                    cmd_collect(store, request, config, format).await?
                }
            };

            if let Some(db) = db.filter(|_| save) {
                let saved = db
                    .save_records(&records)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
                tracing::info!(saved, "Saved collected records");
            }
        }
        Commands::Sources { sources_file } => {
            let sources = match sources_file {
                Some(path) => MemoryStore::new(load_sources_file(&path)?)
                    .list_active_sources()
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?,
                None => connect_db()
                    .await?
                    .list_active_sources()
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?,
            };
            print_sources(&sources);
        }
        Commands::Saved {
            keyword,
            source_type,
            limit,
            offset,
        } => {
            let db = connect_db().await?;
            cmd_saved(
                &db,
                SavedRecordQuery {
                    keyword,
                    source_type,
                    limit,
                    offset,
                },
            )
            .await?;
        }
        Commands::Deep {
            record_ids,
            model,
            base_url,
            api_key,
        } => {
            let db = connect_db().await?;
            cmd_deep(db, &record_ids, &model, &base_url, &api_key).await?;
        }
    }

    Ok(())
}

async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

/// A JSON array of source rows, in the same shape as the database table.
fn load_sources_file(path: &Path) -> Result<Vec<SourceConfig>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sources file: {}", path.display()))?;
    parse_sources(&text).with_context(|| format!("Invalid sources file: {}", path.display()))
}

fn parse_sources(text: &str) -> Result<Vec<SourceConfig>> {
    let rows: Vec<RawSourceConfig> = serde_json::from_str(text)?;
    rows.into_iter()
        .map(|row| SourceConfig::from_raw(row).map_err(|e| anyhow::anyhow!(e)))
        .collect()
}

async fn cmd_collect<S: CollectionStore>(
    store: S,
    mut request: StartCollection,
    config: CollectionConfig,
    format: OutputFormat,
) -> Result<Vec<CollectedRecord>> {
    if request.source_ids.is_empty() {
        request.source_ids = store
            .list_active_sources()
            .await
            .map_err(|e| anyhow::anyhow!(e))?
            .iter()
            .map(|s| s.id)
            .collect();
        anyhow::ensure!(!request.source_ids.is_empty(), "No active sources to collect from");
    }

    let fetch_config = FetchConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let orchestrator =
        CollectionOrchestrator::new(store, DefaultCrawlerFactory::new(fetch_config), config);

    let job_id = orchestrator
        .start_job(request)
        .map_err(|e| anyhow::anyhow!(e))?;
    let mut stream = orchestrator
        .stream_results(&job_id)
        .map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(%job_id, "Collection started (Ctrl+C stops after the current page)");

    let mut output = EventWriter::new(std::io::stdout().lock(), format);
    let mut records = Vec::new();
    let mut failure = None;
    let mut stopping = false;

    loop {
        tokio::select! {
            event = stream.next_event() => {
                let Some(event) = event else { break };
                output.write(&event)?;
                match event {
                    ResultQueueEvent::Record(record) => records.push(record),
                    ResultQueueEvent::Error { error, fatal: true, .. } => failure = Some(error),
                    ResultQueueEvent::Error { source_name, error, .. } => {
                        tracing::warn!(source = source_name.as_deref().unwrap_or("-"), %error, "Source failed");
                    }
                    ResultQueueEvent::Completed { .. } => {}
                }
            }
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                orchestrator.stop_job(&job_id);
            }
        }
    }

    output.finish()?;
    orchestrator.shutdown();

    if let Some(error) = failure {
        anyhow::bail!("Collection failed: {error}");
    }
    tracing::info!(records = records.len(), "Collection finished");
    Ok(records)
}

/// Writes stream events to stdout in the chosen format.
enum EventWriter<W: Write> {
    Jsonl(W),
    Csv {
        writer: csv::Writer<W>,
        header_written: bool,
    },
}

const CSV_HEADER: [&str; 9] = [
    "title",
    "url",
    "summary",
    "image",
    "source",
    "keyword",
    "sourceType",
    "sourceName",
    "collectedAt",
];

impl<W: Write> EventWriter<W> {
    fn new(out: W, format: OutputFormat) -> Self {
        match format {
            OutputFormat::Jsonl => EventWriter::Jsonl(out),
            OutputFormat::Csv => EventWriter::Csv {
                writer: csv::Writer::from_writer(out),
                header_written: false,
            },
        }
    }

    fn write(&mut self, event: &ResultQueueEvent) -> Result<()> {
        match self {
            EventWriter::Jsonl(out) => {
                serde_json::to_writer(&mut *out, event)?;
                writeln!(out)?;
                out.flush()?;
            }
            EventWriter::Csv {
                writer,
                header_written,
            } => {
                let ResultQueueEvent::Record(record) = event else {
                    return Ok(());
                };
                if !*header_written {
                    writer.write_record(CSV_HEADER)?;
                    *header_written = true;
                }
                let collected_at = record.collected_at.to_rfc3339();
                writer.write_record([
                    record.title.as_str(),
                    &record.url,
                    &record.summary,
                    &record.image,
                    &record.source,
                    &record.keyword,
                    &record.source_type,
                    &record.source_name,
                    &collected_at,
                ])?;
                writer.flush()?;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        match self {
            EventWriter::Jsonl(mut out) => out.flush()?,
            EventWriter::Csv { mut writer, .. } => writer.flush()?,
        }
        Ok(())
    }
}

fn print_sources(sources: &[SourceConfig]) {
    if sources.is_empty() {
        println!("No active sources");
        return;
    }
    for source in sources {
        println!(
            "  [{}] {} ({}, {}) {}",
            source.id, source.name, source.source_type, source.method, source.url_template
        );
    }
    println!("\nTotal: {} sources", sources.len());
}

async fn cmd_saved(db: &Database, query: SavedRecordQuery) -> Result<()> {
    let records = db
        .records()
        .list(&query)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if records.is_empty() {
        println!("No saved records");
        return Ok(());
    }

    for record in &records {
        let deep = if record.has_deep_collected { " [deep]" } else { "" };
        println!(
            "  #{} {} - {} ({}, keyword: {}){}",
            record.id,
            record.saved_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.title,
            record.source,
            record.keyword,
            deep,
        );
    }
    println!("\nShown: {} records", records.len());
    Ok(())
}

async fn cmd_deep(
    db: Database,
    record_ids: &[i64],
    model: &str,
    base_url: &str,
    api_key: &str,
) -> Result<()> {
    let fetch_config = FetchConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let service = DeepCollectionService::new(
        ReqwestFetcher::with_timeout(fetch_config.timeout).map_err(|e| anyhow::anyhow!(e))?,
        HtmdCleaner::new(),
        OpenAiCompletion::with_base_url(api_key, model, base_url).map_err(|e| anyhow::anyhow!(e))?,
        db,
        model.to_string(),
    );

    let mut failed = 0;
    for &record_id in record_ids {
        match service.process(record_id).await {
            Ok(DeepOutcome::Completed {
                analysis_result,
                tokens_used,
                ..
            }) => {
                tracing::info!(record_id, tokens_used, "Deep collection completed");
                println!("{record_id}\t{analysis_result}");
            }
            Ok(DeepOutcome::Failed { error_message }) => {
                failed += 1;
                tracing::warn!(record_id, error = %error_message, "Deep collection failed");
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(record_id, error = %e, "Deep collection failed");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} records failed", record_ids.len());
    }
    Ok(())
}
