//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use phdharvest_core::{HarvestConfig, ProgressReporter, Selection, StageSummary};
use phdharvest_shared::{
    AppConfig, CleanConfig, DoctorateId, DownloadConfig, GrobidConfig, ScrapeConfig, init_config,
    init_config_at, load_config, load_config_from,
};
use phdharvest_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// phdharvest: collect doctoral theses and their fulltext.
#[derive(Parser)]
#[command(
    name = "phdharvest",
    version,
    about = "Scrape, download and extract doctoral theses from the PPM portal.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.phdharvest/phdharvest.toml).
    #[arg(long, global = true, env = "PHDHARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path, overriding `defaults.database`.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Scrape the configured listing pages and store the records.
    Scrape {
        /// Stop each source after this many pages.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_pages: Option<u32>,
    },

    /// Download thesis PDFs.
    Download {
        /// Only work on this 0-based batch.
        #[arg(long)]
        batch: Option<u64>,
    },

    /// Run GROBID fulltext extraction on downloaded PDFs.
    Extract {
        /// Only work on this 0-based batch.
        #[arg(long)]
        batch: Option<u64>,
    },

    /// Turn extracted TEI into plain text.
    Clean {
        /// Only work on this 0-based batch.
        #[arg(long)]
        batch: Option<u64>,

        /// Re-clean records that already have text.
        #[arg(long)]
        force: bool,
    },

    /// Run every stage in order.
    Run {
        /// Only work on this 0-based batch.
        #[arg(long)]
        batch: Option<u64>,
    },

    /// Show the record count and batch layout.
    Batches,

    /// List stored records.
    List {
        /// Only records with cleaned text.
        #[arg(long)]
        with_text: bool,
    },

    /// Show one record, including its text.
    Show {
        /// Record ID.
        id: i64,
    },

    /// Full-text search over cleaned text.
    Search {
        /// FTS5 query.
        query: String,

        /// Maximum number of hits.
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Create a default config file.
    Init,
    /// Print the current configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "phdharvest=info",
        1 => "phdharvest=debug",
        _ => "phdharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(cli.config.as_deref()),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let config = read_config(cli.config.as_deref())?;
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.defaults.database));
    let batch_size = config.defaults.batch_size;

    match cli.command {
        Command::Scrape { max_pages } => cmd_scrape(&config, &db_path, max_pages).await,
        Command::Download { batch } => {
            cmd_download(&config, &db_path, Selection::from_batch(batch, batch_size)).await
        }
        Command::Extract { batch } => {
            cmd_extract(&config, &db_path, Selection::from_batch(batch, batch_size)).await
        }
        Command::Clean { batch, force } => {
            let selection = Selection::from_batch(batch, batch_size);
            cmd_clean(&config, &db_path, selection, force).await
        }
        Command::Run { batch } => {
            cmd_run(&config, &db_path, Selection::from_batch(batch, batch_size)).await
        }
        Command::Batches => cmd_batches(&db_path, batch_size).await,
        Command::List { with_text } => cmd_list(&db_path, with_text).await,
        Command::Show { id } => cmd_show(&db_path, DoctorateId(id)).await,
        Command::Search { query, limit } => cmd_search(&db_path, &query, limit).await,
        Command::Config { .. } => Ok(()),
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Open an existing database for the read-only commands.
async fn open_existing(db_path: &Path) -> Result<Storage> {
    if !db_path.exists() {
        return Err(eyre!(
            "no database at '{}'; run `phdharvest scrape` first",
            db_path.display()
        ));
    }
    Ok(Storage::open_readonly(db_path).await?)
}

// ---------------------------------------------------------------------------
// Stage commands
// ---------------------------------------------------------------------------

async fn cmd_scrape(config: &AppConfig, db_path: &Path, max_pages: Option<u32>) -> Result<()> {
    let mut scrape_config = ScrapeConfig::from(config);
    if max_pages.is_some() {
        scrape_config.max_pages = max_pages;
    }
    if scrape_config.sources.is_empty() {
        return Err(eyre!("no [[sources]] configured"));
    }

    info!(sources = scrape_config.sources.len(), db = %db_path.display(), "scraping");
    let storage = Storage::open(db_path).await?;
    let reporter = CliProgress::new();
    let summary = phdharvest_core::scrape(&storage, &scrape_config, &reporter).await?;
    reporter.finish();

    print_summaries(&[summary]);
    Ok(())
}

async fn cmd_download(config: &AppConfig, db_path: &Path, selection: Selection) -> Result<()> {
    let download_config = DownloadConfig::from(config);

    info!(?selection, data_dir = %download_config.data_dir.display(), "downloading");
    let storage = Storage::open(db_path).await?;
    let reporter = CliProgress::new();
    let summary =
        phdharvest_core::download(&storage, &download_config, selection, &reporter).await?;
    reporter.finish();

    print_summaries(&[summary]);
    Ok(())
}

async fn cmd_extract(config: &AppConfig, db_path: &Path, selection: Selection) -> Result<()> {
    let grobid_config = GrobidConfig::from(config);
    let data_dir = PathBuf::from(&config.defaults.data_dir);

    info!(?selection, grobid = %grobid_config.url, "extracting");
    let storage = Storage::open(db_path).await?;
    let reporter = CliProgress::new();
    let result =
        phdharvest_core::extract(&storage, &grobid_config, &data_dir, selection, &reporter).await;
    reporter.finish();

    print_summaries(&[result?]);
    Ok(())
}

async fn cmd_clean(
    config: &AppConfig,
    db_path: &Path,
    selection: Selection,
    force: bool,
) -> Result<()> {
    let clean_config = CleanConfig::from(config);
    let data_dir = PathBuf::from(&config.defaults.data_dir);

    info!(?selection, force, "cleaning");
    let storage = Storage::open(db_path).await?;
    let reporter = CliProgress::new();
    let summary =
        phdharvest_core::clean(&storage, &clean_config, &data_dir, selection, force, &reporter)
            .await?;
    reporter.finish();

    print_summaries(&[summary]);
    Ok(())
}

async fn cmd_run(config: &AppConfig, db_path: &Path, selection: Selection) -> Result<()> {
    let harvest_config = HarvestConfig::from(config);
    if harvest_config.scrape.sources.is_empty() {
        return Err(eyre!("no [[sources]] configured"));
    }

    info!(?selection, db = %db_path.display(), "running all stages");
    let storage = Storage::open(db_path).await?;
    let reporter = CliProgress::new();
    let result = phdharvest_core::harvest(&storage, &harvest_config, selection, &reporter).await;
    reporter.finish();

    print_summaries(&result?);
    Ok(())
}

fn print_summaries(summaries: &[StageSummary]) {
    println!();
    for summary in summaries {
        println!(
            "  {} ({:.1}s, job {})",
            summary.kind,
            summary.elapsed.as_secs_f64(),
            summary.job_id
        );
        if let Some(stats) = summary.stats.as_object() {
            for (key, value) in stats {
                match value {
                    serde_json::Value::Array(items) => println!("    {key:<16} {}", items.len()),
                    other => println!("    {key:<16} {other}"),
                }
            }
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// Query commands
// ---------------------------------------------------------------------------

async fn cmd_batches(db_path: &Path, batch_size: u32) -> Result<()> {
    let storage = open_existing(db_path).await?;
    let total = storage.count_doctorates().await?;
    let batches = storage.batch_count(batch_size).await?;

    println!("  Records:    {total}");
    println!("  Batch size: {batch_size}");
    println!("  Batches:    {batches}");

    for index in 0..batches {
        let records = storage.list_batch(index, batch_size).await?;
        if let (Some(first), Some(last)) = (records.first(), records.last()) {
            println!(
                "    batch {index:>4}: ids {}..={} ({} records)",
                first.id,
                last.id,
                records.len()
            );
        }
    }
    Ok(())
}

async fn cmd_list(db_path: &Path, with_text: bool) -> Result<()> {
    let storage = open_existing(db_path).await?;
    let records = if with_text {
        storage.list_with_text().await?
    } else {
        storage.list_doctorates().await?
    };

    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }

    println!("{:>6}  {:<10}  {:<12}  TITLE", "ID", "STAGE", "LICENSE");
    for doc in &records {
        println!(
            "{:>6}  {:<10}  {:<12}  {}",
            doc.id,
            doc.stage.as_str(),
            truncate(&doc.license, 12),
            truncate(&doc.title, 70)
        );
    }
    println!("\n{} record(s)", records.len());
    Ok(())
}

async fn cmd_show(db_path: &Path, id: DoctorateId) -> Result<()> {
    let storage = open_existing(db_path).await?;
    let doc = storage
        .get_doctorate(id)
        .await?
        .ok_or_else(|| eyre!("no record with id {id}"))?;

    println!("  ID:       {}", doc.id);
    println!("  Title:    {}", doc.title);
    println!("  URL:      {}", doc.url);
    println!("  License:  {}", doc.license);
    println!("  File:     {}", doc.file_url);
    println!("  Stage:    {}", doc.stage.as_str());
    println!("  Scraped:  {}", doc.scraped_at.to_rfc3339());
    if let Some(sha) = &doc.pdf_sha256 {
        println!("  SHA-256:  {sha}");
    }
    if let Some(err) = &doc.last_error {
        println!("  Error:    {err}");
    }
    match &doc.text {
        Some(text) => println!("\n{text}"),
        None => println!("\n  (no text)"),
    }
    Ok(())
}

async fn cmd_search(db_path: &Path, query: &str, limit: u32) -> Result<()> {
    let storage = open_existing(db_path).await?;
    let hits = storage.search(query, limit).await?;

    if hits.is_empty() {
        println!("No matches for '{query}'.");
        return Ok(());
    }

    for hit in &hits {
        println!("{:>6}  {}", hit.id, hit.title);
        println!("        {}", hit.snippet);
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item(&self, label: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("[{current}/{total}] {}", truncate(label, 60)));
    }

    fn done(&self, summary: &StageSummary) {
        self.spinner.println(format!(
            "  {} finished in {:.1}s",
            summary.kind,
            summary.elapsed.as_secs_f64()
        ));
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => init_config_at(path)?,
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = read_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
