//! Harvest stages: scrape → download → extract → clean.
//!
//! Every stage reads its records from storage, does its work, writes the
//! per-record outcome back (`stage`, `last_error`, hash, text), and records a
//! harvest job with a JSON stats blob. A record that fails is marked
//! `failed`; it never aborts the stage.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use phdharvest_downloader::{DocPaths, DownloadOutcome, Downloader};
use phdharvest_grobid::{ExtractOutcome, Extractor, GrobidClient};
use phdharvest_scraper::{PortalScraper, ScrapeStats};
use phdharvest_shared::{
    AppConfig, CleanConfig, Doctorate, DoctorateId, DownloadConfig, GrobidConfig, HarvestError,
    Result, ScrapeConfig, Stage,
};
use phdharvest_storage::Storage;
use phdharvest_teiclean::clean_tei;

// ---------------------------------------------------------------------------
// Configuration & selection
// ---------------------------------------------------------------------------

/// Runtime configuration for every stage.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub scrape: ScrapeConfig,
    pub download: DownloadConfig,
    pub grobid: GrobidConfig,
    pub clean: CleanConfig,
    pub batch_size: u32,
}

impl From<&AppConfig> for HarvestConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            scrape: ScrapeConfig::from(config),
            download: DownloadConfig::from(config),
            grobid: GrobidConfig::from(config),
            clean: CleanConfig::from(config),
            batch_size: config.defaults.batch_size,
        }
    }
}

/// Which records a stage works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    All,
    /// One 0-based batch of `size` records, ordered by ID.
    Batch { index: u64, size: u32 },
}

impl Selection {
    /// `Batch` when an index is given, `All` otherwise.
    pub fn from_batch(index: Option<u64>, size: u32) -> Self {
        match index {
            Some(index) => Self::Batch { index, size },
            None => Self::All,
        }
    }

    async fn load(&self, storage: &Storage) -> Result<Vec<Doctorate>> {
        match *self {
            Self::All => storage.list_doctorates().await,
            Self::Batch { index, size } => {
                let batches = storage.batch_count(size).await?;
                if index >= batches {
                    return Err(HarvestError::validation(format!(
                        "batch {index} out of range ({batches} batches of {size})"
                    )));
                }
                storage.list_batch(index, size).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Progress & summaries
// ---------------------------------------------------------------------------

/// Result of one stage run.
#[derive(Debug, Clone)]
pub struct StageSummary {
    /// Stage name, also the job kind in storage.
    pub kind: &'static str,
    pub job_id: String,
    /// Stage-specific counters, as stored on the job.
    pub stats: serde_json::Value,
    pub elapsed: Duration,
}

/// Progress callback for reporting stage status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts.
    fn phase(&self, name: &str);
    /// Called after each record is handled.
    fn item(&self, label: &str, current: usize, total: usize);
    /// Called when a stage completes.
    fn done(&self, summary: &StageSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item(&self, _label: &str, _current: usize, _total: usize) {}
    fn done(&self, _summary: &StageSummary) {}
}

#[derive(Debug, Default, Serialize)]
struct ScrapeJobStats {
    #[serde(flatten)]
    scrape: ScrapeStats,
    /// Records whose URL was already stored (ID kept, metadata refreshed).
    rescraped: usize,
}

#[derive(Debug, Default, Serialize)]
struct DownloadStats {
    records: usize,
    downloaded: usize,
    already_present: usize,
    already_extracted: usize,
    failed: usize,
    bytes: usize,
}

#[derive(Debug, Default, Serialize)]
struct ExtractStats {
    records: usize,
    extracted: usize,
    already_extracted: usize,
    invalid_pdf: usize,
    failed: usize,
}

#[derive(Debug, Default, Serialize)]
struct CleanStats {
    records: usize,
    cleaned: usize,
    skipped_with_text: usize,
    missing_tei: usize,
    empty: usize,
    failed: usize,
    words: usize,
}

async fn finish_stage(
    storage: &Storage,
    kind: &'static str,
    job_id: String,
    start: Instant,
    stats: &impl Serialize,
    progress: &dyn ProgressReporter,
) -> Result<StageSummary> {
    let stats = serde_json::to_value(stats)
        .map_err(|e| HarvestError::Storage(format!("failed to encode {kind} stats: {e}")))?;
    storage.finish_job(&job_id, &stats.to_string()).await?;

    let summary = StageSummary {
        kind,
        job_id,
        stats,
        elapsed: start.elapsed(),
    };

    info!(
        stage = kind,
        job_id = %summary.job_id,
        elapsed_ms = summary.elapsed.as_millis(),
        stats = %summary.stats,
        "stage complete"
    );
    progress.done(&summary);
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Stage bookkeeping
// ---------------------------------------------------------------------------

/// Position of a stage in the harvest order; `Failed` sorts first.
fn stage_rank(stage: Stage) -> u8 {
    match stage {
        Stage::Failed | Stage::Scraped => 0,
        Stage::Downloaded => 1,
        Stage::Extracted => 2,
        Stage::Cleaned => 3,
    }
}

/// Move a record forward to `target`; never moves it backwards.
async fn advance(storage: &Storage, record: &Doctorate, target: Stage) -> Result<()> {
    if record.stage == Stage::Failed || stage_rank(record.stage) < stage_rank(target) {
        storage.set_stage(record.id, target, None).await?;
    }
    Ok(())
}

async fn fail(storage: &Storage, id: DoctorateId, reason: &str) -> Result<()> {
    warn!(%id, reason, "record failed");
    storage.set_stage(id, Stage::Failed, Some(reason)).await
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Scrape the configured sources and store the records.
///
/// IDs continue after the largest stored ID. A URL that is already stored
/// keeps its ID and stage; its title, license and file URL are refreshed.
#[instrument(skip_all, fields(sources = config.sources.len()))]
pub async fn scrape(
    storage: &Storage,
    config: &ScrapeConfig,
    progress: &dyn ProgressReporter,
) -> Result<StageSummary> {
    let start = Instant::now();
    progress.phase("Scraping listings");

    let job_id = storage.insert_job("scrape").await?;
    let first_id = storage.next_doctorate_id().await?;

    let scraper = PortalScraper::new(config.clone())?;
    let outcome = scraper.scrape(first_id).await?;

    let total = outcome.records.len();
    let mut rescraped = 0;
    for (i, record) in outcome.records.iter().enumerate() {
        let stored_id = storage.upsert_doctorate(record).await?;
        if stored_id != record.id {
            debug!(url = %record.url, id = %stored_id, "already stored, keeping ID");
            rescraped += 1;
        }
        progress.item(&record.title, i + 1, total);
    }

    let stats = ScrapeJobStats {
        scrape: outcome.stats,
        rescraped,
    };
    finish_stage(storage, "scrape", job_id, start, &stats, progress).await
}

/// Download the PDFs of the selected records.
///
/// Records already cleaned are left alone.
#[instrument(skip_all, fields(selection = ?selection))]
pub async fn download(
    storage: &Storage,
    config: &DownloadConfig,
    selection: Selection,
    progress: &dyn ProgressReporter,
) -> Result<StageSummary> {
    let start = Instant::now();
    progress.phase("Downloading PDFs");

    let records: Vec<Doctorate> = selection
        .load(storage)
        .await?
        .into_iter()
        .filter(|r| r.stage != Stage::Cleaned)
        .collect();

    let job_id = storage.insert_job("download").await?;
    let downloader = Downloader::new(config.clone())?;

    let total = records.len();
    let mut current = 0;
    let reports = downloader
        .download_all(&records, |_| {
            progress.item(&records[current].title, current + 1, total);
            current += 1;
        })
        .await;

    let mut stats = DownloadStats {
        records: total,
        ..DownloadStats::default()
    };

    for (record, report) in records.iter().zip(&reports) {
        match &report.outcome {
            DownloadOutcome::Downloaded { sha256, bytes } => {
                stats.downloaded += 1;
                stats.bytes += bytes;
                storage.set_pdf_hash(record.id, sha256).await?;
                advance(storage, record, Stage::Downloaded).await?;
            }
            DownloadOutcome::AlreadyPresent { sha256 } => {
                stats.already_present += 1;
                if record.pdf_sha256.as_deref() != Some(sha256.as_str()) {
                    storage.set_pdf_hash(record.id, sha256).await?;
                }
                advance(storage, record, Stage::Downloaded).await?;
            }
            DownloadOutcome::AlreadyExtracted => {
                stats.already_extracted += 1;
                advance(storage, record, Stage::Extracted).await?;
            }
            DownloadOutcome::Failed { reason } => {
                stats.failed += 1;
                fail(storage, record.id, reason).await?;
            }
        }
    }

    finish_stage(storage, "download", job_id, start, &stats, progress).await
}

/// Run GROBID over the selected records' PDFs.
///
/// Fails up front when the server is not ready. Cleaned records are skipped,
/// and so are failed ones unless their PDF is still on disk (a GROBID error
/// keeps the PDF, so the next run retries it).
#[instrument(skip_all, fields(selection = ?selection, grobid = %config.url))]
pub async fn extract(
    storage: &Storage,
    config: &GrobidConfig,
    data_dir: &Path,
    selection: Selection,
    progress: &dyn ProgressReporter,
) -> Result<StageSummary> {
    let start = Instant::now();
    progress.phase("Extracting fulltext");

    let extractor = Extractor::new(GrobidClient::new(config.clone())?, data_dir);
    extractor.ensure_alive().await?;

    let records: Vec<Doctorate> = selection
        .load(storage)
        .await?
        .into_iter()
        .filter(|r| match r.stage {
            Stage::Cleaned => false,
            Stage::Failed => DocPaths::new(data_dir, &r.title).pdf.exists(),
            _ => true,
        })
        .collect();

    let job_id = storage.insert_job("extract").await?;

    let total = records.len();
    let mut current = 0;
    let reports = extractor
        .extract_all(&records, |_| {
            progress.item(&records[current].title, current + 1, total);
            current += 1;
        })
        .await;

    let mut stats = ExtractStats {
        records: total,
        ..ExtractStats::default()
    };

    for (record, report) in records.iter().zip(&reports) {
        match &report.outcome {
            ExtractOutcome::Extracted { .. } => {
                stats.extracted += 1;
                advance(storage, record, Stage::Extracted).await?;
            }
            ExtractOutcome::AlreadyExtracted => {
                stats.already_extracted += 1;
                advance(storage, record, Stage::Extracted).await?;
            }
            ExtractOutcome::InvalidPdf { reason } => {
                stats.invalid_pdf += 1;
                fail(storage, record.id, reason).await?;
            }
            ExtractOutcome::Failed { reason } => {
                stats.failed += 1;
                fail(storage, record.id, reason).await?;
            }
        }
    }

    finish_stage(storage, "extract", job_id, start, &stats, progress).await
}

/// Clean the TEI of the selected records into plain text.
///
/// Records that already have text are skipped unless `force` is set.
/// Records without a TEI file are counted and left untouched.
#[instrument(skip_all, fields(selection = ?selection, force = force))]
pub async fn clean(
    storage: &Storage,
    config: &CleanConfig,
    data_dir: &Path,
    selection: Selection,
    force: bool,
    progress: &dyn ProgressReporter,
) -> Result<StageSummary> {
    let start = Instant::now();
    progress.phase("Cleaning TEI");

    let records = selection.load(storage).await?;
    let job_id = storage.insert_job("clean").await?;

    let total = records.len();
    let mut stats = CleanStats {
        records: total,
        ..CleanStats::default()
    };

    for (i, record) in records.iter().enumerate() {
        progress.item(&record.title, i + 1, total);

        if !force && record.text.as_deref().is_some_and(|t| !t.is_empty()) {
            stats.skipped_with_text += 1;
            continue;
        }

        let paths = DocPaths::new(data_dir, &record.title);
        let xml = match tokio::fs::read_to_string(&paths.tei).await {
            Ok(xml) => xml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(id = %record.id, "no TEI file");
                stats.missing_tei += 1;
                continue;
            }
            Err(e) => {
                stats.failed += 1;
                fail(storage, record.id, &HarvestError::io(&paths.tei, e).to_string()).await?;
                continue;
            }
        };

        let clean_config = config.clone();
        let result = match tokio::task::spawn_blocking(move || clean_tei(&xml, &clean_config)).await {
            Ok(result) => result,
            Err(e) => {
                stats.failed += 1;
                fail(storage, record.id, &format!("cleanup task failed: {e}")).await?;
                continue;
            }
        };

        if result.is_empty() {
            stats.empty += 1;
            storage.set_text(record.id, None).await?;
            fail(storage, record.id, "no text left after cleanup").await?;
            continue;
        }

        stats.cleaned += 1;
        stats.words += result.word_count();
        storage.set_text(record.id, Some(&result.text)).await?;
        storage.set_stage(record.id, Stage::Cleaned, None).await?;
    }

    finish_stage(storage, "clean", job_id, start, &stats, progress).await
}

/// Run every stage in order: scrape, download, extract, clean.
#[instrument(skip_all, fields(selection = ?selection))]
pub async fn harvest(
    storage: &Storage,
    config: &HarvestConfig,
    selection: Selection,
    progress: &dyn ProgressReporter,
) -> Result<Vec<StageSummary>> {
    let start = Instant::now();
    let data_dir = config.download.data_dir.as_path();

    let summaries = vec![
        scrape(storage, &config.scrape, progress).await?,
        download(storage, &config.download, selection, progress).await?,
        extract(storage, &config.grobid, data_dir, selection, progress).await?,
        clean(storage, &config.clean, data_dir, selection, false, progress).await?,
    ];

    info!(elapsed_ms = start.elapsed().as_millis(), "harvest complete");
    Ok(summaries)
}
