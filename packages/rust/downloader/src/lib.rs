//! PDF downloader for scraped thesis records.
//!
//! Each record gets its own directory under the data directory (see
//! [`DocPaths`]). Downloads are validated as PDFs before they land on disk,
//! retried on failure, and fanned out with bounded concurrency.

pub mod paths;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod validate;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use phdharvest_shared::{Doctorate, DoctorateId, DownloadConfig, HarvestError, Result};

pub use paths::{DocPaths, PDF_FILE_NAME, TEI_FILE_NAME, title_to_dir_name};
pub use validate::{is_pdf_valid, pdf_page_count, sha256_hex};

/// User-Agent string for file downloads.
const USER_AGENT: &str = concat!("phdharvest/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The TEI output already exists, the PDF is no longer needed.
    AlreadyExtracted,
    /// A valid PDF was already on disk.
    AlreadyPresent { sha256: String },
    /// The PDF was fetched and written.
    Downloaded { sha256: String, bytes: usize },
    /// Every attempt failed.
    Failed { reason: String },
}

impl DownloadOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Short label for stats and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AlreadyExtracted => "already_extracted",
            Self::AlreadyPresent { .. } => "already_present",
            Self::Downloaded { .. } => "downloaded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Outcome for a record together with where its files live.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub id: DoctorateId,
    pub paths: DocPaths,
    pub outcome: DownloadOutcome,
}

// ---------------------------------------------------------------------------
// Downloader
// ---------------------------------------------------------------------------

/// Fetches thesis PDFs into the data directory.
#[derive(Clone)]
pub struct Downloader {
    config: Arc<DownloadConfig>,
    client: Client,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    /// Paths of a record's working copies.
    pub fn paths_for(&self, record: &Doctorate) -> DocPaths {
        DocPaths::new(&self.config.data_dir, &record.title)
    }

    /// Download every record, at most `concurrency` at a time.
    ///
    /// `on_report` is called for each record as its result is collected.
    /// Reports come back in input order.
    #[instrument(skip_all, fields(records = records.len(), concurrency = self.config.concurrency))]
    pub async fn download_all<F>(&self, records: &[Doctorate], mut on_report: F) -> Vec<DownloadReport>
    where
        F: FnMut(&DownloadReport),
    {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1) as usize));
        let mut handles = Vec::with_capacity(records.len());

        for record in records {
            let downloader = self.clone();
            let sem = semaphore.clone();
            let record = record.clone();
            let id = record.id;
            let paths = self.paths_for(&record);

            handles.push((
                id,
                paths,
                tokio::spawn(async move {
                    let _permit = sem.acquire().await.expect("semaphore closed");
                    downloader.download_one(&record).await
                }),
            ));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (id, paths, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => DownloadOutcome::Failed {
                    reason: format!("download task failed: {e}"),
                },
            };
            let report = DownloadReport { id, paths, outcome };
            on_report(&report);
            reports.push(report);
        }

        let failed = reports.iter().filter(|r| r.outcome.is_failure()).count();
        info!(total = reports.len(), failed, "downloads finished");
        reports
    }

    /// Bring one record's PDF onto disk.
    #[instrument(skip_all, fields(id = %record.id))]
    pub async fn download_one(&self, record: &Doctorate) -> DownloadOutcome {
        let paths = self.paths_for(record);

        if paths.has_tei().await {
            debug!(dir = %paths.dir.display(), "TEI present, skipping download");
            return DownloadOutcome::AlreadyExtracted;
        }

        if let Ok(existing) = tokio::fs::read(&paths.pdf).await {
            if is_pdf_valid(&existing) {
                debug!(dir = %paths.dir.display(), "valid PDF present");
                return DownloadOutcome::AlreadyPresent {
                    sha256: sha256_hex(&existing),
                };
            }
        }

        let attempts = self.config.max_attempts.max(1);
        let mut reason = String::from("no attempts made");

        for attempt in 1..=attempts {
            match fetch_pdf(&self.client, &record.file_url).await {
                Ok(bytes) if is_pdf_valid(&bytes) => {
                    if let Err(e) = write_atomic(&paths, record.id, &bytes).await {
                        warn!(error = %e, "failed to write PDF");
                        return DownloadOutcome::Failed {
                            reason: e.to_string(),
                        };
                    }
                    debug!(attempt, bytes = bytes.len(), "PDF downloaded");
                    return DownloadOutcome::Downloaded {
                        sha256: sha256_hex(&bytes),
                        bytes: bytes.len(),
                    };
                }
                Ok(bytes) => {
                    reason = format!("{}: not a valid PDF ({} bytes)", record.file_url, bytes.len());
                }
                Err(e) => {
                    reason = e.to_string();
                }
            }
            debug!(attempt, attempts, %reason, "download attempt failed");
        }

        warn!(%reason, "download failed");
        DownloadOutcome::Failed { reason }
    }
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------

async fn fetch_pdf(client: &Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::Network(format!("{url}: HTTP {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| HarvestError::Network(format!("{url}: body read failed: {e}")))?;

    Ok(body.to_vec())
}

/// Write the PDF to a temporary file and rename it into place.
async fn write_atomic(paths: &DocPaths, id: DoctorateId, bytes: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(&paths.dir)
        .await
        .map_err(|e| HarvestError::io(&paths.dir, e))?;

    let partial = paths.pdf_partial(id);
    tokio::fs::write(&partial, bytes)
        .await
        .map_err(|e| HarvestError::io(&partial, e))?;
    tokio::fs::rename(&partial, &paths.pdf)
        .await
        .map_err(|e| HarvestError::io(&paths.pdf, e))
}
