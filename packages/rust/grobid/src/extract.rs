//! Extraction stage: turn each downloaded PDF into a GROBID TEI file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use phdharvest_downloader::{DocPaths, is_pdf_valid};
use phdharvest_shared::{Doctorate, DoctorateId, HarvestError, Result};

use crate::client::GrobidClient;

/// What happened to one record during extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// A TEI file was already on disk.
    AlreadyExtracted,
    /// GROBID produced a TEI file of `bytes` bytes.
    Extracted { bytes: usize },
    /// The PDF was missing or unreadable; the record's directory was removed.
    InvalidPdf { reason: String },
    /// GROBID or the filesystem failed; the PDF is kept for a later run.
    Failed { reason: String },
}

impl ExtractOutcome {
    /// Whether the record has a usable TEI file after this outcome.
    pub fn has_tei(&self) -> bool {
        matches!(self, Self::AlreadyExtracted | Self::Extracted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AlreadyExtracted => "already_extracted",
            Self::Extracted { .. } => "extracted",
            Self::InvalidPdf { .. } => "invalid_pdf",
            Self::Failed { .. } => "failed",
        }
    }

    /// Failure message, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::InvalidPdf { reason } | Self::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Outcome for one record plus its file locations.
#[derive(Debug, Clone)]
pub struct ExtractReport {
    pub id: DoctorateId,
    pub paths: DocPaths,
    pub outcome: ExtractOutcome,
}

/// Runs GROBID over the PDFs in the data directory.
#[derive(Clone)]
pub struct Extractor {
    client: GrobidClient,
    data_dir: Arc<PathBuf>,
}

impl Extractor {
    pub fn new(client: GrobidClient, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            data_dir: Arc::new(data_dir.into()),
        }
    }

    pub fn client(&self) -> &GrobidClient {
        &self.client
    }

    pub fn paths_for(&self, record: &Doctorate) -> DocPaths {
        DocPaths::new(self.data_dir.as_path(), &record.title)
    }

    /// Fail fast when the server is not reachable or not ready.
    pub async fn ensure_alive(&self) -> Result<()> {
        if self.client.is_alive().await? {
            Ok(())
        } else {
            Err(HarvestError::Extraction(format!(
                "GROBID at {} is not ready",
                self.client.config().url
            )))
        }
    }

    /// Extract every record with GROBID's `concurrency` limit.
    ///
    /// `on_report` is called as each result is collected, in input order.
    #[instrument(skip_all, fields(records = records.len(), concurrency = self.client.config().concurrency))]
    pub async fn extract_all<F>(&self, records: &[Doctorate], mut on_report: F) -> Vec<ExtractReport>
    where
        F: FnMut(&ExtractReport),
    {
        let concurrency = self.client.config().concurrency.max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::with_capacity(records.len());

        for record in records {
            let extractor = self.clone();
            let sem = semaphore.clone();
            let paths = self.paths_for(record);
            let task_paths = paths.clone();
            let id = record.id;

            handles.push((
                record.id,
                paths,
                tokio::spawn(async move {
                    let _permit = sem.acquire().await.expect("semaphore closed");
                    extractor.extract_paths(id, &task_paths).await
                }),
            ));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (id, paths, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => ExtractOutcome::Failed {
                    reason: format!("extraction task failed: {e}"),
                },
            };
            let report = ExtractReport { id, paths, outcome };
            on_report(&report);
            reports.push(report);
        }

        let extracted = reports.iter().filter(|r| r.outcome.has_tei()).count();
        info!(total = reports.len(), extracted, "extraction finished");
        reports
    }

    /// Extract one record.
    pub async fn extract_one(&self, record: &Doctorate) -> ExtractOutcome {
        self.extract_paths(record.id, &self.paths_for(record)).await
    }

    async fn extract_paths(&self, id: DoctorateId, paths: &DocPaths) -> ExtractOutcome {
        if paths.has_tei().await {
            debug!(dir = %paths.dir.display(), "TEI present, skipping");
            return ExtractOutcome::AlreadyExtracted;
        }

        let pdf = match tokio::fs::read(&paths.pdf).await {
            Ok(bytes) if is_pdf_valid(&bytes) => bytes,
            Ok(_) => return discard(paths, "PDF is not valid").await,
            Err(e) => return discard(paths, &format!("PDF missing: {e}")).await,
        };

        let tei = match self.client.process_fulltext(&pdf).await {
            Ok(tei) => tei,
            Err(e) => {
                warn!(dir = %paths.dir.display(), error = %e, "GROBID failed");
                return ExtractOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if let Err(e) = write_tei(paths, id, &tei).await {
            return ExtractOutcome::Failed {
                reason: e.to_string(),
            };
        }

        debug!(dir = %paths.dir.display(), bytes = tei.len(), "TEI written");
        ExtractOutcome::Extracted { bytes: tei.len() }
    }
}

/// Remove a record's directory after its PDF turned out unusable.
async fn discard(paths: &DocPaths, reason: &str) -> ExtractOutcome {
    warn!(dir = %paths.dir.display(), reason, "removing unusable record directory");
    if let Err(e) = remove_dir_if_exists(&paths.dir).await {
        warn!(dir = %paths.dir.display(), error = %e, "failed to remove directory");
    }
    ExtractOutcome::InvalidPdf {
        reason: reason.to_string(),
    }
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HarvestError::io(dir, e)),
    }
}

async fn write_tei(paths: &DocPaths, id: DoctorateId, tei: &str) -> Result<()> {
    let partial = paths.tei_partial(id);
    tokio::fs::write(&partial, tei)
        .await
        .map_err(|e| HarvestError::io(&partial, e))?;
    tokio::fs::rename(&partial, &paths.tei)
        .await
        .map_err(|e| HarvestError::io(&paths.tei, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phdharvest_downloader::testing::sample_pdf;
    use phdharvest_shared::GrobidConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_data_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("phdharvest-{name}-{}", uuid::Uuid::now_v7()))
    }

    fn extractor(server: &MockServer, data_dir: &Path) -> Extractor {
        let client = GrobidClient::new(GrobidConfig {
            url: server.uri(),
            timeout_secs: 5,
            concurrency: 2,
            max_attempts: 2,
            busy_retry_ms: 0,
            consolidate_header: false,
            consolidate_citations: false,
        })
        .unwrap();
        Extractor::new(client, data_dir)
    }

    fn record(id: i64, title: &str) -> Doctorate {
        Doctorate::scraped(
            DoctorateId(id),
            title,
            format!("https://ppm.edu.pl/info/phd/{id}/"),
            "CC BY 4.0",
            format!("https://ppm.edu.pl/docstore/{id}.pdf"),
        )
    }

    fn place_pdf(extractor: &Extractor, rec: &Doctorate, bytes: &[u8]) -> DocPaths {
        let paths = extractor.paths_for(rec);
        std::fs::create_dir_all(&paths.dir).unwrap();
        std::fs::write(&paths.pdf, bytes).unwrap();
        paths
    }

    #[tokio::test]
    async fn writes_tei_next_to_pdf() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/processFulltextDocument"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<TEI><p>x</p></TEI>"))
            .expect(1)
            .mount(&server)
            .await;

        let data_dir = temp_data_dir("ex-ok");
        let ex = extractor(&server, &data_dir);
        let rec = record(1, "Praca pierwsza");
        let paths = place_pdf(&ex, &rec, &sample_pdf(1));

        let outcome = ex.extract_one(&rec).await;
        assert_eq!(outcome, ExtractOutcome::Extracted { bytes: 19 });
        assert_eq!(
            std::fs::read_to_string(&paths.tei).unwrap(),
            "<TEI><p>x</p></TEI>"
        );

        // Second run is a no-op
        assert_eq!(ex.extract_one(&rec).await, ExtractOutcome::AlreadyExtracted);

        let _ = std::fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn invalid_pdf_removes_directory() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<TEI/>"))
            .expect(0)
            .mount(&server)
            .await;

        let data_dir = temp_data_dir("ex-invalid");
        let ex = extractor(&server, &data_dir);
        let rec = record(2, "Zepsuta");
        let paths = place_pdf(&ex, &rec, b"<html>error</html>");

        let outcome = ex.extract_one(&rec).await;
        assert!(matches!(outcome, ExtractOutcome::InvalidPdf { .. }));
        assert!(!paths.dir.exists());

        let _ = std::fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn missing_pdf_is_invalid() {
        let server = MockServer::start().await;
        let data_dir = temp_data_dir("ex-missing");
        let ex = extractor(&server, &data_dir);

        let outcome = ex.extract_one(&record(3, "Brak")).await;
        assert_eq!(outcome.label(), "invalid_pdf");
        assert!(outcome.reason().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn grobid_failure_keeps_pdf() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/processFulltextDocument"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let data_dir = temp_data_dir("ex-fail");
        let ex = extractor(&server, &data_dir);
        let rec = record(4, "Awaria");
        let paths = place_pdf(&ex, &rec, &sample_pdf(1));

        let outcome = ex.extract_one(&rec).await;
        assert!(matches!(outcome, ExtractOutcome::Failed { .. }));
        assert!(paths.pdf.exists());
        assert!(!paths.tei.exists());

        let _ = std::fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn extract_all_reports_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/processFulltextDocument"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<TEI/>"))
            .mount(&server)
            .await;

        let data_dir = temp_data_dir("ex-all");
        let ex = extractor(&server, &data_dir);
        let good = record(5, "Dobra");
        let bad = record(6, "Zła");
        place_pdf(&ex, &good, &sample_pdf(1));

        let mut labels = Vec::new();
        let reports = ex
            .extract_all(&[good, bad], |r| labels.push(r.outcome.label()))
            .await;

        assert_eq!(labels, vec!["extracted", "invalid_pdf"]);
        assert_eq!(reports[0].id, DoctorateId(5));
        assert!(reports[0].paths.tei.exists());

        let _ = std::fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn ensure_alive_reports_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/isalive"))
            .respond_with(ResponseTemplate::new(200).set_body_string("false"))
            .mount(&server)
            .await;

        let ex = extractor(&server, &temp_data_dir("ex-alive"));
        assert!(ex.ensure_alive().await.is_err());
    }

    #[tokio::test]
    async fn shared_title_writes_do_not_collide() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/processFulltextDocument"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<TEI/>")
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .mount(&server)
            .await;

        let data_dir = temp_data_dir("ex-shared-title");
        let ex = extractor(&server, &data_dir);
        let first = record(7, "Ten sam tytuł");
        let second = record(8, "Ten sam tytuł");
        let paths = place_pdf(&ex, &first, &sample_pdf(1));

        let reports = ex.extract_all(&[first, second], |_| {}).await;

        assert!(reports.iter().all(|r| r.outcome.has_tei()), "{reports:?}");
        assert_eq!(std::fs::read_to_string(&paths.tei).unwrap(), "<TEI/>");
        assert!(!paths.tei_partial(DoctorateId(7)).exists());
        assert!(!paths.tei_partial(DoctorateId(8)).exists());

        let _ = std::fs::remove_dir_all(&data_dir);
    }
}
