//! HTTP client for a GROBID server.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};

use phdharvest_shared::{GrobidConfig, HarvestError, Result};

const USER_AGENT: &str = concat!("phdharvest/", env!("CARGO_PKG_VERSION"));

const ISALIVE_PATH: &str = "/api/isalive";
const FULLTEXT_PATH: &str = "/api/processFulltextDocument";

/// Client for the GROBID REST API.
#[derive(Clone)]
pub struct GrobidClient {
    config: GrobidConfig,
    client: Client,
}

impl GrobidClient {
    pub fn new(config: GrobidConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GrobidConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.url.trim_end_matches('/'))
    }

    /// Whether the server answers its liveness probe with `true`.
    ///
    /// Transport failures are errors; a reachable server that is not ready
    /// yields `Ok(false)`.
    pub async fn is_alive(&self) -> Result<bool> {
        let url = self.endpoint(ISALIVE_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: body read failed: {e}")))?;

        Ok(body.trim().eq_ignore_ascii_case("true"))
    }

    /// Run fulltext extraction on a PDF and return the TEI XML.
    ///
    /// A `503` means the server's worker pool is full; the request is retried
    /// after `busy_retry_ms`, up to `max_attempts` requests in total.
    #[instrument(skip_all, fields(pdf_bytes = pdf.len()))]
    pub async fn process_fulltext(&self, pdf: &[u8]) -> Result<String> {
        let url = self.endpoint(FULLTEXT_PATH);
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            let response = self
                .client
                .post(&url)
                .multipart(self.fulltext_form(pdf)?)
                .send()
                .await
                .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

            let status = response.status();
            if status == StatusCode::SERVICE_UNAVAILABLE {
                debug!(attempt, attempts, "GROBID busy");
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(self.config.busy_retry_ms)).await;
                }
                continue;
            }

            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(HarvestError::Extraction(format!(
                    "{url}: HTTP {status}: {}",
                    detail.trim()
                )));
            }

            return response
                .text()
                .await
                .map_err(|e| HarvestError::Network(format!("{url}: body read failed: {e}")));
        }

        warn!(attempts, "GROBID stayed busy");
        Err(HarvestError::Extraction(format!(
            "{url}: server busy after {attempts} attempts"
        )))
    }

    fn fulltext_form(&self, pdf: &[u8]) -> Result<Form> {
        let part = Part::bytes(pdf.to_vec())
            .file_name("doc.pdf")
            .mime_str("application/pdf")
            .map_err(|e| HarvestError::Network(format!("invalid multipart part: {e}")))?;

        Ok(Form::new()
            .part("input", part)
            .text("consolidateHeader", flag(self.config.consolidate_header))
            .text("consolidateCitations", flag(self.config.consolidate_citations)))
    }
}

fn flag(enabled: bool) -> &'static str {
    if enabled { "1" } else { "0" }
}
