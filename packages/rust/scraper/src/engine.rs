//! Paginating scraper for the portal's search-result listings.
//!
//! Each configured source is a listing URL. The scraper walks its pages by
//! bumping the `pn` query parameter, re-fetches pages that failed or came
//! back with broken rows, and turns accepted entries into fresh
//! [`Doctorate`] records.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use phdharvest_shared::{Doctorate, DoctorateId, HarvestError, Result, ScrapeConfig, Source};

use crate::license::LicenseFilter;
use crate::listing::{ListingEntry, ListingPage, Pager, parse_listing};

/// User-Agent string for portal requests.
const USER_AGENT: &str = concat!("phdharvest/", env!("CARGO_PKG_VERSION"));

/// Query parameter carrying the 1-based page number.
const PAGE_PARAM: &str = "pn";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Counters for one scrape run, summed over all sources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeStats {
    /// Listing pages accepted (after retries).
    pub pages: usize,
    /// Intact entries seen on accepted pages.
    pub entries: usize,
    /// Records produced.
    pub added: usize,
    /// Entries without a downloadable file.
    pub without_file: usize,
    /// Entries rejected by the license filter.
    pub filtered: usize,
    /// Entries whose URL was already produced earlier in this run.
    pub duplicates: usize,
    /// Page re-fetches.
    pub retries: usize,
    /// Errors that stopped a source (URL, message).
    pub errors: Vec<(String, String)>,
}

/// Records and counters from a scrape run.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOutcome {
    pub records: Vec<Doctorate>,
    pub stats: ScrapeStats,
}

// ---------------------------------------------------------------------------
// PortalScraper
// ---------------------------------------------------------------------------

/// Scraper over the configured listing sources.
pub struct PortalScraper {
    config: ScrapeConfig,
    client: Client,
    filter: LicenseFilter,
}

impl PortalScraper {
    pub fn new(config: ScrapeConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        let filter = LicenseFilter::new(&config.allowed_licenses);

        Ok(Self {
            config,
            client,
            filter,
        })
    }

    /// Scrape every source, numbering new records from `first_id`.
    ///
    /// A source that cannot be fetched is recorded in the stats and skipped;
    /// the run itself only fails on setup errors.
    #[instrument(skip_all, fields(sources = self.config.sources.len(), first_id = %first_id))]
    pub async fn scrape(&self, first_id: DoctorateId) -> Result<ScrapeOutcome> {
        let start_time = std::time::Instant::now();
        let mut outcome = ScrapeOutcome::default();
        let mut run = RunState {
            next_id: first_id.0,
            seen: HashSet::new(),
        };

        info!(
            max_pages = ?self.config.max_pages,
            max_page_retries = self.config.max_page_retries,
            page_delay_ms = self.config.page_delay_ms,
            licenses = self.config.allowed_licenses.len(),
            "starting scrape"
        );

        for source in &self.config.sources {
            self.scrape_source(source, &mut run, &mut outcome).await;
        }

        let stats = &outcome.stats;
        info!(
            pages = stats.pages,
            entries = stats.entries,
            added = stats.added,
            without_file = stats.without_file,
            filtered = stats.filtered,
            retries = stats.retries,
            errors = stats.errors.len(),
            duration_ms = start_time.elapsed().as_millis(),
            "scrape completed"
        );

        Ok(outcome)
    }

    #[instrument(skip_all, fields(license = %source.license))]
    async fn scrape_source(&self, source: &Source, run: &mut RunState, outcome: &mut ScrapeOutcome) {
        let start_url = match Url::parse(&source.url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %source.url, error = %e, "invalid source URL");
                outcome
                    .stats
                    .errors
                    .push((source.url.clone(), format!("invalid URL: {e}")));
                return;
            }
        };

        let mut pn = page_number(&start_url);
        let mut pages_scraped: u32 = 0;

        loop {
            if self.config.max_pages.is_some_and(|max| pages_scraped >= max) {
                info!(pages_scraped, "max_pages reached");
                break;
            }
            if pages_scraped > 0 {
                self.pause().await;
            }

            let page_url = with_page_number(&start_url, pn);

            let page = match self.load_page(&page_url, &mut outcome.stats).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(url = %page_url, error = %e, "giving up on source");
                    outcome.stats.errors.push((page_url.to_string(), e.to_string()));
                    break;
                }
            };

            pages_scraped += 1;
            outcome.stats.pages += 1;

            if page.entries.is_empty() {
                info!(pn, "page has no entries, source done");
                break;
            }

            self.commit_page(source, page.entries, run, outcome);

            match page.pager {
                Pager::Next => {}
                Pager::Last => {
                    debug!(pn, "last page reached");
                    break;
                }
                Pager::Missing => {
                    debug!(pn, "no pager on page");
                    break;
                }
            }

            pn += 1;
        }
    }

    /// Fetch and parse a page, re-fetching on failure or broken rows.
    ///
    /// When every attempt had broken rows, the attempt with the fewest broken
    /// rows is accepted. An error is returned only when no attempt produced a
    /// page at all.
    async fn load_page(&self, url: &Url, stats: &mut ScrapeStats) -> Result<ListingPage> {
        let attempts = self.config.max_page_retries + 1;
        let mut best: Option<ListingPage> = None;
        let mut last_error: Option<HarvestError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                stats.retries += 1;
                self.pause().await;
            }

            match fetch_listing(&self.client, url).await {
                Ok(body) => {
                    let page = parse_listing(&body, url);
                    if page.is_complete() {
                        return Ok(page);
                    }
                    warn!(%url, attempt, broken = page.broken, "page has broken entries");
                    if best.as_ref().is_none_or(|b| page.broken < b.broken) {
                        best = Some(page);
                    }
                }
                Err(e) => {
                    warn!(%url, attempt, error = %e, "page fetch failed");
                    last_error = Some(e);
                }
            }
        }

        match best {
            Some(page) => {
                warn!(
                    %url,
                    broken = page.broken,
                    intact = page.entries.len(),
                    "retries exhausted, accepting intact entries"
                );
                Ok(page)
            }
            None => Err(last_error
                .unwrap_or_else(|| HarvestError::Network(format!("{url}: no attempts made")))),
        }
    }

    /// Turn a page's entries into records.
    fn commit_page(
        &self,
        source: &Source,
        entries: Vec<ListingEntry>,
        run: &mut RunState,
        outcome: &mut ScrapeOutcome,
    ) {
        let stats = &mut outcome.stats;
        stats.entries += entries.len();

        for entry in entries {
            let Some(file_url) = entry.file_url else {
                debug!(url = %entry.url, "entry has no file");
                stats.without_file += 1;
                continue;
            };

            let license = entry.license.unwrap_or_else(|| source.license.clone());
            if !self.filter.accepts(&license) {
                debug!(url = %entry.url, %license, "license filtered out");
                stats.filtered += 1;
                continue;
            }

            if !run.seen.insert(entry.url.clone()) {
                stats.duplicates += 1;
                continue;
            }

            let id = DoctorateId(run.next_id);
            run.next_id += 1;

            outcome
                .records
                .push(Doctorate::scraped(id, entry.title, entry.url, license, file_url));
            stats.added += 1;
        }
    }

    async fn pause(&self) {
        if self.config.page_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.page_delay_ms)).await;
        }
    }
}

/// Mutable state shared across sources within one run.
struct RunState {
    next_id: i64,
    seen: HashSet<String>,
}

// ---------------------------------------------------------------------------
// Fetching and URLs
// ---------------------------------------------------------------------------

async fn fetch_listing(client: &Client, url: &Url) -> Result<String> {
    debug!(%url, "fetching listing page");

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::Network(format!("{url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| HarvestError::Network(format!("{url}: body read failed: {e}")))
}

/// The page number in the URL's `pn` parameter, defaulting to 1.
pub fn page_number(url: &Url) -> u32 {
    url.query_pairs()
        .find(|(k, _)| k == PAGE_PARAM)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(1)
}

/// `url` with its `pn` parameter set to `pn`, other parameters untouched.
pub fn with_page_number(url: &Url, pn: u32) -> Url {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    match pairs.iter_mut().find(|(k, _)| k == PAGE_PARAM) {
        Some(pair) => pair.1 = pn.to_string(),
        None => pairs.push((PAGE_PARAM.to_string(), pn.to_string())),
    }

    let mut out = url.clone();
    out.query_pairs_mut().clear().extend_pairs(pairs);
    out
}

#[cfg(test)]
mod scraper_tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LISTING_PATH: &str = "/globalResultList.seam";

    fn entry(n: u32, license: Option<&str>, with_file: bool) -> String {
        let tooltip = license
            .map(|l| {
                format!(
                    r#"<span class="fileInfoTooltip"><div class="ui-tooltip-text"><span>{l}</span></div></span>"#
                )
            })
            .unwrap_or_default();
        let file = if with_file {
            format!(r#"<a class="fileDownloadLink" href="/docstore/{n}/doc.pdf">PDF</a>"#)
        } else {
            String::new()
        };
        format!(
            r#"<div class="entities-table-row"><div class="entity-row-title"><a href="/info/phd/{n}/">Praca {n}</a></div>{tooltip}{file}</div>"#
        )
    }

    fn broken_entry() -> String {
        r#"<div class="entities-table-row"><div class="entity-row-title"></div></div>"#.to_string()
    }

    fn listing(entries: &[String], last: bool) -> String {
        let class = if last {
            "ui-paginator-next ui-state-default ui-state-disabled"
        } else {
            "ui-paginator-next ui-state-default"
        };
        format!(
            r##"<html><body><div class="results">{}</div><div class="ui-paginator"><a class="{class}" href="#">next</a></div></body></html>"##,
            entries.join("")
        )
    }

    fn config(server: &MockServer) -> ScrapeConfig {
        ScrapeConfig {
            sources: vec![Source {
                license: "open access".into(),
                url: format!("{}{LISTING_PATH}?r=phd&lang=pl&pn=1", server.uri()),
            }],
            allowed_licenses: vec![],
            max_pages: None,
            max_page_retries: 2,
            page_delay_ms: 0,
            timeout_secs: 5,
        }
    }

    async fn mount_page(server: &MockServer, pn: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("pn", pn))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_page_number_defaults_to_one() {
        let url = Url::parse("https://ppm.edu.pl/globalResultList.seam?r=phd").unwrap();
        assert_eq!(page_number(&url), 1);
        let url = Url::parse("https://ppm.edu.pl/globalResultList.seam?r=phd&pn=7").unwrap();
        assert_eq!(page_number(&url), 7);
    }

    #[test]
    fn test_with_page_number_keeps_other_params() {
        let url = Url::parse("https://ppm.edu.pl/globalResultList.seam?q=&r=phd&pn=1&lang=pl").unwrap();
        let next = with_page_number(&url, 2);
        assert_eq!(
            next.as_str(),
            "https://ppm.edu.pl/globalResultList.seam?q=&r=phd&pn=2&lang=pl"
        );

        let bare = Url::parse("https://ppm.edu.pl/globalResultList.seam?r=phd").unwrap();
        assert_eq!(
            with_page_number(&bare, 3).as_str(),
            "https://ppm.edu.pl/globalResultList.seam?r=phd&pn=3"
        );
    }

    #[tokio::test]
    async fn test_scrape_walks_pages_until_last() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "1",
            listing(&[entry(1, None, true), entry(2, None, false)], false),
        )
        .await;
        mount_page(&server, "2", listing(&[entry(3, Some("CC BY 4.0"), true)], true)).await;

        let scraper = PortalScraper::new(config(&server)).unwrap();
        let outcome = scraper.scrape(DoctorateId(10)).await.unwrap();

        assert_eq!(outcome.stats.pages, 2);
        assert_eq!(outcome.stats.entries, 3);
        assert_eq!(outcome.stats.added, 2);
        assert_eq!(outcome.stats.without_file, 1);
        assert!(outcome.stats.errors.is_empty());

        let ids: Vec<i64> = outcome.records.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![10, 11]);
        assert_eq!(outcome.records[0].license, "open access");
        assert_eq!(outcome.records[1].license, "CC BY 4.0");
        assert_eq!(
            outcome.records[1].file_url,
            format!("{}/docstore/3/doc.pdf", server.uri())
        );
    }

    #[tokio::test]
    async fn test_scrape_applies_license_filter() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "1",
            listing(
                &[
                    entry(1, Some("CC BY 4.0"), true),
                    entry(2, Some("CC BY-NC-ND 4.0"), true),
                ],
                true,
            ),
        )
        .await;

        let mut cfg = config(&server);
        cfg.allowed_licenses = vec!["cc by 4.0".into()];
        let outcome = PortalScraper::new(cfg).unwrap().scrape(DoctorateId(0)).await.unwrap();

        assert_eq!(outcome.stats.added, 1);
        assert_eq!(outcome.stats.filtered, 1);
        assert_eq!(outcome.records[0].title, "Praca 1");
    }

    #[tokio::test]
    async fn test_scrape_respects_max_pages() {
        let server = MockServer::start().await;
        mount_page(&server, "1", listing(&[entry(1, None, true)], false)).await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("pn", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[], true)))
            .expect(0)
            .mount(&server)
            .await;

        let mut cfg = config(&server);
        cfg.max_pages = Some(1);
        let outcome = PortalScraper::new(cfg).unwrap().scrape(DoctorateId(0)).await.unwrap();
        assert_eq!(outcome.stats.pages, 1);
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_scrape_zero_max_pages_fetches_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[], true)))
            .expect(0)
            .mount(&server)
            .await;

        let mut cfg = config(&server);
        cfg.max_pages = Some(0);
        let outcome = PortalScraper::new(cfg).unwrap().scrape(DoctorateId(0)).await.unwrap();
        assert_eq!(outcome.stats.pages, 0);
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn test_scrape_stops_on_empty_page() {
        let server = MockServer::start().await;
        mount_page(&server, "1", listing(&[entry(1, None, true)], false)).await;
        mount_page(&server, "2", listing(&[], false)).await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("pn", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[entry(3, None, true)], true)))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = PortalScraper::new(config(&server))
            .unwrap()
            .scrape(DoctorateId(0))
            .await
            .unwrap();
        assert_eq!(outcome.stats.pages, 2);
        assert_eq!(outcome.stats.added, 1);
        assert!(outcome.stats.errors.is_empty());
    }

    #[tokio::test]
    async fn test_scrape_stops_when_pager_missing() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "1",
            format!("<html><body><div class=\"results\">{}</div></body></html>", entry(1, None, true)),
        )
        .await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("pn", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[entry(2, None, true)], true)))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = PortalScraper::new(config(&server))
            .unwrap()
            .scrape(DoctorateId(0))
            .await
            .unwrap();
        assert_eq!(outcome.stats.pages, 1);
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_broken_page_is_refetched_and_replaced() {
        let server = MockServer::start().await;

        // First attempt: one intact entry and one broken row
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("pn", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(listing(&[entry(1, None, true), broken_entry()], true)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        // Second attempt: both rows intact
        mount_page(
            &server,
            "1",
            listing(&[entry(1, None, true), entry(2, None, true)], true),
        )
        .await;

        let outcome = PortalScraper::new(config(&server))
            .unwrap()
            .scrape(DoctorateId(0))
            .await
            .unwrap();

        assert_eq!(outcome.stats.retries, 1);
        assert_eq!(outcome.stats.pages, 1);
        // Entry 1 is not committed twice
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.stats.entries, 2);
    }

    #[tokio::test]
    async fn test_persistently_broken_page_keeps_intact_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("pn", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(listing(&[entry(1, None, true), broken_entry()], true)),
            )
            .expect(3)
            .mount(&server)
            .await;

        let outcome = PortalScraper::new(config(&server))
            .unwrap()
            .scrape(DoctorateId(0))
            .await
            .unwrap();

        assert_eq!(outcome.stats.retries, 2);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.stats.errors.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_stops_source() {
        let server = MockServer::start().await;
        mount_page(&server, "1", listing(&[entry(1, None, true)], false)).await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("pn", "2"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = PortalScraper::new(config(&server))
            .unwrap()
            .scrape(DoctorateId(0))
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.stats.pages, 1);
        assert_eq!(outcome.stats.errors.len(), 1);
        assert!(outcome.stats.errors[0].0.contains("pn=2"));
        assert!(outcome.stats.errors[0].1.contains("500"));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("pn", "1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_page(&server, "1", listing(&[entry(1, None, true)], true)).await;

        let outcome = PortalScraper::new(config(&server))
            .unwrap()
            .scrape(DoctorateId(0))
            .await
            .unwrap();
        assert_eq!(outcome.stats.retries, 1);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.stats.errors.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_urls_across_sources() {
        let server = MockServer::start().await;
        mount_page(&server, "1", listing(&[entry(1, None, true)], true)).await;

        let mut cfg = config(&server);
        let again = cfg.sources[0].clone();
        cfg.sources.push(again);

        let outcome = PortalScraper::new(cfg).unwrap().scrape(DoctorateId(0)).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.stats.duplicates, 1);
    }

    #[tokio::test]
    async fn test_invalid_source_url_is_recorded() {
        let cfg = ScrapeConfig {
            sources: vec![Source {
                license: "x".into(),
                url: "not a url".into(),
            }],
            allowed_licenses: vec![],
            max_pages: None,
            max_page_retries: 0,
            page_delay_ms: 0,
            timeout_secs: 5,
        };
        let outcome = PortalScraper::new(cfg).unwrap().scrape(DoctorateId(0)).await.unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.stats.errors.len(), 1);
    }
}
