//! Application configuration for phdharvest.
//!
//! User config lives at `~/.phdharvest/phdharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::types::Source;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "phdharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".phdharvest";

/// Open-access doctorates with an attached file, 100 per page.
const DEFAULT_SOURCE_URL: &str = "https://ppm.edu.pl/globalResultList.seam?r=phd&tab=PHD&lang=pl&qp=openAccess%253Dtrue%2526author%253Aauthor%253D%2526hasFileAttached%253Dtrue%2526date1%253D%2526date2%253D&pn=1&p=top&ps=100";

// ---------------------------------------------------------------------------
// Config structs (matching phdharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Listing-page scraping behavior.
    #[serde(default)]
    pub portal: PortalSection,

    /// PDF download behavior.
    #[serde(default)]
    pub download: DownloadSection,

    /// GROBID service settings.
    #[serde(default)]
    pub grobid: GrobidSection,

    /// TEI cleanup settings.
    #[serde(default)]
    pub cleaning: CleaningSection,

    /// License-filtered listing URLs to scrape.
    #[serde(default = "default_sources")]
    pub sources: Vec<Source>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            portal: PortalSection::default(),
            download: DownloadSection::default(),
            grobid: GrobidSection::default(),
            cleaning: CleaningSection::default(),
            sources: default_sources(),
        }
    }
}

fn default_sources() -> Vec<Source> {
    vec![Source {
        license: "open access".into(),
        url: DEFAULT_SOURCE_URL.into(),
    }]
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the harvest database.
    #[serde(default = "default_database")]
    pub database: String,

    /// Working directory holding one sub-directory per thesis (PDF + TEI).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Number of records per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            data_dir: default_data_dir(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_database() -> String {
    "var/phdharvest.db".into()
}
fn default_data_dir() -> String {
    "var/doct".into()
}
fn default_batch_size() -> u32 {
    250
}

/// `[portal]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSection {
    /// Stop each source after this many pages (unset: follow the pager to the end).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,

    /// Extra attempts for a page that fails to load or parses incompletely.
    #[serde(default = "default_page_retries")]
    pub max_page_retries: u32,

    /// Delay between page requests, in ms.
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,

    /// HTTP timeout for listing pages, in seconds.
    #[serde(default = "default_portal_timeout")]
    pub timeout_secs: u64,

    /// Accepted license labels (empty: accept all).
    #[serde(default)]
    pub allowed_licenses: Vec<String>,
}

impl Default for PortalSection {
    fn default() -> Self {
        Self {
            max_pages: None,
            max_page_retries: default_page_retries(),
            page_delay_ms: default_page_delay(),
            timeout_secs: default_portal_timeout(),
            allowed_licenses: Vec::new(),
        }
    }
}

fn default_page_retries() -> u32 {
    3
}
fn default_page_delay() -> u64 {
    2000
}
fn default_portal_timeout() -> u64 {
    60
}

/// `[download]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSection {
    /// Maximum concurrent downloads.
    #[serde(default = "default_download_concurrency")]
    pub concurrency: u32,

    /// Attempts per file before giving up.
    #[serde(default = "default_download_attempts")]
    pub max_attempts: u32,

    /// HTTP timeout per download, in seconds.
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            concurrency: default_download_concurrency(),
            max_attempts: default_download_attempts(),
            timeout_secs: default_download_timeout(),
        }
    }
}

fn default_download_concurrency() -> u32 {
    8
}
fn default_download_attempts() -> u32 {
    5
}
fn default_download_timeout() -> u64 {
    60
}

/// `[grobid]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrobidSection {
    /// Base URL of the GROBID service.
    #[serde(default = "default_grobid_url")]
    pub url: String,

    /// HTTP timeout per document, in seconds.
    #[serde(default = "default_grobid_timeout")]
    pub timeout_secs: u64,

    /// Maximum documents in flight.
    #[serde(default = "default_grobid_concurrency")]
    pub concurrency: u32,

    /// Attempts per document while the service reports it is busy.
    #[serde(default = "default_grobid_attempts")]
    pub max_attempts: u32,

    /// Back-off after a 503 response, in ms.
    #[serde(default = "default_busy_retry")]
    pub busy_retry_ms: u64,

    #[serde(default)]
    pub consolidate_header: bool,

    #[serde(default)]
    pub consolidate_citations: bool,
}

impl Default for GrobidSection {
    fn default() -> Self {
        Self {
            url: default_grobid_url(),
            timeout_secs: default_grobid_timeout(),
            concurrency: default_grobid_concurrency(),
            max_attempts: default_grobid_attempts(),
            busy_retry_ms: default_busy_retry(),
            consolidate_header: false,
            consolidate_citations: false,
        }
    }
}

fn default_grobid_url() -> String {
    "http://localhost:8070".into()
}
fn default_grobid_timeout() -> u64 {
    300
}
fn default_grobid_concurrency() -> u32 {
    4
}
fn default_grobid_attempts() -> u32 {
    5
}
fn default_busy_retry() -> u64 {
    2000
}

/// `[cleaning]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningSection {
    /// Drop "Spis treści" divisions.
    #[serde(default = "default_true")]
    pub drop_table_of_contents: bool,

    /// Drop paragraphs starting with "Tabela" up to the end of their division.
    #[serde(default = "default_true")]
    pub drop_tables: bool,

    /// Reject sentences whose digit share exceeds this ratio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_digit_ratio: Option<f64>,

    /// Reject sentences with fewer words than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_sentence_words: Option<usize>,
}

impl Default for CleaningSection {
    fn default() -> Self {
        Self {
            drop_table_of_contents: true,
            drop_tables: true,
            max_digit_ratio: None,
            min_sentence_words: None,
        }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime scrape configuration.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub sources: Vec<Source>,
    pub allowed_licenses: Vec<String>,
    pub max_pages: Option<u32>,
    pub max_page_retries: u32,
    pub page_delay_ms: u64,
    pub timeout_secs: u64,
}

impl From<&AppConfig> for ScrapeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            sources: config.sources.clone(),
            allowed_licenses: config.portal.allowed_licenses.clone(),
            max_pages: config.portal.max_pages,
            max_page_retries: config.portal.max_page_retries,
            page_delay_ms: config.portal.page_delay_ms,
            timeout_secs: config.portal.timeout_secs,
        }
    }
}

/// Runtime download configuration.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub data_dir: PathBuf,
    pub concurrency: u32,
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

impl From<&AppConfig> for DownloadConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            data_dir: PathBuf::from(&config.defaults.data_dir),
            concurrency: config.download.concurrency,
            max_attempts: config.download.max_attempts,
            timeout_secs: config.download.timeout_secs,
        }
    }
}

/// Runtime GROBID configuration.
#[derive(Debug, Clone)]
pub struct GrobidConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub concurrency: u32,
    pub max_attempts: u32,
    pub busy_retry_ms: u64,
    pub consolidate_header: bool,
    pub consolidate_citations: bool,
}

impl From<&AppConfig> for GrobidConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            url: config.grobid.url.trim_end_matches('/').to_string(),
            timeout_secs: config.grobid.timeout_secs,
            concurrency: config.grobid.concurrency,
            max_attempts: config.grobid.max_attempts,
            busy_retry_ms: config.grobid.busy_retry_ms,
            consolidate_header: config.grobid.consolidate_header,
            consolidate_citations: config.grobid.consolidate_citations,
        }
    }
}

/// Runtime TEI cleanup configuration.
#[derive(Debug, Clone)]
pub struct CleanConfig {
    pub drop_table_of_contents: bool,
    pub drop_tables: bool,
    pub max_digit_ratio: Option<f64>,
    pub min_sentence_words: Option<usize>,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CleanConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            drop_table_of_contents: config.cleaning.drop_table_of_contents,
            drop_tables: config.cleaning.drop_tables,
            max_digit_ratio: config.cleaning.max_digit_ratio,
            min_sentence_words: config.cleaning.min_sentence_words,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.phdharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.phdharvest/phdharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))?;

    validate(&config)?;
    Ok(config)
}

/// Reject values that would make a stage spin or stall.
fn validate(config: &AppConfig) -> Result<()> {
    if config.defaults.batch_size == 0 {
        return Err(HarvestError::config("defaults.batch_size must be at least 1"));
    }
    if config.portal.max_pages == Some(0) {
        return Err(HarvestError::config("portal.max_pages must be at least 1 when set"));
    }
    if config.download.concurrency == 0 || config.grobid.concurrency == 0 {
        return Err(HarvestError::config("concurrency must be at least 1"));
    }
    if config.download.max_attempts == 0 || config.grobid.max_attempts == 0 {
        return Err(HarvestError::config("max_attempts must be at least 1"));
    }
    if let Some(ratio) = config.cleaning.max_digit_ratio {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(HarvestError::config(format!(
                "cleaning.max_digit_ratio must be within 0..=1, got {ratio}"
            )));
        }
    }
    for source in &config.sources {
        url::Url::parse(&source.url).map_err(|e| {
            HarvestError::config(format!("invalid source URL '{}': {e}", source.url))
        })?;
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    init_config_at(&config_file_path()?)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| HarvestError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| HarvestError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("localhost:8070"));
        assert!(toml_str.contains("[[sources]]"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.batch_size, 250);
        assert_eq!(parsed.download.max_attempts, 5);
        assert_eq!(parsed.sources.len(), 1);
        assert!(parsed.portal.max_pages.is_none());
    }

    #[test]
    fn config_with_sources() {
        let toml_str = r#"
[portal]
max_pages = 5
allowed_licenses = ["CC BY", "CC BY-SA"]

[[sources]]
license = "CC BY"
url = "https://ppm.edu.pl/globalResultList.seam?r=phd&pn=1"

[[sources]]
license = "CC BY-SA"
url = "https://ppm.edu.pl/globalResultList.seam?r=phd&pn=1&lic=sa"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].license, "CC BY-SA");

        let scrape = ScrapeConfig::from(&config);
        assert_eq!(scrape.max_pages, Some(5));
        assert_eq!(scrape.max_page_retries, 3);
        assert_eq!(scrape.allowed_licenses.len(), 2);
    }

    #[test]
    fn runtime_configs_from_app_config() {
        let mut app = AppConfig::default();
        app.grobid.url = "http://grobid:8070/".into();

        let grobid = GrobidConfig::from(&app);
        assert_eq!(grobid.url, "http://grobid:8070");
        assert_eq!(grobid.concurrency, 4);

        let download = DownloadConfig::from(&app);
        assert_eq!(download.data_dir, PathBuf::from("var/doct"));

        let clean = CleanConfig::from(&app);
        assert!(clean.drop_tables);
        assert!(clean.max_digit_ratio.is_none());
    }

    #[test]
    fn load_rejects_bad_ratio() {
        let path = std::env::temp_dir().join(format!(
            "phdharvest-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[cleaning]\nmax_digit_ratio = 1.5\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("max_digit_ratio"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_rejects_zero_max_pages() {
        let path = std::env::temp_dir().join(format!(
            "phdharvest-config-max-pages-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[portal]\nmax_pages = 0\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("max_pages"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn init_then_load() {
        let dir = std::env::temp_dir().join(format!("phdharvest-init-{}", std::process::id()));
        let path = init_config_at(&dir.join("phdharvest.toml")).expect("init");
        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.defaults.database, "var/phdharvest.db");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
