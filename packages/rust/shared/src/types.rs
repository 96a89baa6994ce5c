//! Core domain types for harvested doctorates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

// ---------------------------------------------------------------------------
// DoctorateId
// ---------------------------------------------------------------------------

/// Sequential record identifier, assigned by the scraper in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoctorateId(pub i64);

impl std::fmt::Display for DoctorateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DoctorateId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// How far a record has progressed through the harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scraped,
    Downloaded,
    Extracted,
    Cleaned,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scraped => "scraped",
            Stage::Downloaded => "downloaded",
            Stage::Extracted => "extracted",
            Stage::Cleaned => "cleaned",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = HarvestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scraped" => Ok(Stage::Scraped),
            "downloaded" => Ok(Stage::Downloaded),
            "extracted" => Ok(Stage::Extracted),
            "cleaned" => Ok(Stage::Cleaned),
            "failed" => Ok(Stage::Failed),
            other => Err(HarvestError::parse(format!("unknown stage '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Doctorate
// ---------------------------------------------------------------------------

/// A single doctoral thesis as it moves through the harvest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctorate {
    pub id: DoctorateId,
    /// Thesis title as shown on the listing page.
    pub title: String,
    /// Detail page URL on the portal.
    pub url: String,
    /// License label (tooltip text or the source's label).
    pub license: String,
    /// Direct PDF download URL.
    pub file_url: String,
    /// Cleaned fulltext, once the clean stage has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub stage: Stage,
    /// Hex SHA-256 of the downloaded PDF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_sha256: Option<String>,
    /// Message from the most recent failed step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl Doctorate {
    /// A freshly scraped record with no fulltext yet.
    pub fn scraped(
        id: DoctorateId,
        title: impl Into<String>,
        url: impl Into<String>,
        license: impl Into<String>,
        file_url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            url: url.into(),
            license: license.into(),
            file_url: file_url.into(),
            text: None,
            stage: Stage::Scraped,
            pdf_sha256: None,
            last_error: None,
            scraped_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// A listing URL on the portal, pre-filtered to a single license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// License label applied to entries that carry no license tooltip.
    pub license: String,
    /// Search-result listing URL (page number in the `pn` query parameter).
    pub url: String,
}
