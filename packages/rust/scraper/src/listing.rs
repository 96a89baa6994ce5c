//! Parser for the portal's search-result listing pages.
//!
//! A listing page is a PrimeFaces data table: one `.entities-table-row` per
//! thesis, with the title link, an optional license tooltip, and either a
//! direct download link or a multi-file overlay panel. The pager's "next"
//! button tells whether more pages follow.

use scraper::{ElementRef, Html, Selector};
use url::Url;

const ENTRY_SELECTOR: &str = ".entities-table-row";
const TITLE_SELECTOR: &str = ".entity-row-title a";
const LICENSE_SELECTOR: &str = ".fileInfoTooltip .ui-tooltip-text span";
const FILE_LINK_SELECTOR: &str = ".fileDownloadLink";
const OVERLAY_LINK_SELECTOR: &str = "div.filesDownloadPanel a.fileDownloadLink";
const NEXT_SELECTOR: &str = ".ui-paginator-next";

/// Classes of containers whose links only show up inside the overlay.
const OVERLAY_CLASSES: [&str; 2] = ["filesDownloadPanel", "multiFilesDownloadOverlayPanel"];

/// Class PrimeFaces puts on the pager button of the last page.
const DISABLED_CLASS: &str = "ui-state-disabled";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One intact row of the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub title: String,
    /// Detail page URL, resolved against the listing URL.
    pub url: String,
    /// Download URL; `None` when the row has no attached file.
    pub file_url: Option<String>,
    /// License tooltip text, when the row carries one.
    pub license: Option<String>,
}

/// State of the pager's "next" button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pager {
    /// An enabled "next" button: more pages follow.
    Next,
    /// A disabled "next" button: this is the last page.
    Last,
    /// No pager at all.
    Missing,
}

/// Everything extracted from one listing page.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub entries: Vec<ListingEntry>,
    /// Rows that were present but lacked a usable title link.
    pub broken: usize,
    pub pager: Pager,
}

impl ListingPage {
    /// True when every row parsed.
    pub fn is_complete(&self) -> bool {
        self.broken == 0
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a listing page fetched from `page_url`.
pub fn parse_listing(html: &str, page_url: &Url) -> ListingPage {
    let doc = Html::parse_document(html);

    let entry_sel = Selector::parse(ENTRY_SELECTOR).unwrap();

    let mut entries = Vec::new();
    let mut broken = 0;

    for row in doc.select(&entry_sel) {
        match parse_entry(&row, page_url) {
            Some(entry) => entries.push(entry),
            None => broken += 1,
        }
    }

    ListingPage {
        entries,
        broken,
        pager: parse_pager(&doc),
    }
}

/// Parse a single row. Returns `None` when the title link is missing.
fn parse_entry(row: &ElementRef, page_url: &Url) -> Option<ListingEntry> {
    let title_sel = Selector::parse(TITLE_SELECTOR).unwrap();

    let anchor = row.select(&title_sel).next()?;
    let title = normalize_text(&anchor.text().collect::<String>());
    let href = anchor.value().attr("href")?;
    let url = resolve(page_url, href)?;

    if title.is_empty() {
        return None;
    }

    Some(ListingEntry {
        title,
        url,
        file_url: file_link(row, page_url),
        license: license_text(row),
    })
}

/// The row's download link: a direct link first, the overlay panel second.
fn file_link(row: &ElementRef, page_url: &Url) -> Option<String> {
    let link_sel = Selector::parse(FILE_LINK_SELECTOR).unwrap();
    let overlay_sel = Selector::parse(OVERLAY_LINK_SELECTOR).unwrap();

    let direct = row
        .select(&link_sel)
        .filter(|el| !inside_overlay(el))
        .find_map(|el| el.value().attr("href"));

    direct
        .or_else(|| {
            row.select(&overlay_sel)
                .find_map(|el| el.value().attr("href"))
        })
        .and_then(|href| resolve(page_url, href))
}

fn inside_overlay(el: &ElementRef) -> bool {
    el.ancestors().filter_map(ElementRef::wrap).any(|ancestor| {
        ancestor
            .value()
            .classes()
            .any(|class| OVERLAY_CLASSES.contains(&class))
    })
}

fn license_text(row: &ElementRef) -> Option<String> {
    let license_sel = Selector::parse(LICENSE_SELECTOR).unwrap();

    row.select(&license_sel)
        .next()
        .map(|el| normalize_text(&el.text().collect::<String>()))
        .filter(|text| !text.is_empty())
}

fn parse_pager(doc: &Html) -> Pager {
    let next_sel = Selector::parse(NEXT_SELECTOR).unwrap();

    match doc.select(&next_sel).next() {
        Some(button) if button.value().classes().any(|c| c == DISABLED_CLASS) => Pager::Last,
        Some(_) => Pager::Next,
        None => Pager::Missing,
    }
}

/// Resolve `href` against the page URL, dropping javascript/anchor links.
fn resolve(page_url: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    page_url.join(href).ok().map(|u| u.to_string())
}

/// Collapse internal whitespace (titles are often wrapped across lines).
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
