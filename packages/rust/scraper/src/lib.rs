//! Metadata scraper for the ppm.edu.pl doctoral thesis listings.
//!
//! This crate provides:
//! - [`listing`]: parser for one search-result page
//! - [`LicenseFilter`]: license allow-list
//! - [`engine`]: paginating, retrying scraper over the configured sources

pub mod engine;
pub mod license;
pub mod listing;

pub use engine::{PortalScraper, ScrapeOutcome, ScrapeStats, page_number, with_page_number};
pub use license::LicenseFilter;
pub use listing::{ListingEntry, ListingPage, Pager, parse_listing};

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn load_fixture(name: &str) -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/html")
            .join(name);
        std::fs::read_to_string(&path)
            .unwrap_or_else(|_| panic!("missing fixture: {}", path.display()))
    }

    fn listing_url() -> Url {
        Url::parse("https://ppm.edu.pl/globalResultList.seam?q=&oa=true&r=phd&tab=PUBLICATION&lang=pl&pn=1")
            .unwrap()
    }

    #[test]
    fn fixture_page_entries() {
        let page = parse_listing(&load_fixture("ppm_listing_page.html"), &listing_url());

        assert_eq!(page.entries.len(), 3);
        assert_eq!(page.broken, 1);
        assert_eq!(page.pager, Pager::Next);

        let first = &page.entries[0];
        assert_eq!(
            first.title,
            "Ocena skuteczności leczenia cukrzycy typu 2 u pacjentów w podeszłym wieku"
        );
        assert_eq!(
            first.url,
            "https://ppm.edu.pl/info/phd/WUM2f6a1c0e4b1d4c6fa9a0b2f1d9d0e111/"
        );
        assert_eq!(first.license.as_deref(), Some("CC BY 4.0"));
        assert!(first.file_url.as_deref().unwrap().ends_with("/Nowak_rozprawa.pdf"));
    }

    #[test]
    fn fixture_page_overlay_and_fileless() {
        let page = parse_listing(&load_fixture("ppm_listing_page.html"), &listing_url());

        let overlay = &page.entries[1];
        assert_eq!(
            overlay.file_url.as_deref(),
            Some("https://ppm.edu.pl/docstore/download/UMB8c1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f/rozprawa.pdf")
        );
        assert!(overlay.license.is_none());

        let fileless = &page.entries[2];
        assert!(fileless.file_url.is_none());
    }

    #[test]
    fn fixture_page_number_advances() {
        let next = with_page_number(&listing_url(), page_number(&listing_url()) + 1);
        assert!(next.as_str().ends_with("lang=pl&pn=2"));
        assert!(next.as_str().contains("oa=true&r=phd"));
    }
}
