//! Stage orchestration for the thesis harvest.
//!
//! Ties the scraper, downloader, GROBID extractor, TEI cleaner and storage
//! together into the `scrape`, `download`, `extract`, `clean` and `harvest`
//! workflows.

pub mod pipeline;

pub use pipeline::{
    HarvestConfig, ProgressReporter, Selection, SilentProgress, StageSummary, clean, download,
    extract, harvest, scrape,
};
