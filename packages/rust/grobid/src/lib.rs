//! GROBID fulltext extraction.
//!
//! - [`GrobidClient`]: REST client (`isalive`, `processFulltextDocument`)
//! - [`Extractor`]: per-record extraction stage writing TEI next to each PDF

pub mod client;
pub mod extract;

pub use client::GrobidClient;
pub use extract::{ExtractOutcome, ExtractReport, Extractor};
