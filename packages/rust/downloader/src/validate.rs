//! PDF validation for downloaded files.

use lopdf::Document;
use sha2::{Digest, Sha256};

/// Every PDF file starts with this header.
const PDF_MAGIC: &[u8] = b"%PDF";

/// Number of pages in a PDF, or `None` if the bytes do not parse as a PDF.
pub fn pdf_page_count(bytes: &[u8]) -> Option<usize> {
    if !bytes.starts_with(PDF_MAGIC) {
        return None;
    }
    Document::load_mem(bytes).ok().map(|doc| doc.get_pages().len())
}

/// Whether `bytes` is a PDF with at least one readable page.
///
/// HTML error pages and truncated downloads both fail this check.
pub fn is_pdf_valid(bytes: &[u8]) -> bool {
    pdf_page_count(bytes).is_some_and(|pages| pages > 0)
}

/// Hex-encoded SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
