//! On-disk layout of the per-thesis working copies.

use std::path::{Path, PathBuf};

use phdharvest_shared::DoctorateId;

/// File name of the downloaded PDF inside a thesis directory.
pub const PDF_FILE_NAME: &str = "doc.pdf";

/// File name of the GROBID TEI output inside a thesis directory.
pub const TEI_FILE_NAME: &str = "doc.grobid.tei.xml";

/// Longest directory name produced by [`title_to_dir_name`], in characters.
const MAX_DIR_NAME_CHARS: usize = 255;

/// Characters not allowed in directory names on common filesystems.
const FORBIDDEN: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Turn a thesis title into a directory name.
///
/// Forbidden characters become `_`, whitespace runs collapse to a single
/// `_`, and the result is cut to 255 characters.
pub fn title_to_dir_name(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();

    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .take(MAX_DIR_NAME_CHARS)
        .collect()
}

/// Paths of one thesis' working copies under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPaths {
    pub dir: PathBuf,
    pub pdf: PathBuf,
    pub tei: PathBuf,
}

impl DocPaths {
    pub fn new(data_dir: &Path, title: &str) -> Self {
        let dir = data_dir.join(title_to_dir_name(title));
        Self {
            pdf: dir.join(PDF_FILE_NAME),
            tei: dir.join(TEI_FILE_NAME),
            dir,
        }
    }

    /// Temporary path record `id` writes its PDF to before renaming it into
    /// place. Records with the same title share `dir`, so each gets its own.
    pub fn pdf_partial(&self, id: DoctorateId) -> PathBuf {
        self.dir.join(format!("{PDF_FILE_NAME}.{id}.part"))
    }

    /// Temporary path record `id` writes its TEI to before renaming it into place.
    pub fn tei_partial(&self, id: DoctorateId) -> PathBuf {
        self.dir.join(format!("{TEI_FILE_NAME}.{id}.part"))
    }

    pub async fn has_tei(&self) -> bool {
        tokio::fs::try_exists(&self.tei).await.unwrap_or(false)
    }
}
