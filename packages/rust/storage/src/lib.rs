//! libSQL storage layer for harvested doctorates.
//!
//! The [`Storage`] struct wraps an embedded libSQL database holding the
//! doctorate records, harvest job history, and a full-text index over
//! titles and cleaned text. It replaces the file-per-stage handoff: each
//! stage reads what the previous one wrote and updates its own columns.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use phdharvest_shared::{Doctorate, DoctorateId, HarvestError, Result, Stage};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Column list shared by every doctorate query, in [`row_to_doctorate`] order.
const DOCTORATE_COLUMNS: &str =
    "id, title, url, license, file_url, text, stage, pdf_sha256, last_error, scraped_at";

fn storage_err(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        HarvestError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(HarvestError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Doctorate records
    // -----------------------------------------------------------------------

    /// The first ID not yet used by any record.
    pub async fn next_doctorate_id(&self) -> Result<DoctorateId> {
        let mut rows = self
            .conn
            .query("SELECT COALESCE(MAX(id) + 1, 0) FROM doctorates", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(DoctorateId(row.get::<i64>(0).map_err(storage_err)?)),
            Ok(None) => Ok(DoctorateId(0)),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Insert a scraped record, or refresh title/license/file URL of the
    /// record already stored under the same detail URL.
    ///
    /// Returns the ID the record is stored under, which is the existing ID
    /// when the URL was seen before.
    pub async fn upsert_doctorate(&self, doc: &Doctorate) -> Result<DoctorateId> {
        self.check_writable()?;
        let mut rows = self
            .conn
            .query(
                "INSERT INTO doctorates (id, title, url, license, file_url, text, stage, pdf_sha256, last_error, scraped_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(url) DO UPDATE SET
                   title = excluded.title,
                   license = excluded.license,
                   file_url = excluded.file_url,
                   scraped_at = excluded.scraped_at
                 RETURNING id",
                params![
                    doc.id.0,
                    doc.title.as_str(),
                    doc.url.as_str(),
                    doc.license.as_str(),
                    doc.file_url.as_str(),
                    doc.text.as_deref(),
                    doc.stage.as_str(),
                    doc.pdf_sha256.as_deref(),
                    doc.last_error.as_deref(),
                    doc.scraped_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(DoctorateId(row.get::<i64>(0).map_err(storage_err)?)),
            Ok(None) => Err(HarvestError::Storage(format!(
                "upsert of {} returned no id",
                doc.url
            ))),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Get a record by ID.
    pub async fn get_doctorate(&self, id: DoctorateId) -> Result<Option<Doctorate>> {
        let sql = format!("SELECT {DOCTORATE_COLUMNS} FROM doctorates WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![id.0])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_doctorate(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List every record ordered by ID.
    pub async fn list_doctorates(&self) -> Result<Vec<Doctorate>> {
        let sql = format!("SELECT {DOCTORATE_COLUMNS} FROM doctorates ORDER BY id");
        self.collect_doctorates(&sql, params![]).await
    }

    /// List records that have cleaned text, ordered by ID.
    pub async fn list_with_text(&self) -> Result<Vec<Doctorate>> {
        let sql = format!(
            "SELECT {DOCTORATE_COLUMNS} FROM doctorates
             WHERE text IS NOT NULL AND text != '' ORDER BY id"
        );
        self.collect_doctorates(&sql, params![]).await
    }

    /// Total number of records.
    pub async fn count_doctorates(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM doctorates", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(storage_err)? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Number of batches of `size` records needed to cover the table.
    pub async fn batch_count(&self, size: u32) -> Result<u64> {
        if size == 0 {
            return Err(HarvestError::validation("batch size must be at least 1"));
        }
        let total = self.count_doctorates().await?;
        Ok(total.div_ceil(u64::from(size)))
    }

    /// Records in batch `index` (0-based) of `size` records, ordered by ID.
    pub async fn list_batch(&self, index: u64, size: u32) -> Result<Vec<Doctorate>> {
        if size == 0 {
            return Err(HarvestError::validation("batch size must be at least 1"));
        }
        let offset = index.saturating_mul(u64::from(size));
        let sql = format!(
            "SELECT {DOCTORATE_COLUMNS} FROM doctorates ORDER BY id LIMIT ?1 OFFSET ?2"
        );
        self.collect_doctorates(&sql, params![i64::from(size), offset as i64])
            .await
    }

    async fn collect_doctorates(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Doctorate>> {
        let mut rows = self.conn.query(sql, params).await.map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_doctorate(&row)?);
        }
        Ok(results)
    }

    /// Move a record to `stage`, recording `error` (cleared when `None`).
    pub async fn set_stage(
        &self,
        id: DoctorateId,
        stage: Stage,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE doctorates SET stage = ?1, last_error = ?2 WHERE id = ?3",
                params![stage.as_str(), error, id.0],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Record the hash of the downloaded PDF.
    pub async fn set_pdf_hash(&self, id: DoctorateId, sha256: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE doctorates SET pdf_sha256 = ?1 WHERE id = ?2",
                params![sha256, id.0],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Store cleaned text (`None` clears it).
    pub async fn set_text(&self, id: DoctorateId, text: Option<&str>) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE doctorates SET text = ?1 WHERE id = ?2",
                params![text, id.0],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Harvest job operations
    // -----------------------------------------------------------------------

    /// Insert a new job of the given kind. Returns the generated job ID.
    pub async fn insert_job(&self, kind: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO harvest_jobs (id, kind, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), kind, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Mark a job finished and attach its stats.
    pub async fn finish_job(&self, job_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE harvest_jobs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, job_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Stats blob of a finished job, if any.
    pub async fn get_job_stats(&self, job_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stats_json FROM harvest_jobs WHERE id = ?1",
                params![job_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // FTS search
    // -----------------------------------------------------------------------

    /// Full-text search over titles and cleaned text.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
        let mut rows = self
            .conn
            .query(
                "SELECT d.id, d.title, snippet(doctorates_fts, 1, '[', ']', '...', 12), rank
                 FROM doctorates_fts fts
                 JOIN doctorates d ON d.id = fts.rowid
                 WHERE doctorates_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
                params![query, limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(SearchHit {
                id: DoctorateId(row.get::<i64>(0).map_err(storage_err)?),
                title: row.get::<String>(1).map_err(storage_err)?,
                snippet: row.get::<String>(2).unwrap_or_default(),
                score: row.get::<f64>(3).unwrap_or(0.0),
            });
        }
        Ok(results)
    }
}

/// A full-text search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: DoctorateId,
    pub title: String,
    /// Text excerpt around the match, matches wrapped in `[` `]`.
    pub snippet: String,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

/// Convert a database row to a [`Doctorate`].
fn row_to_doctorate(row: &libsql::Row) -> Result<Doctorate> {
    let stage: String = row.get(6).map_err(storage_err)?;
    let scraped_at: String = row.get(9).map_err(storage_err)?;

    Ok(Doctorate {
        id: DoctorateId(row.get::<i64>(0).map_err(storage_err)?),
        title: row.get::<String>(1).map_err(storage_err)?,
        url: row.get::<String>(2).map_err(storage_err)?,
        license: row.get::<String>(3).map_err(storage_err)?,
        file_url: row.get::<String>(4).map_err(storage_err)?,
        text: row.get::<String>(5).ok(),
        stage: stage.parse()?,
        pdf_sha256: row.get::<String>(7).ok(),
        last_error: row.get::<String>(8).ok(),
        scraped_at: chrono::DateTime::parse_from_rfc3339(&scraped_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| HarvestError::parse(format!("invalid scraped_at '{scraped_at}': {e}")))?,
    })
}
