//! SQL migration definitions for the phdharvest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: doctorates, harvest_jobs, FTS5",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per thesis
CREATE TABLE IF NOT EXISTS doctorates (
    id          INTEGER PRIMARY KEY,
    title       TEXT NOT NULL,
    url         TEXT NOT NULL UNIQUE,
    license     TEXT NOT NULL,
    file_url    TEXT NOT NULL,
    text        TEXT,
    stage       TEXT NOT NULL DEFAULT 'scraped',
    pdf_sha256  TEXT,
    last_error  TEXT,
    scraped_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_doctorates_stage ON doctorates(stage);

-- Stage run history
CREATE TABLE IF NOT EXISTS harvest_jobs (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

-- Full-text search on titles and cleaned text
CREATE VIRTUAL TABLE IF NOT EXISTS doctorates_fts USING fts5(
    title,
    text,
    content=doctorates,
    content_rowid=id
);

CREATE TRIGGER IF NOT EXISTS doctorates_fts_insert AFTER INSERT ON doctorates BEGIN
    INSERT INTO doctorates_fts(rowid, title, text)
    VALUES (new.id, new.title, new.text);
END;

CREATE TRIGGER IF NOT EXISTS doctorates_fts_delete AFTER DELETE ON doctorates BEGIN
    INSERT INTO doctorates_fts(doctorates_fts, rowid, title, text)
    VALUES ('delete', old.id, old.title, old.text);
END;

CREATE TRIGGER IF NOT EXISTS doctorates_fts_update AFTER UPDATE OF title, text ON doctorates BEGIN
    INSERT INTO doctorates_fts(doctorates_fts, rowid, title, text)
    VALUES ('delete', old.id, old.title, old.text);
    INSERT INTO doctorates_fts(rowid, title, text)
    VALUES (new.id, new.title, new.text);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
