//! Snapshot database: schema, row model, and open helpers
//!
//! A snapshot is a single SQLite file owning the relational model and the
//! build id. It is written once by [`writer`] and opened read-only
//! everywhere else. Bundled SQLite ships FTS5 with the `unicode61` and
//! `trigram` tokenizers used by the two search tables.

pub mod store;
pub mod writer;

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};

use crate::identity::KeyType;
use crate::{Error, Result};

/// Current snapshot schema version, stored in `build_meta`.
pub const SCHEMA_VERSION: i64 = 1;

/// Schema DDL. New columns and tables are additive; readers tolerate older
/// snapshots by probing `build_meta.schema_version`.
const SCHEMA_DDL: &str = "
CREATE TABLE build_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE papers (
    paper_id                    TEXT PRIMARY KEY,
    paper_key                   TEXT NOT NULL UNIQUE,
    paper_key_type              TEXT NOT NULL,
    title                       TEXT NOT NULL,
    authors                     TEXT NOT NULL,
    year                        TEXT NOT NULL,
    month                       TEXT NOT NULL,
    venue                       TEXT NOT NULL DEFAULT '',
    doi                         TEXT,
    keywords                    TEXT NOT NULL,
    institutions                TEXT NOT NULL,
    tags                        TEXT NOT NULL,
    output_language             TEXT,
    provider                    TEXT,
    model                       TEXT,
    prompt_template             TEXT,
    preferred_summary_template  TEXT,
    available_summary_templates TEXT NOT NULL,
    source_content_hash         TEXT,
    pdf_content_hash            TEXT,
    translations                TEXT NOT NULL,
    summary_preview             TEXT,
    meta_fingerprint            TEXT NOT NULL
);

CREATE TABLE paper_aliases (
    paper_key TEXT PRIMARY KEY,
    paper_id  TEXT NOT NULL REFERENCES papers(paper_id)
);
CREATE INDEX idx_aliases_paper ON paper_aliases(paper_id);

CREATE TABLE facet_values (
    kind        TEXT NOT NULL,
    id          INTEGER NOT NULL,
    value       TEXT NOT NULL,
    display     TEXT NOT NULL,
    paper_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (kind, id),
    UNIQUE (kind, value)
);

CREATE TABLE paper_facets (
    paper_id TEXT NOT NULL,
    kind     TEXT NOT NULL,
    facet_id INTEGER NOT NULL,
    PRIMARY KEY (paper_id, kind, facet_id)
);
CREATE INDEX idx_paper_facets_kind ON paper_facets(kind, facet_id);

CREATE TABLE facet_relationships (
    kind_a      TEXT NOT NULL,
    facet_a     INTEGER NOT NULL,
    kind_b      TEXT NOT NULL,
    facet_b     INTEGER NOT NULL,
    paper_count INTEGER NOT NULL,
    PRIMARY KEY (kind_a, facet_a, kind_b, facet_b)
);

CREATE TABLE paper_bibtex (
    paper_id   TEXT PRIMARY KEY REFERENCES papers(paper_id),
    bibtex_key TEXT NOT NULL,
    entry_type TEXT NOT NULL,
    bibtex_raw TEXT NOT NULL
);

CREATE VIRTUAL TABLE search_index USING fts5(
    paper_id UNINDEXED,
    title,
    authors,
    venue,
    meta,
    summary,
    source,
    translated,
    tokenize = 'unicode61 remove_diacritics 2'
);

CREATE VIRTUAL TABLE title_trigram USING fts5(
    paper_id UNINDEXED,
    title,
    venue,
    tokenize = 'trigram'
);
";

/// Apply the full schema to a fresh database.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_DDL)?;
    Ok(())
}

/// Open an existing snapshot read-only.
pub fn open_read_only(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Build identification and schema version of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildMeta {
    pub snapshot_build_id: String,
    pub created_at: String,
    pub schema_version: i64,
}

/// Read `build_meta`, tolerating legacy snapshots that predate some keys.
pub fn read_build_meta(conn: &Connection) -> Result<BuildMeta> {
    let mut stmt = conn.prepare("SELECT key, value FROM build_meta")?;
    let mut map = BTreeMap::new();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (k, v) = row?;
        map.insert(k, v);
    }
    let snapshot_build_id = map
        .get("snapshot_build_id")
        .cloned()
        .ok_or_else(|| Error::snapshot("build_meta has no snapshot_build_id"))?;
    Ok(BuildMeta {
        snapshot_build_id,
        created_at: map.get("created_at").cloned().unwrap_or_default(),
        schema_version: map
            .get("schema_version")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    })
}

/// A paper as stored in the snapshot, with JSON columns decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRow {
    pub paper_id: String,
    pub paper_key: String,
    pub paper_key_type: KeyType,
    pub title: String,
    pub authors: Vec<String>,
    pub year: String,
    pub month: String,
    pub venue: String,
    pub doi: Option<String>,
    pub keywords: Vec<String>,
    pub institutions: Vec<String>,
    pub tags: Vec<String>,
    pub output_language: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_template: Option<String>,
    pub preferred_summary_template: Option<String>,
    pub available_summary_templates: Vec<String>,
    pub source_content_hash: Option<String>,
    pub pdf_content_hash: Option<String>,
    /// language → content hash.
    pub translations: BTreeMap<String, String>,
    pub summary_preview: Option<String>,
}

/// Column list matching [`PaperRow::from_row`]; keep the two in sync.
pub const PAPER_COLUMNS: &str = "paper_id, paper_key, paper_key_type, title, authors, year, \
     month, venue, doi, keywords, institutions, tags, output_language, provider, model, \
     prompt_template, preferred_summary_template, available_summary_templates, \
     source_content_hash, pdf_content_hash, translations, summary_preview";

impl PaperRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let key_type: String = row.get(2)?;
        Ok(PaperRow {
            paper_id: row.get(0)?,
            paper_key: row.get(1)?,
            paper_key_type: KeyType::parse(&key_type).unwrap_or(KeyType::Meta),
            title: row.get(3)?,
            authors: decode_json(row.get::<_, String>(4)?),
            year: row.get(5)?,
            month: row.get(6)?,
            venue: row.get(7)?,
            doi: row.get(8)?,
            keywords: decode_json(row.get::<_, String>(9)?),
            institutions: decode_json(row.get::<_, String>(10)?),
            tags: decode_json(row.get::<_, String>(11)?),
            output_language: row.get(12)?,
            provider: row.get(13)?,
            model: row.get(14)?,
            prompt_template: row.get(15)?,
            preferred_summary_template: row.get(16)?,
            available_summary_templates: decode_json(row.get::<_, String>(17)?),
            source_content_hash: row.get(18)?,
            pdf_content_hash: row.get(19)?,
            translations: decode_json(row.get::<_, String>(20)?),
            summary_preview: row.get(21)?,
        })
    }

    pub fn translation_langs(&self) -> Vec<String> {
        self.translations.keys().cloned().collect()
    }
}

fn decode_json<T: serde::de::DeserializeOwned + Default>(raw: String) -> T {
    serde_json::from_str(&raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        // Both FTS tables must exist with their tokenizers.
        conn.execute(
            "INSERT INTO search_index (paper_id, title) VALUES ('p1', 'deep learning')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO title_trigram (paper_id, title) VALUES ('p1', 'deep learning')",
            [],
        )
        .unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM title_trigram WHERE title_trigram MATCH 'lerning' OR title_trigram MATCH 'learning'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(hits >= 1);
    }

    #[test]
    fn test_build_meta_missing_id_is_error() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert!(read_build_meta(&conn).is_err());
    }
}
