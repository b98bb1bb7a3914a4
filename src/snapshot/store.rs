//! Read-only access to a built snapshot
//!
//! Serve-time components never mutate the snapshot. Each query runs on a
//! fresh read-only connection inside `spawn_blocking`, keeping SQLite work
//! off the async scheduler; the build metadata is read once at open.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::snapshot::{open_read_only, read_build_meta, BuildMeta, PaperRow, PAPER_COLUMNS};
use crate::{Error, Result};

/// Handle to one snapshot database file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    db_path: PathBuf,
    meta: BuildMeta,
}

/// Persisted BibTeX payload for a paper, joined with the paper's stored DOI.
#[derive(Debug, Clone, Serialize)]
pub struct BibtexRow {
    pub paper_id: String,
    pub doi: Option<String>,
    pub bibtex_raw: String,
    pub bibtex_key: String,
    pub entry_type: String,
}

impl SnapshotStore {
    /// Open a snapshot, validating that it is readable and carries build
    /// metadata.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_read_only(path)?;
        let meta = read_build_meta(&conn)?;
        tracing::info!(
            db = %path.display(),
            build_id = %meta.snapshot_build_id,
            schema_version = meta.schema_version,
            "opened snapshot"
        );
        Ok(Self {
            db_path: path.to_path_buf(),
            meta,
        })
    }

    pub fn build_meta(&self) -> &BuildMeta {
        &self.meta
    }

    pub fn snapshot_build_id(&self) -> &str {
        &self.meta.snapshot_build_id
    }

    /// Run `f` against a fresh read-only connection on the blocking pool.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_read_only(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::internal(format!("snapshot query task failed: {e}")))?
    }

    /// Fetch one paper or `paper_not_found`.
    pub async fn paper(&self, paper_id: &str) -> Result<PaperRow> {
        let id = paper_id.to_string();
        self.with_conn(move |conn| fetch_paper(conn, &id)).await
    }

    /// Fetch the persisted BibTeX payload for a paper. Distinguishes a
    /// missing paper from a paper without BibTeX; tolerates legacy
    /// snapshots that predate the `paper_bibtex` table.
    pub async fn bibtex(&self, paper_id: &str) -> Result<BibtexRow> {
        let id = paper_id.to_string();
        self.with_conn(move |conn| {
            let paper = fetch_paper(conn, &id)?;
            let row = conn
                .prepare(
                    "SELECT bibtex_key, entry_type, bibtex_raw FROM paper_bibtex \
                     WHERE paper_id = ?1",
                )
                .and_then(|mut stmt| {
                    stmt.query_row([&id], |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                        ))
                    })
                    .optional()
                })
                .unwrap_or(None);
            let (bibtex_key, entry_type, bibtex_raw) =
                row.ok_or_else(|| Error::BibtexNotFound(id.clone()))?;
            Ok(BibtexRow {
                paper_id: id,
                doi: paper.doi,
                bibtex_raw,
                bibtex_key,
                entry_type,
            })
        })
        .await
    }

    pub async fn has_bibtex(&self, paper_id: &str) -> Result<bool> {
        let id = paper_id.to_string();
        self.with_conn(move |conn| Ok(has_bibtex(conn, &id))).await
    }

    pub async fn paper_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM papers", [], |r| r.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}

/// Synchronous paper fetch for use inside `with_conn` closures.
pub fn fetch_paper(conn: &Connection, paper_id: &str) -> Result<PaperRow> {
    let sql = format!("SELECT {PAPER_COLUMNS} FROM papers WHERE paper_id = ?1");
    conn.prepare(&sql)?
        .query_row([paper_id], PaperRow::from_row)
        .optional()?
        .ok_or_else(|| Error::PaperNotFound(paper_id.to_string()))
}

/// Whether a paper has a persisted BibTeX entry; `false` on legacy
/// snapshots without the table.
pub fn has_bibtex(conn: &Connection, paper_id: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM paper_bibtex WHERE paper_id = ?1",
        [paper_id],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::BuildReport;
    use crate::snapshot::writer::{write_snapshot, PreviousData, SnapshotPaper};
    use crate::identity::{IdentityInput, IdentityResolver, MetaFingerprint};
    use crate::input::MergedPaper;

    fn build_one(dir: &Path) -> (PathBuf, String) {
        let mut merged = MergedPaper::default();
        merged.title = "Stored Paper".to_string();
        merged.authors = vec!["Author".to_string()];
        merged.year = "2021".to_string();
        merged.month = "Unknown".to_string();
        let input = IdentityInput {
            fingerprint: MetaFingerprint::new("Stored Paper", &merged.authors, "2021", ""),
            ..Default::default()
        };
        let mut resolver = IdentityResolver::new(Default::default());
        let (identity, _) = resolver.resolve(&input);
        let id = identity.paper_id.clone();
        let db = dir.join("snap.db");
        let papers = vec![SnapshotPaper {
            merged,
            identity,
            assets: Default::default(),
        }];
        write_snapshot(&db, &papers, &PreviousData::default(), &mut BuildReport::default())
            .unwrap();
        (db, id)
    }

    #[tokio::test]
    async fn test_paper_fetch_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (db, id) = build_one(dir.path());
        let store = SnapshotStore::open(&db).unwrap();

        let paper = store.paper(&id).await.unwrap();
        assert_eq!(paper.title, "Stored Paper");
        assert_eq!(paper.year, "2021");

        let missing = store.paper("0".repeat(32).as_str()).await.unwrap_err();
        assert_eq!(missing.code(), "paper_not_found");
    }

    #[tokio::test]
    async fn test_bibtex_not_found_vs_paper_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (db, id) = build_one(dir.path());
        let store = SnapshotStore::open(&db).unwrap();
        assert_eq!(store.bibtex(&id).await.unwrap_err().code(), "bibtex_not_found");
        assert_eq!(
            store.bibtex("ffffffffffffffffffffffffffffffff").await.unwrap_err().code(),
            "paper_not_found"
        );
        assert!(!store.has_bibtex(&id).await.unwrap());
    }
}
