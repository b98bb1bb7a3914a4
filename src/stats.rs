//! Facet listing and statistics
//!
//! Facet values with counts, per-value stats backed by the precomputed
//! relationship cache, and global snapshot totals. All queries are
//! read-only and run against the facet tables written at build time.

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::facet::{facet_match_key, FacetKind, FacetValue};
use crate::Result;

/// Related values returned per other facet kind in `facet_stats`.
const RELATED_LIMIT: usize = 50;
/// Buckets per facet kind in `global_stats`.
const TOP_BUCKETS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetList {
    pub facet_type: String,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub values: Vec<FacetValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedValue {
    pub value: String,
    pub paper_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetStats {
    pub facet_type: String,
    pub value: String,
    pub total: u64,
    /// other facet kind → related values with shared-paper counts.
    pub related: BTreeMap<String, Vec<RelatedValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetKindStats {
    pub total_values: u64,
    pub top: Vec<RelatedValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_papers: u64,
    pub facets: BTreeMap<String, FacetKindStats>,
}

/// Values of one facet kind, count-descending then value-ascending.
pub fn list_facet(
    conn: &Connection,
    kind: FacetKind,
    page: u32,
    page_size: u32,
) -> Result<FacetList> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM facet_values WHERE kind = ?1",
        [kind.as_str()],
        |r| r.get(0),
    )?;
    let offset = u64::from(page.saturating_sub(1)) * u64::from(page_size);
    let mut stmt = conn.prepare(
        "SELECT id, value, display, paper_count FROM facet_values WHERE kind = ?1 \
         ORDER BY paper_count DESC, value ASC LIMIT ?2 OFFSET ?3",
    )?;
    let values = stmt
        .query_map(
            rusqlite::params![kind.as_str(), i64::from(page_size), offset as i64],
            |r| {
                Ok(FacetValue {
                    id: r.get(0)?,
                    value: r.get(1)?,
                    display: r.get(2)?,
                    paper_count: r.get::<_, i64>(3)? as u64,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(FacetList {
        facet_type: kind.as_str().to_string(),
        total: total as u64,
        page,
        page_size,
        values,
    })
}

/// Resolve a facet value by its normalized form.
pub fn resolve_value(conn: &Connection, kind: FacetKind, raw: &str) -> Result<Option<FacetValue>> {
    let Some(key) = facet_match_key(raw) else {
        return Ok(None);
    };
    let row = conn
        .query_row(
            "SELECT id, value, display, paper_count FROM facet_values \
             WHERE kind = ?1 AND value = ?2",
            rusqlite::params![kind.as_str(), key],
            |r| {
                Ok(FacetValue {
                    id: r.get(0)?,
                    value: r.get(1)?,
                    display: r.get(2)?,
                    paper_count: r.get::<_, i64>(3)? as u64,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Per-value stats with cross-facet relationship counts from the cache.
/// Unknown values yield an empty stats object rather than an error; the
/// same-kind bucket never contains the value itself (the cache excludes
/// self-links at build time).
pub fn facet_stats(conn: &Connection, kind: FacetKind, raw_value: &str) -> Result<FacetStats> {
    let Some(value) = resolve_value(conn, kind, raw_value)? else {
        return Ok(FacetStats {
            facet_type: kind.as_str().to_string(),
            value: raw_value.to_string(),
            total: 0,
            related: BTreeMap::new(),
        });
    };

    let mut stmt = conn.prepare(
        "SELECT r.kind_b, fv.display, r.paper_count \
         FROM facet_relationships r \
         JOIN facet_values fv ON fv.kind = r.kind_b AND fv.id = r.facet_b \
         WHERE r.kind_a = ?1 AND r.facet_a = ?2 \
         ORDER BY r.kind_b, r.paper_count DESC, fv.value ASC",
    )?;
    let rows = stmt.query_map(
        rusqlite::params![kind.as_str(), value.id],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        },
    )?;

    let mut related: BTreeMap<String, Vec<RelatedValue>> = BTreeMap::new();
    for row in rows {
        let (other_kind, display, count) = row?;
        let bucket = related.entry(other_kind).or_default();
        if bucket.len() < RELATED_LIMIT {
            bucket.push(RelatedValue {
                value: display,
                paper_count: count as u64,
            });
        }
    }

    Ok(FacetStats {
        facet_type: kind.as_str().to_string(),
        value: value.display,
        total: value.paper_count,
        related,
    })
}

/// Snapshot-wide totals and top buckets for every facet kind.
pub fn global_stats(conn: &Connection) -> Result<GlobalStats> {
    let total_papers: i64 = conn.query_row("SELECT COUNT(*) FROM papers", [], |r| r.get(0))?;
    let mut facets = BTreeMap::new();
    for kind in FacetKind::ALL {
        let total_values: i64 = conn.query_row(
            "SELECT COUNT(*) FROM facet_values WHERE kind = ?1",
            [kind.as_str()],
            |r| r.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT display, paper_count FROM facet_values WHERE kind = ?1 \
             ORDER BY paper_count DESC, value ASC LIMIT ?2",
        )?;
        let top = stmt
            .query_map(
                rusqlite::params![kind.as_str(), TOP_BUCKETS as i64],
                |r| {
                    Ok(RelatedValue {
                        value: r.get(0)?,
                        paper_count: r.get::<_, i64>(1)? as u64,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        facets.insert(
            kind.as_str().to_string(),
            FacetKindStats {
                total_values: total_values as u64,
                top,
            },
        );
    }
    Ok(GlobalStats {
        total_papers: total_papers as u64,
        facets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityInput, IdentityResolver, MetaFingerprint};
    use crate::input::MergedPaper;
    use crate::report::BuildReport;
    use crate::snapshot::writer::{write_snapshot, PreviousData, SnapshotPaper};
    use crate::snapshot::open_read_only;

    fn paper(title: &str, author: &str, tags: &[&str]) -> SnapshotPaper {
        let mut merged = MergedPaper::default();
        merged.title = title.to_string();
        merged.authors = vec![author.to_string()];
        merged.year = "2020".to_string();
        merged.month = "01".to_string();
        merged.tags = tags.iter().map(|s| s.to_string()).collect();
        let input = IdentityInput {
            fingerprint: MetaFingerprint::new(title, &merged.authors, "2020", ""),
            ..Default::default()
        };
        let mut resolver = IdentityResolver::new(Default::default());
        let (identity, _) = resolver.resolve(&input);
        SnapshotPaper {
            merged,
            identity,
            assets: Default::default(),
        }
    }

    fn build_db(dir: &std::path::Path) -> Connection {
        let db = dir.join("stats.db");
        let papers = vec![
            paper("One", "Alice", &["ml", "nlp"]),
            paper("Two", "Alice", &["ml"]),
            paper("Three", "Bob", &["nlp"]),
        ];
        write_snapshot(&db, &papers, &PreviousData::default(), &mut BuildReport::default())
            .unwrap();
        open_read_only(&db).unwrap()
    }

    #[test]
    fn test_list_facet_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let conn = build_db(dir.path());
        let list = list_facet(&conn, FacetKind::Tag, 1, 10).unwrap();
        assert_eq!(list.total, 2);
        // Both tags count 2; value ascending breaks the tie.
        assert_eq!(list.values[0].value, "ml");
        assert_eq!(list.values[0].paper_count, 2);
        assert_eq!(list.values[1].value, "nlp");
    }

    #[test]
    fn test_facet_stats_excludes_self() {
        let dir = tempfile::tempdir().unwrap();
        let conn = build_db(dir.path());
        let stats = facet_stats(&conn, FacetKind::Tag, "ml").unwrap();
        assert_eq!(stats.total, 2);
        let same_kind = stats.related.get("tag").cloned().unwrap_or_default();
        assert!(same_kind.iter().all(|v| v.value != "ml"));
        assert!(same_kind.iter().any(|v| v.value == "nlp"));
        // Cross-kind relation: both ml papers are Alice's.
        let authors = stats.related.get("author").unwrap();
        assert_eq!(authors[0].value, "Alice");
        assert_eq!(authors[0].paper_count, 2);
    }

    #[test]
    fn test_unknown_value_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let conn = build_db(dir.path());
        let stats = facet_stats(&conn, FacetKind::Tag, "nonexistent").unwrap();
        assert_eq!(stats.total, 0);
        assert!(stats.related.is_empty());
    }

    #[test]
    fn test_global_stats() {
        let dir = tempfile::tempdir().unwrap();
        let conn = build_db(dir.path());
        let stats = global_stats(&conn).unwrap();
        assert_eq!(stats.total_papers, 3);
        assert_eq!(stats.facets["author"].total_values, 2);
        assert_eq!(stats.facets["tag"].top.len(), 2);
    }
}
