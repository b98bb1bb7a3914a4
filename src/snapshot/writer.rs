//! Snapshot writer
//!
//! Populates a fresh snapshot database from the merged, identity-resolved,
//! asset-exported paper list. All data lands in a single transaction; the
//! file is written at a temporary path and renamed into place on success so
//! a failed build leaves no partial snapshot behind.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::assets::ExportedAssets;
use crate::bibtex::BibtexEntry;
use crate::facet::{facet_match_key, FacetKind};
use crate::identity::{MetaFingerprint, PreviousIdentities, ResolvedIdentity};
use crate::input::MergedPaper;
use crate::report::BuildReport;
use crate::snapshot::{init_schema, open_read_only, BuildMeta, SCHEMA_VERSION};
use crate::textproc::{markdown_to_plain, space_cjk};
use crate::Result;

/// Length of the stored summary preview (plain text, char-bounded).
const SUMMARY_PREVIEW_CHARS: usize = 300;

/// One paper ready to be written: merge result, resolved identity, and the
/// exporter's content hashes and extracted markdown.
#[derive(Debug)]
pub struct SnapshotPaper {
    pub merged: MergedPaper,
    pub identity: ResolvedIdentity,
    pub assets: ExportedAssets,
}

/// Everything inherited from a previous snapshot besides identity aliases.
#[derive(Debug, Default)]
pub struct PreviousData {
    pub doi: BTreeMap<String, String>,
    pub bibtex: BTreeMap<String, (String, String, String)>,
}

/// Load alias/fingerprint/doi/bibtex state from a previous snapshot.
/// Legacy databases missing tables or columns yield empty maps rather than
/// failing the build.
pub fn load_previous(path: &Path) -> Result<(PreviousIdentities, PreviousData)> {
    let conn = open_read_only(path)?;
    let mut identities = PreviousIdentities::default();
    let mut data = PreviousData::default();

    if let Ok(mut stmt) = conn.prepare("SELECT paper_key, paper_id FROM paper_aliases") {
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        for row in rows {
            let (key, id) = row?;
            identities.aliases.insert(key, id);
        }
    }
    if let Ok(mut stmt) =
        conn.prepare("SELECT paper_id, meta_fingerprint, doi FROM papers")
    {
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })?;
        for row in rows {
            let (id, fingerprint, doi) = row?;
            if let Ok(fp) = serde_json::from_str::<MetaFingerprint>(&fingerprint) {
                identities.fingerprints.insert(id.clone(), fp);
            }
            if let Some(doi) = doi {
                data.doi.insert(id.clone(), doi);
            }
        }
    }
    if let Ok(mut stmt) =
        conn.prepare("SELECT paper_id, bibtex_key, entry_type, bibtex_raw FROM paper_bibtex")
    {
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?;
        for row in rows {
            let (id, key, entry_type, raw) = row?;
            data.bibtex.insert(id, (key, entry_type, raw));
        }
    }
    Ok((identities, data))
}

/// Write the snapshot database. Returns the new build metadata.
pub fn write_snapshot(
    output_db: &Path,
    papers: &[SnapshotPaper],
    previous: &PreviousData,
    report: &mut BuildReport,
) -> Result<BuildMeta> {
    let tmp_path = tmp_db_path(output_db);
    if tmp_path.exists() {
        std::fs::remove_file(&tmp_path)?;
    }
    let mut conn = Connection::open(&tmp_path)?;
    init_schema(&conn)?;

    let meta = BuildMeta {
        snapshot_build_id: Uuid::new_v4().to_string(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        schema_version: SCHEMA_VERSION,
    };

    let tx = conn.transaction()?;
    write_build_meta(&tx, &meta)?;
    let facet_ids = write_facet_values(&tx, papers)?;
    write_papers(&tx, papers, previous, &facet_ids, report)?;
    finalize_facet_counts(&tx)?;
    write_relationship_cache(&tx)?;
    tx.commit()?;
    drop(conn);

    std::fs::rename(&tmp_path, output_db)?;
    report.papers_written = papers.len();
    tracing::info!(
        build_id = %meta.snapshot_build_id,
        papers = papers.len(),
        db = %output_db.display(),
        "snapshot written"
    );
    Ok(meta)
}

fn tmp_db_path(output_db: &Path) -> PathBuf {
    let mut name = output_db
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot.db".to_string());
    name.push_str(".tmp");
    output_db.with_file_name(name)
}

fn write_build_meta(conn: &Connection, meta: &BuildMeta) -> Result<()> {
    let mut stmt = conn.prepare("INSERT INTO build_meta (key, value) VALUES (?1, ?2)")?;
    stmt.execute(params!["schema_version", meta.schema_version.to_string()])?;
    stmt.execute(params!["snapshot_build_id", meta.snapshot_build_id])?;
    stmt.execute(params!["created_at", meta.created_at])?;
    Ok(())
}

/// The facet values a paper contributes, as (kind, display) pairs.
fn paper_facet_values(paper: &SnapshotPaper) -> Vec<(FacetKind, String)> {
    let merged = &paper.merged;
    let mut values: Vec<(FacetKind, String)> = Vec::new();
    for author in &merged.authors {
        values.push((FacetKind::Author, author.clone()));
    }
    for inst in &merged.institutions {
        values.push((FacetKind::Institution, inst.clone()));
    }
    if !merged.venue.is_empty() {
        values.push((FacetKind::Venue, merged.venue.clone()));
    }
    for kw in &merged.keywords {
        values.push((FacetKind::Keyword, kw.clone()));
    }
    for tag in &merged.tags {
        values.push((FacetKind::Tag, tag.clone()));
    }
    values.push((FacetKind::Year, merged.year.clone()));
    values.push((FacetKind::Month, merged.month.clone()));
    for template in merged.summaries.keys() {
        values.push((FacetKind::SummaryTemplate, template.clone()));
    }
    if let Some(v) = &merged.output_language {
        values.push((FacetKind::OutputLanguage, v.clone()));
    }
    if let Some(v) = &merged.provider {
        values.push((FacetKind::Provider, v.clone()));
    }
    if let Some(v) = &merged.model {
        values.push((FacetKind::Model, v.clone()));
    }
    if let Some(v) = &merged.prompt_template {
        values.push((FacetKind::PromptTemplate, v.clone()));
    }
    for lang in merged.translations.keys() {
        values.push((FacetKind::TranslationLang, lang.clone()));
    }
    values
}

type FacetIdMap = BTreeMap<(FacetKind, String), i64>;

/// Deduplicate facet values by normalized key and assign ids in
/// normalized-value sort order, which keeps ids stable across rebuilds of
/// identical inputs.
fn write_facet_values(conn: &Connection, papers: &[SnapshotPaper]) -> Result<FacetIdMap> {
    let mut per_kind: BTreeMap<FacetKind, BTreeMap<String, String>> = BTreeMap::new();
    for paper in papers {
        for (kind, display) in paper_facet_values(paper) {
            let Some(key) = facet_match_key(&display) else {
                continue;
            };
            let display = if kind.display_preserves_case() {
                display.trim().to_string()
            } else {
                key.clone()
            };
            per_kind
                .entry(kind)
                .or_default()
                .entry(key)
                .or_insert(display);
        }
    }

    let mut ids = FacetIdMap::new();
    let mut stmt = conn.prepare(
        "INSERT INTO facet_values (kind, id, value, display, paper_count) VALUES (?1, ?2, ?3, ?4, 0)",
    )?;
    for (kind, values) in per_kind {
        for (next_id, (key, display)) in values.into_iter().enumerate() {
            let id = next_id as i64 + 1;
            stmt.execute(params![kind.as_str(), id, key, display])?;
            ids.insert((kind, key), id);
        }
    }
    Ok(ids)
}

fn write_papers(
    conn: &Connection,
    papers: &[SnapshotPaper],
    previous: &PreviousData,
    facet_ids: &FacetIdMap,
    report: &mut BuildReport,
) -> Result<()> {
    let mut paper_stmt = conn.prepare(
        "INSERT INTO papers (paper_id, paper_key, paper_key_type, title, authors, year, month, \
         venue, doi, keywords, institutions, tags, output_language, provider, model, \
         prompt_template, preferred_summary_template, available_summary_templates, \
         source_content_hash, pdf_content_hash, translations, summary_preview, meta_fingerprint) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
         ?18, ?19, ?20, ?21, ?22, ?23)",
    )?;
    let mut alias_stmt =
        conn.prepare("INSERT OR IGNORE INTO paper_aliases (paper_key, paper_id) VALUES (?1, ?2)")?;
    let mut join_stmt = conn.prepare(
        "INSERT OR IGNORE INTO paper_facets (paper_id, kind, facet_id) VALUES (?1, ?2, ?3)",
    )?;
    let mut fts_stmt = conn.prepare(
        "INSERT INTO search_index (paper_id, title, authors, venue, meta, summary, source, \
         translated) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    let mut trigram_stmt = conn
        .prepare("INSERT INTO title_trigram (paper_id, title, venue) VALUES (?1, ?2, ?3)")?;
    let mut bibtex_stmt = conn.prepare(
        "INSERT INTO paper_bibtex (paper_id, bibtex_key, entry_type, bibtex_raw) \
         VALUES (?1, ?2, ?3, ?4)",
    )?;

    let mut doi_mismatches = 0usize;
    let mut doi_samples: Vec<String> = Vec::new();

    for paper in papers {
        let merged = &paper.merged;
        let id = &paper.identity.paper_id;

        // Field-level inheritance from the previous snapshot: current input
        // wins, missing fields are filled, conflicts are tallied.
        let mut doi = merged.doi.clone();
        if let Some(prev_doi) = previous.doi.get(id) {
            match &doi {
                None => doi = Some(prev_doi.clone()),
                Some(current) if current != prev_doi => {
                    doi_mismatches += 1;
                    if doi_samples.len() < 5 {
                        doi_samples.push(format!("{id}: {current} vs {prev_doi}"));
                    }
                }
                Some(_) => {}
            }
        }

        let fingerprint = MetaFingerprint::new(
            &merged.title,
            &merged.authors,
            &merged.publication_date,
            &merged.venue,
        );
        let summary_preview = merged
            .preferred_template()
            .and_then(|t| merged.summaries.get(&t))
            .map(|s| preview_of(&s.summary_markdown));

        paper_stmt.execute(params![
            id,
            paper.identity.paper_key,
            paper.identity.paper_key_type.as_str(),
            merged.title,
            serde_json::to_string(&merged.authors)?,
            merged.year,
            merged.month,
            merged.venue,
            doi,
            serde_json::to_string(&merged.keywords)?,
            serde_json::to_string(&merged.institutions)?,
            serde_json::to_string(&merged.tags)?,
            merged.output_language,
            merged.provider,
            merged.model,
            merged.prompt_template,
            merged.preferred_template(),
            serde_json::to_string(&merged.available_templates())?,
            paper.assets.source_hash,
            paper.assets.pdf_hash,
            serde_json::to_string(
                &paper
                    .assets
                    .translations
                    .iter()
                    .map(|(lang, (hash, _))| (lang.clone(), hash.clone()))
                    .collect::<BTreeMap<_, _>>()
            )?,
            summary_preview,
            serde_json::to_string(&fingerprint)?,
        ])?;

        for alias in &paper.identity.aliases {
            alias_stmt.execute(params![alias, id])?;
        }

        let mut joined: BTreeSet<(FacetKind, i64)> = BTreeSet::new();
        for (kind, display) in paper_facet_values(paper) {
            if let Some(key) = facet_match_key(&display) {
                if let Some(&facet_id) = facet_ids.get(&(kind, key)) {
                    joined.insert((kind, facet_id));
                }
            }
        }
        for (kind, facet_id) in joined {
            join_stmt.execute(params![id, kind.as_str(), facet_id])?;
        }

        let corpus = corpus_row(paper, doi.as_deref());
        fts_stmt.execute(params![
            id,
            corpus.title,
            corpus.authors,
            corpus.venue,
            corpus.meta,
            corpus.summary,
            corpus.source,
            corpus.translated,
        ])?;
        trigram_stmt.execute(params![id, merged.title, merged.venue])?;

        let bibtex = merged
            .bibtex
            .clone()
            .map(|entry| rendered_bibtex(&entry))
            .or_else(|| previous.bibtex.get(id).cloned());
        if let Some((key, entry_type, raw)) = bibtex {
            bibtex_stmt.execute(params![id, key, entry_type, raw])?;
        }
    }

    if doi_mismatches > 0 {
        report.inheritance_mismatch(format!(
            "doi: {doi_mismatches} papers differ from previous snapshot ({})",
            doi_samples.join("; ")
        ));
    }
    Ok(())
}

fn rendered_bibtex(entry: &BibtexEntry) -> (String, String, String) {
    (entry.key.clone(), entry.entry_type.clone(), entry.render())
}

fn preview_of(markdown: &str) -> String {
    let plain = markdown_to_plain(markdown);
    if plain.chars().count() <= SUMMARY_PREVIEW_CHARS {
        plain
    } else {
        let mut preview: String = plain.chars().take(SUMMARY_PREVIEW_CHARS).collect();
        preview.push('…');
        preview
    }
}

struct CorpusRow {
    title: String,
    authors: String,
    venue: String,
    meta: String,
    summary: String,
    source: String,
    translated: String,
}

/// Assemble the plain-text FTS corpus for one paper. Markdown content is
/// reduced to plain text (tables and code dropped) and every column gets
/// index-time CJK spacing.
fn corpus_row(paper: &SnapshotPaper, doi: Option<&str>) -> CorpusRow {
    let merged = &paper.merged;
    let mut meta_parts: Vec<String> = Vec::new();
    meta_parts.extend(merged.keywords.iter().cloned());
    meta_parts.extend(merged.institutions.iter().cloned());
    meta_parts.push(merged.year.clone());
    if let Some(doi) = doi {
        meta_parts.push(doi.to_string());
    }

    let summary = merged
        .summaries
        .values()
        .map(|s| markdown_to_plain(&s.summary_markdown))
        .collect::<Vec<_>>()
        .join(" ");
    let source = paper
        .assets
        .source_markdown
        .as_deref()
        .map(markdown_to_plain)
        .unwrap_or_default();
    let translated = paper
        .assets
        .translations
        .values()
        .map(|(_, text)| markdown_to_plain(text))
        .collect::<Vec<_>>()
        .join(" ");

    CorpusRow {
        title: space_cjk(&merged.title),
        authors: space_cjk(&merged.authors.join(", ")),
        venue: space_cjk(&merged.venue),
        meta: space_cjk(&meta_parts.join(" ")),
        summary: space_cjk(&summary),
        source: space_cjk(&source),
        translated: space_cjk(&translated),
    }
}

fn finalize_facet_counts(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE facet_values SET paper_count = (
            SELECT COUNT(*) FROM paper_facets pf
            WHERE pf.kind = facet_values.kind AND pf.facet_id = facet_values.id
        )",
        [],
    )?;
    Ok(())
}

/// Precompute cross-facet relationship counts in one pass over the joins.
/// Same-kind pairs are kept (co-author style relations) but a value is never
/// related to itself.
fn write_relationship_cache(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT INTO facet_relationships (kind_a, facet_a, kind_b, facet_b, paper_count)
         SELECT a.kind, a.facet_id, b.kind, b.facet_id, COUNT(*)
         FROM paper_facets a
         JOIN paper_facets b ON a.paper_id = b.paper_id
         WHERE NOT (a.kind = b.kind AND a.facet_id = b.facet_id)
         GROUP BY a.kind, a.facet_id, b.kind, b.facet_id",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityInput, IdentityResolver};
    use crate::input::SummaryRecord;
    use crate::snapshot::read_build_meta;

    fn snapshot_paper(title: &str, authors: &[&str], tags: &[&str]) -> SnapshotPaper {
        let mut merged = MergedPaper::default();
        merged.title = title.to_string();
        merged.authors = authors.iter().map(|s| s.to_string()).collect();
        merged.year = "2020".to_string();
        merged.month = "01".to_string();
        merged.venue = "NeurIPS".to_string();
        merged.tags = tags.iter().map(|s| s.to_string()).collect();
        merged.summaries.insert(
            "deep_read".to_string(),
            SummaryRecord {
                summary_markdown: "A **summary** of the work.".to_string(),
                metadata: serde_json::json!({}),
            },
        );
        let input = IdentityInput {
            fingerprint: MetaFingerprint::new(title, &merged.authors, "2020", "NeurIPS"),
            ..Default::default()
        };
        let mut resolver = IdentityResolver::new(Default::default());
        let (identity, _) = resolver.resolve(&input);
        SnapshotPaper {
            merged,
            identity,
            assets: ExportedAssets::default(),
        }
    }

    #[test]
    fn test_write_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("snap.db");
        let papers = vec![
            snapshot_paper("Deep Learning", &["Hinton"], &["ml"]),
            snapshot_paper("Quantum Computing", &["Preskill"], &["qc", "ml"]),
        ];
        let mut report = BuildReport::default();
        let meta =
            write_snapshot(&db, &papers, &PreviousData::default(), &mut report).unwrap();
        assert_eq!(meta.schema_version, SCHEMA_VERSION);

        let conn = open_read_only(&db).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM papers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
        let read = read_build_meta(&conn).unwrap();
        assert_eq!(read.snapshot_build_id, meta.snapshot_build_id);

        // The shared tag links both papers in the relationship cache.
        let related: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM facet_relationships WHERE kind_a = 'tag'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(related > 0);
        // No self-links.
        let selflinks: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM facet_relationships \
                 WHERE kind_a = kind_b AND facet_a = facet_b",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(selflinks, 0);
    }

    #[test]
    fn test_facet_ids_deterministic() {
        let papers = || {
            vec![
                snapshot_paper("B Paper", &["Zeta"], &["beta", "alpha"]),
                snapshot_paper("A Paper", &["Alpha"], &["gamma"]),
            ]
        };
        let dir = tempfile::tempdir().unwrap();
        let mut ids = Vec::new();
        for name in ["one.db", "two.db"] {
            let db = dir.path().join(name);
            let mut report = BuildReport::default();
            write_snapshot(&db, &papers(), &PreviousData::default(), &mut report).unwrap();
            let conn = open_read_only(&db).unwrap();
            let mut stmt = conn
                .prepare("SELECT id, value FROM facet_values WHERE kind = 'tag' ORDER BY id")
                .unwrap();
            let rows: Vec<(i64, String)> = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
                .unwrap()
                .map(|r| r.unwrap())
                .collect();
            ids.push(rows);
        }
        assert_eq!(ids[0], ids[1]);
        // Sorted by normalized value: alpha, beta, gamma.
        assert_eq!(ids[0][0].1, "alpha");
        assert_eq!(ids[0][1].1, "beta");
        assert_eq!(ids[0][2].1, "gamma");
    }

    #[test]
    fn test_doi_inheritance_fills_missing() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("snap.db");
        let papers = vec![snapshot_paper("Deep Learning", &["Hinton"], &[])];
        let id = papers[0].identity.paper_id.clone();
        let mut previous = PreviousData::default();
        previous.doi.insert(id.clone(), "10.1000/prev".to_string());
        let mut report = BuildReport::default();
        write_snapshot(&db, &papers, &previous, &mut report).unwrap();
        let conn = open_read_only(&db).unwrap();
        let doi: Option<String> = conn
            .query_row("SELECT doi FROM papers WHERE paper_id = ?1", [&id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(doi.as_deref(), Some("10.1000/prev"));
    }
}
