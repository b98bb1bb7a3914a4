//! Cross-input merging and BibTeX enrichment
//!
//! Records from different input collections describe the same paper when
//! their titles match closely (normalized key equality or similarity ratio
//! >= 0.95). Merged records union their summary templates and translations;
//! conflicting scalar fields keep the value from the first input in CLI
//! order, which keeps rebuilds deterministic for a stable input list.

use std::collections::BTreeMap;

use serde_json::json;

use crate::bibtex::{month_number, BibtexEntry};
use crate::identity::canonicalize_doi;
use crate::input::{InputCollection, RawRecord};
use crate::report::BuildReport;
use crate::textproc::{first_year_run, normalize_title_key, normalize_value};

/// Similarity at or above this ratio merges two records.
const MERGE_THRESHOLD: f64 = 0.95;
/// Similarity in `[COLLISION_THRESHOLD, MERGE_THRESHOLD)` is too close to
/// ignore but too far to merge: the record is skipped and reported.
const COLLISION_THRESHOLD: f64 = 0.85;

/// One summary template's content for a paper.
#[derive(Debug, Clone)]
pub struct SummaryRecord {
    pub summary_markdown: String,
    pub metadata: serde_json::Value,
}

/// A fully merged paper, ready for identity resolution and export.
#[derive(Debug, Clone, Default)]
pub struct MergedPaper {
    pub title: String,
    pub authors: Vec<String>,
    pub year: String,
    pub month: String,
    pub venue: String,
    pub publication_date: String,
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    pub keywords: Vec<String>,
    pub institutions: Vec<String>,
    pub tags: Vec<String>,
    pub output_language: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_template: Option<String>,
    /// template tag → summary content, unioned across inputs.
    pub summaries: BTreeMap<String, SummaryRecord>,
    pub source_path: Option<String>,
    pub pdf_path: Option<String>,
    /// language → markdown path.
    pub translations: BTreeMap<String, String>,
    pub images: Vec<String>,
    pub bibtex: Option<BibtexEntry>,
}

impl MergedPaper {
    /// Templates in deterministic order.
    pub fn available_templates(&self) -> Vec<String> {
        self.summaries.keys().cloned().collect()
    }

    /// The template the API serves when none is requested: the paper's
    /// `prompt_template` when it names an available summary, else the first
    /// available one.
    pub fn preferred_template(&self) -> Option<String> {
        if let Some(tag) = &self.prompt_template {
            if self.summaries.contains_key(tag) {
                return Some(tag.clone());
            }
        }
        self.summaries.keys().next().cloned()
    }
}

struct Group {
    title_key: String,
    records: Vec<(String, RawRecord)>,
}

/// Merge all input collections into one paper list and enrich from BibTeX.
///
/// `bib_entries` come from `--bibtex`; entries match papers by canonical DOI
/// first, then by title key. Inline `bibtex` blocks on records are used when
/// the file has no match.
pub fn merge_inputs(
    collections: Vec<InputCollection>,
    bib_entries: &[BibtexEntry],
    report: &mut BuildReport,
) -> Vec<MergedPaper> {
    let mut groups: Vec<Group> = Vec::new();

    for collection in collections {
        for record in collection.records {
            let Some(preferred) = record.preferred_title() else {
                continue;
            };
            let key = normalize_title_key(preferred);
            match find_group(&groups, &key) {
                GroupMatch::Exact(idx) | GroupMatch::Similar(idx) => {
                    groups[idx]
                        .records
                        .push((collection.template_tag.clone(), record));
                }
                GroupMatch::Collision(idx, ratio) => {
                    report.skip_record(format!(
                        "title_collision_below_threshold: {:?} vs {:?} (ratio {ratio:.2})",
                        key, groups[idx].title_key
                    ));
                }
                GroupMatch::None => groups.push(Group {
                    title_key: key,
                    records: vec![(collection.template_tag.clone(), record)],
                }),
            }
        }
    }

    groups
        .into_iter()
        .map(|group| finalize_group(group, bib_entries))
        .collect()
}

enum GroupMatch {
    Exact(usize),
    Similar(usize),
    Collision(usize, f64),
    None,
}

fn find_group(groups: &[Group], key: &str) -> GroupMatch {
    let mut best: Option<(usize, f64)> = None;
    for (idx, group) in groups.iter().enumerate() {
        if group.title_key == key {
            return GroupMatch::Exact(idx);
        }
        let ratio = strsim::normalized_levenshtein(&group.title_key, key);
        if best.map(|(_, b)| ratio > b).unwrap_or(true) {
            best = Some((idx, ratio));
        }
    }
    match best {
        Some((idx, ratio)) if ratio >= MERGE_THRESHOLD => GroupMatch::Similar(idx),
        Some((idx, ratio)) if ratio >= COLLISION_THRESHOLD => GroupMatch::Collision(idx, ratio),
        _ => GroupMatch::None,
    }
}

fn finalize_group(group: Group, bib_entries: &[BibtexEntry]) -> MergedPaper {
    let mut paper = MergedPaper::default();

    for (tag, record) in &group.records {
        if paper.title.is_empty() {
            if let Some(t) = record.display_title() {
                paper.title = t.to_string();
            }
        }
        if paper.authors.is_empty() {
            paper.authors = record.author_list().to_vec();
        }
        first_wins(&mut paper.publication_date, record.publication_date.as_deref());
        first_wins(&mut paper.venue, record.publication_venue.as_deref());
        first_wins_opt(&mut paper.doi, record.doi.as_deref());
        first_wins_opt(&mut paper.arxiv_id, record.arxiv_id.as_deref());
        first_wins_opt(&mut paper.output_language, record.output_language.as_deref());
        first_wins_opt(&mut paper.provider, record.provider.as_deref());
        first_wins_opt(&mut paper.model, record.model.as_deref());
        first_wins_opt(&mut paper.prompt_template, record.prompt_template.as_deref());
        first_wins_opt(&mut paper.source_path, record.source_path.as_deref());
        first_wins_opt(&mut paper.pdf_path, record.pdf_path.as_deref());

        union_values(&mut paper.keywords, &record.keywords);
        union_values(&mut paper.institutions, &record.institutions);
        union_values(&mut paper.tags, &record.tags);

        for (lang, path) in &record.translations {
            paper
                .translations
                .entry(lang.clone())
                .or_insert_with(|| path.clone());
        }
        for image in &record.images {
            if !paper.images.contains(image) {
                paper.images.push(image.clone());
            }
        }

        if let Some(summary) = record.summary_markdown() {
            paper
                .summaries
                .entry(tag.clone())
                .or_insert_with(|| SummaryRecord {
                    summary_markdown: summary.to_string(),
                    metadata: record_metadata(record),
                });
        }

        if paper.bibtex.is_none() {
            paper.bibtex = inline_bibtex(record);
        }
    }

    // A curated .bib file wins over extractor-inlined BibTeX.
    if let Some(entry) = match_bib_entry(&paper, bib_entries) {
        paper.bibtex = Some(entry.clone());
    }
    enrich_from_bibtex(&mut paper);

    // The stored DOI is always the canonical form, whatever its source.
    paper.doi = paper.doi.as_deref().and_then(canonicalize_doi);

    if paper.year.is_empty() {
        paper.year = first_year_run(&paper.publication_date).unwrap_or_else(|| "unknown".into());
    }
    if paper.month.is_empty() {
        paper.month = month_from_date(&paper.publication_date).unwrap_or_else(|| "Unknown".into());
    }
    paper
}

fn first_wins(slot: &mut String, value: Option<&str>) {
    if slot.is_empty() {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            *slot = v.to_string();
        }
    }
}

fn first_wins_opt(slot: &mut Option<String>, value: Option<&str>) {
    if slot.is_none() {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            *slot = Some(v.to_string());
        }
    }
}

/// Order-preserving union, deduplicated by normalized value.
fn union_values(target: &mut Vec<String>, extra: &[String]) {
    for value in extra {
        let key = normalize_value(value);
        if key.is_empty() {
            continue;
        }
        if !target.iter().any(|t| normalize_value(t) == key) {
            target.push(value.trim().to_string());
        }
    }
}

/// Extractor metadata preserved into the per-template summary JSON.
fn record_metadata(record: &RawRecord) -> serde_json::Value {
    let mut meta = json!({
        "publication_date": record.publication_date,
        "publication_venue": record.publication_venue,
        "doi": record.doi,
        "keywords": record.keywords,
        "institutions": record.institutions,
        "tags": record.tags,
        "output_language": record.output_language,
        "provider": record.provider,
        "model": record.model,
        "prompt_template": record.prompt_template,
    });
    if let Some(map) = meta.as_object_mut() {
        for (k, v) in &record.extra {
            map.entry(k.clone()).or_insert_with(|| v.clone());
        }
        map.retain(|_, v| !v.is_null());
    }
    meta
}

fn inline_bibtex(record: &RawRecord) -> Option<BibtexEntry> {
    let raw = record.bibtex.as_ref()?;
    if raw.fields.is_empty() && raw.key.is_none() {
        return None;
    }
    Some(BibtexEntry {
        entry_type: raw
            .entry_type
            .clone()
            .unwrap_or_else(|| "article".to_string()),
        key: raw.key.clone().unwrap_or_default(),
        fields: raw.fields.clone(),
    })
}

fn match_bib_entry<'a>(paper: &MergedPaper, entries: &'a [BibtexEntry]) -> Option<&'a BibtexEntry> {
    let paper_doi = paper.doi.as_deref().and_then(canonicalize_doi);
    if let Some(doi) = &paper_doi {
        if let Some(entry) = entries.iter().find(|e| {
            e.field("doi")
                .and_then(canonicalize_doi)
                .map(|d| d == *doi)
                .unwrap_or(false)
        }) {
            return Some(entry);
        }
    }
    let title_key = normalize_title_key(&paper.title);
    entries
        .iter()
        .find(|e| e.field("title").map(normalize_title_key).as_deref() == Some(&title_key))
}

/// Per-field enrichment: BibTeX values override extracted `year`, `month`,
/// `venue`, `doi`; extracted values fill everything else.
fn enrich_from_bibtex(paper: &mut MergedPaper) {
    let Some(entry) = paper.bibtex.clone() else {
        return;
    };
    if let Some(year) = entry.field("year").and_then(first_year_run) {
        paper.year = year;
    }
    if let Some(month) = entry.field("month").and_then(month_number) {
        paper.month = month;
    }
    if let Some(venue) = entry
        .field("journal")
        .or_else(|| entry.field("booktitle"))
        .or_else(|| entry.field("venue"))
    {
        if !venue.trim().is_empty() {
            paper.venue = venue.trim().to_string();
        }
    }
    if let Some(doi) = entry.field("doi").and_then(canonicalize_doi) {
        paper.doi = Some(doi);
    }
    if paper.arxiv_id.is_none() {
        let is_arxiv = entry
            .field("archiveprefix")
            .or_else(|| entry.field("eprinttype"))
            .map(|p| p.eq_ignore_ascii_case("arxiv"))
            .unwrap_or(false);
        if is_arxiv {
            paper.arxiv_id = entry.field("eprint").map(str::to_string);
        }
    }
}

/// `YYYY-MM...` prefix or a month name anywhere in the date string.
fn month_from_date(date: &str) -> Option<String> {
    let trimmed = date.trim();
    if trimmed.len() >= 7 && trimmed.as_bytes()[4] == b'-' {
        let mm = &trimmed[5..7];
        if let Some(m) = month_number(mm) {
            return Some(m);
        }
    }
    trimmed
        .split(|c: char| !c.is_alphanumeric())
        .find_map(month_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bibtex::parse_bibtex;
    use crate::input::InputCollection;

    fn record(title: &str, authors: &[&str]) -> RawRecord {
        RawRecord {
            paper_title: Some(title.to_string()),
            paper_authors: Some(authors.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    fn collection(tag: &str, records: Vec<RawRecord>) -> InputCollection {
        InputCollection {
            template_tag: tag.to_string(),
            records,
        }
    }

    #[test]
    fn test_merges_same_title_across_inputs() {
        let mut a = record("Attention Is All You Need", &["Vaswani"]);
        a.summary = Some("deep summary".into());
        let mut b = record("Attention is all you need!", &["Vaswani"]);
        b.summary = Some("quick summary".into());
        b.translations.insert("zh".into(), "trans/att.zh.md".into());

        let mut report = BuildReport::default();
        let merged = merge_inputs(
            vec![collection("deep_read", vec![a]), collection("quick", vec![b])],
            &[],
            &mut report,
        );
        assert_eq!(merged.len(), 1);
        let paper = &merged[0];
        assert_eq!(paper.available_templates(), vec!["deep_read", "quick"]);
        assert_eq!(paper.translations.len(), 1);
        // First input wins for scalars.
        assert_eq!(paper.title, "Attention Is All You Need");
        assert!(report.skipped_records.is_empty());
    }

    #[test]
    fn test_near_miss_titles_are_reported_not_merged() {
        // Identical except for one content word: similar enough to be
        // suspicious, too different to merge.
        let a = record("A Large Survey of Neural Network Pruning Methods One", &["X"]);
        let b = record("A Large Survey of Neural Network Pruning Methods Two!", &["Y"]);
        let mut report = BuildReport::default();
        let merged = merge_inputs(
            vec![collection("t", vec![a]), collection("t2", vec![b])],
            &[],
            &mut report,
        );
        assert_eq!(merged.len() + report.skipped_records.len(), 2);
    }

    #[test]
    fn test_distinct_titles_make_distinct_papers() {
        let a = record("Graph Attention Networks", &["V"]);
        let b = record("Quantum Supremacy Using a Programmable Processor", &["A"]);
        let mut report = BuildReport::default();
        let merged = merge_inputs(vec![collection("t", vec![a, b])], &[], &mut report);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_bibtex_file_enrichment_overrides_extracted_fields() {
        let mut rec = record("Attention Is All You Need", &["Vaswani"]);
        rec.publication_date = Some("2018-01-01".into());
        rec.publication_venue = Some("preprint server".into());
        let entries = parse_bibtex(
            r#"@inproceedings{vaswani2017,
                title = {Attention Is All You Need},
                booktitle = {NeurIPS},
                year = {2017},
                month = {dec},
                doi = {10.5555/3295222},
            }"#,
        )
        .unwrap();
        let mut report = BuildReport::default();
        let merged = merge_inputs(vec![collection("t", vec![rec])], &entries, &mut report);
        let paper = &merged[0];
        assert_eq!(paper.year, "2017");
        assert_eq!(paper.month, "12");
        assert_eq!(paper.venue, "NeurIPS");
        assert_eq!(paper.doi.as_deref(), Some("10.5555/3295222"));
        assert_eq!(paper.bibtex.as_ref().unwrap().key, "vaswani2017");
    }

    #[test]
    fn test_month_from_publication_date() {
        assert_eq!(month_from_date("2024-03-15").as_deref(), Some("03"));
        assert_eq!(month_from_date("March 2024").as_deref(), Some("03"));
        assert_eq!(month_from_date("2024").as_deref(), None);
    }
}
