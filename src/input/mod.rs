//! Input collection loading
//!
//! An input collection is a JSON file holding either a bare array of
//! extracted paper records or `{"template_tag": "...", "papers": [...]}`.
//! Records are heterogeneous: a required core (title + authors, under either
//! of two accepted field names) plus optional extraction metadata; unknown
//! fields ride along in an attributes map and end up in the summary JSON.

pub mod merge;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::{Error, Result};

pub use merge::{merge_inputs, MergedPaper, SummaryRecord};

/// One extracted paper record as found in an input file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawRecord {
    pub paper_title: Option<String>,
    pub title: Option<String>,
    pub paper_authors: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub publication_date: Option<String>,
    pub publication_venue: Option<String>,
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    pub keywords: Vec<String>,
    pub institutions: Vec<String>,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub output_language: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_template: Option<String>,
    pub source_path: Option<String>,
    pub pdf_path: Option<String>,
    pub translations: BTreeMap<String, String>,
    pub images: Vec<String>,
    pub bibtex: Option<RawBibtex>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RawRecord {
    /// Record title; `bibtex.fields.title` is preferred for merging, this is
    /// the extracted display title.
    pub fn display_title(&self) -> Option<&str> {
        self.paper_title
            .as_deref()
            .or(self.title.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Title used for cross-input matching: BibTeX first, extracted second.
    pub fn preferred_title(&self) -> Option<&str> {
        self.bibtex
            .as_ref()
            .and_then(|b| b.fields.get("title"))
            .map(String::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| self.display_title())
    }

    pub fn author_list(&self) -> &[String] {
        self.paper_authors
            .as_deref()
            .or(self.authors.as_deref())
            .unwrap_or(&[])
    }

    /// The summary body for this record's template: `summary` with
    /// `abstract` as fallback.
    pub fn summary_markdown(&self) -> Option<&str> {
        self.summary
            .as_deref()
            .or(self.abstract_text.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    fn validate(&self, input_name: &str, index: usize) -> Result<()> {
        if self.display_title().is_none() {
            return Err(Error::invalid_input(format!(
                "{input_name}: record {index} has no paper_title/title"
            )));
        }
        if self.author_list().is_empty() {
            return Err(Error::invalid_input(format!(
                "{input_name}: record {index} has no paper_authors/authors"
            )));
        }
        Ok(())
    }
}

/// Inline BibTeX metadata attached by the extractor.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawBibtex {
    pub entry_type: Option<String>,
    pub key: Option<String>,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CollectionFile {
    Tagged {
        template_tag: String,
        papers: Vec<RawRecord>,
    },
    Bare(Vec<RawRecord>),
}

/// A loaded input collection: records plus the summary-template tag they
/// belong to.
#[derive(Debug)]
pub struct InputCollection {
    pub template_tag: String,
    pub records: Vec<RawRecord>,
}

/// Load one input collection from disk.
///
/// A bare array is accepted only when the tag can be inferred from record
/// shape: every record carrying the same `prompt_template`. Otherwise the
/// input is rejected with `template_tag_missing` — snapshots consumed by
/// the API must know which template each summary came from.
pub fn load_collection(path: &Path) -> Result<InputCollection> {
    let name = path.display().to_string();
    let data = fs::read_to_string(path)
        .map_err(|e| Error::invalid_input(format!("{name}: {e}")))?;
    let parsed: CollectionFile = serde_json::from_str(&data)
        .map_err(|e| Error::invalid_input(format!("{name}: {e}")))?;

    let (template_tag, records) = match parsed {
        CollectionFile::Tagged {
            template_tag,
            papers,
        } => (template_tag, papers),
        CollectionFile::Bare(records) => {
            let tag = infer_template_tag(&records)
                .ok_or_else(|| Error::TemplateTagMissing(name.clone()))?;
            (tag, records)
        }
    };

    for (index, record) in records.iter().enumerate() {
        record.validate(&name, index)?;
    }
    tracing::debug!(input = %name, tag = %template_tag, records = records.len(), "loaded input collection");
    Ok(InputCollection {
        template_tag,
        records,
    })
}

/// Infer a template tag from record shape: unanimous `prompt_template`.
fn infer_template_tag(records: &[RawRecord]) -> Option<String> {
    let first = records.first()?.prompt_template.clone()?;
    records
        .iter()
        .all(|r| r.prompt_template.as_deref() == Some(first.as_str()))
        .then_some(first)
}
