//! Facet kinds and value normalization
//!
//! A facet is a named metadata dimension (author, venue, ...) with
//! normalized values and per-value paper counts. All facet kinds share the
//! same storage shape; this module is the single place that enumerates them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::textproc::normalize_value;
use crate::Error;

/// Every facet dimension the snapshot indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetKind {
    Author,
    Institution,
    Venue,
    Keyword,
    Tag,
    Year,
    Month,
    SummaryTemplate,
    OutputLanguage,
    Provider,
    Model,
    PromptTemplate,
    TranslationLang,
}

impl FacetKind {
    pub const ALL: [FacetKind; 13] = [
        FacetKind::Author,
        FacetKind::Institution,
        FacetKind::Venue,
        FacetKind::Keyword,
        FacetKind::Tag,
        FacetKind::Year,
        FacetKind::Month,
        FacetKind::SummaryTemplate,
        FacetKind::OutputLanguage,
        FacetKind::Provider,
        FacetKind::Model,
        FacetKind::PromptTemplate,
        FacetKind::TranslationLang,
    ];

    /// Storage identifier, also the URL path segment under `/facets/`.
    pub fn as_str(self) -> &'static str {
        match self {
            FacetKind::Author => "author",
            FacetKind::Institution => "institution",
            FacetKind::Venue => "venue",
            FacetKind::Keyword => "keyword",
            FacetKind::Tag => "tag",
            FacetKind::Year => "year",
            FacetKind::Month => "month",
            FacetKind::SummaryTemplate => "summary_template",
            FacetKind::OutputLanguage => "output_language",
            FacetKind::Provider => "provider",
            FacetKind::Model => "model",
            FacetKind::PromptTemplate => "prompt_template",
            FacetKind::TranslationLang => "translation_lang",
        }
    }

    /// Human-readable label for UI consumption.
    pub fn label(self) -> &'static str {
        match self {
            FacetKind::Author => "Author",
            FacetKind::Institution => "Institution",
            FacetKind::Venue => "Venue",
            FacetKind::Keyword => "Keyword",
            FacetKind::Tag => "Tag",
            FacetKind::Year => "Year",
            FacetKind::Month => "Month",
            FacetKind::SummaryTemplate => "Summary template",
            FacetKind::OutputLanguage => "Output language",
            FacetKind::Provider => "Provider",
            FacetKind::Model => "Model",
            FacetKind::PromptTemplate => "Prompt template",
            FacetKind::TranslationLang => "Translation language",
        }
    }

    /// Whether the display string preserves original casing. Year, month and
    /// language codes are already canonical; everything else keeps the
    /// first-seen casing for display while matching on the normalized form.
    pub fn display_preserves_case(self) -> bool {
        !matches!(
            self,
            FacetKind::Year | FacetKind::Month | FacetKind::TranslationLang
        )
    }
}

impl fmt::Display for FacetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FacetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FacetKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::UnknownFacet(s.to_string()))
    }
}

/// A facet value as stored in the snapshot: facet-scoped numeric id, the
/// normalized match key, the display form, and the number of papers carrying
/// the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetValue {
    pub id: i64,
    pub value: String,
    pub display: String,
    pub paper_count: u64,
}

/// Normalize a raw facet value into its match key: NFKC, lowercased,
/// whitespace collapsed. Returns `None` for values that normalize to empty.
pub fn facet_match_key(raw: &str) -> Option<String> {
    let key = normalize_value(raw);
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_kind_names() {
        for kind in FacetKind::ALL {
            assert_eq!(kind.as_str().parse::<FacetKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_error() {
        assert!("citations".parse::<FacetKind>().is_err());
    }

    #[test]
    fn test_match_key_collapses_and_lowercases() {
        assert_eq!(
            facet_match_key("  Deep   Learning ").as_deref(),
            Some("deep learning")
        );
        assert_eq!(facet_match_key("   "), None);
    }
}
