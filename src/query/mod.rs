//! Search query engine
//!
//! Parses and rewrites queries (CJK-aware), executes ranked FTS5 queries
//! over the snapshot, and produces marker-delimited snippets.

pub mod engine;
pub mod parser;
pub mod rewrite;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum accepted query length, in characters.
pub const MAX_QUERY_LEN: usize = 500;
/// Maximum page size.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Deep-pagination bound: `page * page_size` may not exceed this.
pub const MAX_OFFSET: u64 = 10_000;
/// Page size applied when the request does not name one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Relevance,
    YearDesc,
    YearAsc,
    TitleAsc,
    TitleDesc,
    VenueAsc,
    VenueDesc,
}

/// Validated search/listing parameters.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub q: Option<String>,
    pub page: u32,
    pub page_size: u32,
    pub sort: SortOrder,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            q: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: SortOrder::Relevance,
        }
    }
}

impl SearchParams {
    /// Enforce the input limits. Violations carry the stable error codes
    /// the API returns as HTTP 400.
    pub fn validate(&self) -> Result<()> {
        if let Some(q) = &self.q {
            let len = q.chars().count();
            if len > MAX_QUERY_LEN {
                return Err(Error::QueryTooLong {
                    len,
                    max: MAX_QUERY_LEN,
                });
            }
        }
        if self.page == 0 {
            return Err(Error::InvalidQuery("page starts at 1".to_string()));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidQuery("page_size starts at 1".to_string()));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(Error::PageSizeTooLarge {
                page_size: self.page_size,
                max: MAX_PAGE_SIZE,
            });
        }
        if u64::from(self.page) * u64::from(self.page_size) > MAX_OFFSET {
            return Err(Error::OffsetTooLarge {
                page: self.page,
                page_size: self.page_size,
                max: MAX_OFFSET,
            });
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    /// The query string, if it carries any non-whitespace content.
    pub fn effective_q(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_boundaries() {
        let ok = SearchParams {
            q: Some("x".repeat(MAX_QUERY_LEN)),
            page: 100,
            page_size: 100,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let long_q = SearchParams {
            q: Some("x".repeat(MAX_QUERY_LEN + 1)),
            ..Default::default()
        };
        assert_eq!(long_q.validate().unwrap_err().code(), "q_too_long");

        let big_page = SearchParams {
            page_size: 101,
            ..Default::default()
        };
        assert_eq!(
            big_page.validate().unwrap_err().code(),
            "page_size_too_large"
        );

        let deep = SearchParams {
            page: 1001,
            page_size: 100,
            ..Default::default()
        };
        assert_eq!(deep.validate().unwrap_err().code(), "offset_too_large");
    }
}
