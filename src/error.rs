//! Error types for paperdb

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Validation
    #[error("query too long: {len} chars (max {max})")]
    QueryTooLong { len: usize, max: usize },

    #[error("page_size too large: {page_size} (max {max})")]
    PageSizeTooLarge { page_size: u32, max: u32 },

    #[error("pagination offset too large: page {page} * page_size {page_size} exceeds {max}")]
    OffsetTooLarge { page: u32, page_size: u32, max: u64 },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unknown facet kind: {0}")]
    UnknownFacet(String),

    #[error("invalid MCP protocol version: {0}")]
    InvalidProtocolVersion(String),

    #[error("origin not allowed: {0}")]
    OriginNotAllowed(String),

    // Not found
    #[error("paper not found: {0}")]
    PaperNotFound(String),

    #[error("no BibTeX entry for paper: {0}")]
    BibtexNotFound(String),

    #[error("summary template {template:?} not available for paper {paper_id}")]
    TemplateNotAvailable {
        paper_id: String,
        template: String,
        available: Vec<String>,
    },

    #[error("asset missing: {0}")]
    AssetMissing(String),

    // Asset proxy
    #[error("asset fetch failed: {0}")]
    AssetFetchFailed(String),

    #[error("asset fetch timed out: {0}")]
    AssetFetchTimeout(String),

    // Build-time
    #[error("input missing template_tag: {0}")]
    TemplateTagMissing(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Error::Snapshot(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Stable machine-readable code, surfaced verbatim by the HTTP and MCP
    /// layers so clients can internationalize messages.
    pub fn code(&self) -> &'static str {
        match self {
            Error::QueryTooLong { .. } => "q_too_long",
            Error::PageSizeTooLarge { .. } => "page_size_too_large",
            Error::OffsetTooLarge { .. } => "offset_too_large",
            Error::InvalidQuery(_) => "invalid_query",
            Error::UnknownFacet(_) => "unknown_facet",
            Error::InvalidProtocolVersion(_) => "invalid_protocol_version",
            Error::OriginNotAllowed(_) => "origin_not_allowed",
            Error::PaperNotFound(_) => "paper_not_found",
            Error::BibtexNotFound(_) => "bibtex_not_found",
            Error::TemplateNotAvailable { .. } => "template_not_available",
            Error::AssetMissing(_) => "asset_missing",
            Error::AssetFetchFailed(_) => "asset_fetch_failed",
            Error::AssetFetchTimeout(_) => "asset_fetch_timeout",
            Error::TemplateTagMissing(_) => "template_tag_missing",
            Error::InvalidInput(_) => "invalid_input",
            Error::Snapshot(_) => "snapshot_error",
            Error::Db(_) => "database_error",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
            Error::Http(_) => "http_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether this error is a request-validation failure (HTTP 400 class).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::QueryTooLong { .. }
                | Error::PageSizeTooLarge { .. }
                | Error::OffsetTooLarge { .. }
                | Error::InvalidQuery(_)
                | Error::UnknownFacet(_)
                | Error::InvalidProtocolVersion(_)
        )
    }

    /// Whether this error is a not-found failure (HTTP 404 class).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::PaperNotFound(_)
                | Error::BibtexNotFound(_)
                | Error::TemplateNotAvailable { .. }
                | Error::AssetMissing(_)
        )
    }
}
