//! Paperdb - paper snapshot search and retrieval core
//!
//! Paperdb ingests extracted paper records (metadata, summaries, source
//! markdown, translations) plus optional BibTeX and provides:
//! - A snapshot builder producing a portable SQLite database and a
//!   content-addressed static asset tree
//! - Stable paper identity across rebuilds (DOI/arXiv/BibTeX/metadata keys)
//! - CJK-aware full-text search with faceted browse
//! - A versioned read-only HTTP API and an MCP Streamable-HTTP tool surface

pub mod api;
pub mod assets;
pub mod bibtex;
pub mod build;
pub mod config;
pub mod error;
pub mod facet;
pub mod identity;
pub mod input;
pub mod mcp;
pub mod query;
pub mod report;
pub mod snapshot;
pub mod stats;
pub mod textproc;

pub use error::{Error, Result};
