//! MCP tools
//!
//! Each tool carries a title, description, and JSON-Schema input. Content
//! responses are extracted text; agents never receive URLs to chase.
//! Domain failures (unknown paper, missing template) come back as tool
//! results with `isError` and a structured JSON payload, so the calling
//! model can recover; only malformed requests become JSON-RPC errors.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::handlers::resolve_template;
use crate::api::SharedState;
use crate::facet::FacetKind;
use crate::mcp::{truncate_with_marker, RpcFailure, DEFAULT_MAX_CHARS};
use crate::query::engine::{execute_search, facet_scoped_list, SearchOutcome};
use crate::query::{SearchParams, SortOrder};
use crate::snapshot::store::{fetch_paper, has_bibtex};
use crate::snapshot::PaperRow;
use crate::{Error, Result};

/// Hard cap on tool search results.
const MAX_TOOL_LIMIT: u32 = 50;
const DEFAULT_TOOL_LIMIT: u32 = 10;

pub fn tool_descriptors() -> Vec<Value> {
    vec![
        json!({
            "name": "search_papers",
            "title": "Search papers",
            "description": "Full-text search over titles, authors, summaries, extracted source text and translations. Supports quoted phrases, AND/OR, -negation, and field filters (title:, author:, tag:, venue:, year:).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": MAX_TOOL_LIMIT, "description": "Maximum results (default 10)"},
                },
                "required": ["query"],
            },
        }),
        json!({
            "name": "search_papers_by_keyword",
            "title": "Search papers by keyword or tag",
            "description": "List papers carrying an exact keyword or tag value.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "keyword": {"type": "string", "description": "Keyword or tag value"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": MAX_TOOL_LIMIT},
                },
                "required": ["keyword"],
            },
        }),
        json!({
            "name": "list_top_facets",
            "title": "List top facet values",
            "description": "Top values of one facet dimension (author, venue, keyword, tag, year, ...) with paper counts.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "category": {"type": "string", "description": "Facet kind, e.g. author, venue, keyword, tag, year"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                },
                "required": ["category"],
            },
        }),
        json!({
            "name": "get_paper_metadata",
            "title": "Get paper metadata",
            "description": "Full metadata for one paper: identifiers, venue, templates, translation languages, BibTeX availability.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "paper_id": {"type": "string", "description": "32-hex paper id"},
                },
                "required": ["paper_id"],
            },
        }),
        json!({
            "name": "get_paper_summary",
            "title": "Get paper summary",
            "description": "Extracted summary text for a paper. Uses the paper's preferred template unless one is named.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "paper_id": {"type": "string"},
                    "template": {"type": "string", "description": "Summary template tag"},
                    "max_chars": {"type": "integer", "minimum": 1},
                },
                "required": ["paper_id"],
            },
        }),
        json!({
            "name": "get_paper_source",
            "title": "Get paper source markdown",
            "description": "Extracted source markdown of the paper. May be large; pass max_chars to bound the response.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "paper_id": {"type": "string"},
                    "max_chars": {"type": "integer", "minimum": 1},
                },
                "required": ["paper_id"],
            },
        }),
        json!({
            "name": "get_paper_bibtex",
            "title": "Get paper BibTeX",
            "description": "The persisted BibTeX entry for a paper.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "paper_id": {"type": "string"},
                },
                "required": ["paper_id"],
            },
        }),
    ]
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub async fn call_tool(state: &SharedState, params: &Value) -> std::result::Result<Value, RpcFailure> {
    let call: ToolCall = serde_json::from_value(params.clone())
        .map_err(|e| RpcFailure::invalid_params(format!("invalid tools/call params: {e}")))?;

    let outcome = match call.name.as_str() {
        "search_papers" => search_papers(state, call.arguments).await,
        "search_papers_by_keyword" => search_by_keyword(state, call.arguments).await,
        "list_top_facets" => list_top_facets(state, call.arguments).await,
        "get_paper_metadata" => paper_metadata(state, call.arguments).await,
        "get_paper_summary" => paper_summary(state, call.arguments).await,
        "get_paper_source" => paper_source(state, call.arguments).await,
        "get_paper_bibtex" => paper_bibtex(state, call.arguments).await,
        other => {
            return Err(RpcFailure::invalid_params(format!("unknown tool: {other}")))
        }
    };

    match outcome {
        Ok(ToolOutcome::Args(err)) => Err(RpcFailure::invalid_params(err)),
        Ok(ToolOutcome::Text(text)) => Ok(tool_result(text, false)),
        Err(err) => Ok(tool_result(error_payload(&err).to_string(), true)),
    }
}

enum ToolOutcome {
    Text(String),
    /// Argument-shape problem detected after dispatch.
    Args(String),
}

fn tool_result(text: String, is_error: bool) -> Value {
    json!({
        "content": [{"type": "text", "text": text}],
        "isError": is_error,
    })
}

/// Structured error payload with contextual identifiers where applicable.
fn error_payload(err: &Error) -> Value {
    let mut payload = json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    match err {
        Error::PaperNotFound(id) | Error::BibtexNotFound(id) => {
            payload["paper_id"] = json!(id);
        }
        Error::TemplateNotAvailable {
            paper_id,
            template,
            available,
        } => {
            payload["paper_id"] = json!(paper_id);
            payload["template"] = json!(template);
            payload["available_summary_templates"] = json!(available);
        }
        _ => {}
    }
    payload
}

fn parse_args<T: serde::de::DeserializeOwned>(
    arguments: Value,
) -> std::result::Result<T, ToolOutcome> {
    serde_json::from_value(arguments).map_err(|e| ToolOutcome::Args(format!("invalid arguments: {e}")))
}

fn limit_of(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_TOOL_LIMIT).clamp(1, MAX_TOOL_LIMIT)
}

fn hits_json(outcome: &SearchOutcome, with_snippets: bool) -> Value {
    let items: Vec<Value> = outcome
        .hits
        .iter()
        .map(|hit| {
            let mut item = json!({
                "paper_id": hit.paper.paper_id,
                "title": hit.paper.title,
                "year": hit.paper.year,
                "venue": hit.paper.venue,
            });
            if with_snippets {
                item["snippet_markdown"] = json!(hit.snippet_markdown);
            }
            item
        })
        .collect();
    json!({"total": outcome.total, "items": items})
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    limit: Option<u32>,
}

async fn search_papers(
    state: &SharedState,
    arguments: Value,
) -> Result<ToolOutcome> {
    let args: SearchArgs = match parse_args(arguments) {
        Ok(a) => a,
        Err(out) => return Ok(out),
    };
    let params = SearchParams {
        q: Some(args.query),
        page: 1,
        page_size: limit_of(args.limit),
        sort: SortOrder::Relevance,
    };
    let outcome = state
        .store
        .with_conn(move |conn| execute_search(conn, &params))
        .await?;
    Ok(ToolOutcome::Text(hits_json(&outcome, true).to_string()))
}

#[derive(Debug, Deserialize)]
struct KeywordArgs {
    keyword: String,
    limit: Option<u32>,
}

async fn search_by_keyword(
    state: &SharedState,
    arguments: Value,
) -> Result<ToolOutcome> {
    let args: KeywordArgs = match parse_args(arguments) {
        Ok(a) => a,
        Err(out) => return Ok(out),
    };
    let params = SearchParams {
        q: None,
        page: 1,
        page_size: limit_of(args.limit),
        sort: SortOrder::YearDesc,
    };
    let outcome = state
        .store
        .with_conn(move |conn| {
            // Tags take precedence; fall back to keyword values.
            for kind in [FacetKind::Tag, FacetKind::Keyword] {
                if let Some(value) = crate::stats::resolve_value(conn, kind, &args.keyword)? {
                    return facet_scoped_list(conn, kind, value.id, &params);
                }
            }
            Ok(SearchOutcome::default())
        })
        .await?;
    Ok(ToolOutcome::Text(hits_json(&outcome, false).to_string()))
}

#[derive(Debug, Deserialize)]
struct TopFacetsArgs {
    category: String,
    limit: Option<u32>,
}

async fn list_top_facets(
    state: &SharedState,
    arguments: Value,
) -> Result<ToolOutcome> {
    let args: TopFacetsArgs = match parse_args(arguments) {
        Ok(a) => a,
        Err(out) => return Ok(out),
    };
    let kind: FacetKind = args.category.parse()?;
    let limit = args.limit.unwrap_or(DEFAULT_TOOL_LIMIT).clamp(1, 100);
    let list = state
        .store
        .with_conn(move |conn| crate::stats::list_facet(conn, kind, 1, limit))
        .await?;
    let values: Vec<Value> = list
        .values
        .iter()
        .map(|v| json!({"value": v.display, "paper_count": v.paper_count}))
        .collect();
    Ok(ToolOutcome::Text(
        json!({"facet_type": list.facet_type, "total": list.total, "values": values}).to_string(),
    ))
}

#[derive(Debug, Deserialize)]
struct PaperArgs {
    paper_id: String,
}

async fn paper_metadata(
    state: &SharedState,
    arguments: Value,
) -> Result<ToolOutcome> {
    let args: PaperArgs = match parse_args(arguments) {
        Ok(a) => a,
        Err(out) => return Ok(out),
    };
    let id = args.paper_id.clone();
    let (paper, with_bibtex) = state
        .store
        .with_conn(move |conn| {
            let paper = fetch_paper(conn, &id)?;
            let with_bibtex = has_bibtex(conn, &id);
            Ok((paper, with_bibtex))
        })
        .await?;
    Ok(ToolOutcome::Text(metadata_json(&paper, with_bibtex).to_string()))
}

pub fn metadata_json(paper: &PaperRow, with_bibtex: bool) -> Value {
    json!({
        "paper_id": paper.paper_id,
        "title": paper.title,
        "authors": paper.authors,
        "year": paper.year,
        "month": paper.month,
        "venue": paper.venue,
        "doi": paper.doi,
        "keywords": paper.keywords,
        "institutions": paper.institutions,
        "tags": paper.tags,
        "preferred_summary_template": paper.preferred_summary_template,
        "available_summary_templates": paper.available_summary_templates,
        "translation_langs": paper.translation_langs(),
        "has_bibtex": with_bibtex,
    })
}

#[derive(Debug, Deserialize)]
struct SummaryArgs {
    paper_id: String,
    template: Option<String>,
    max_chars: Option<usize>,
}

async fn paper_summary(
    state: &SharedState,
    arguments: Value,
) -> Result<ToolOutcome> {
    let args: SummaryArgs = match parse_args(arguments) {
        Ok(a) => a,
        Err(out) => return Ok(out),
    };
    let text = summary_text(
        state,
        &args.paper_id,
        args.template.as_deref(),
        args.max_chars.unwrap_or(DEFAULT_MAX_CHARS),
    )
    .await?;
    Ok(ToolOutcome::Text(text))
}

/// Fetch and extract the summary text for one paper/template.
pub async fn summary_text(
    state: &SharedState,
    paper_id: &str,
    template: Option<&str>,
    max_chars: usize,
) -> Result<String> {
    let paper = state.store.paper(paper_id).await?;
    let template = resolve_template(&paper, template)?;
    let body = state
        .fetcher
        .fetch_json(&format!("summary/{paper_id}/{template}.json"))
        .await?;
    let summary = body
        .get("summary")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::AssetFetchFailed(format!("summary/{paper_id}/{template}.json has no summary text"))
        })?;
    Ok(truncate_with_marker(summary, max_chars))
}

#[derive(Debug, Deserialize)]
struct SourceArgs {
    paper_id: String,
    max_chars: Option<usize>,
}

async fn paper_source(
    state: &SharedState,
    arguments: Value,
) -> Result<ToolOutcome> {
    let args: SourceArgs = match parse_args(arguments) {
        Ok(a) => a,
        Err(out) => return Ok(out),
    };
    let text = source_text(
        state,
        &args.paper_id,
        args.max_chars.unwrap_or(DEFAULT_MAX_CHARS),
    )
    .await?;
    Ok(ToolOutcome::Text(text))
}

/// Fetch the extracted source markdown for a paper.
pub async fn source_text(state: &SharedState, paper_id: &str, max_chars: usize) -> Result<String> {
    let paper = state.store.paper(paper_id).await?;
    let hash = paper
        .source_content_hash
        .ok_or_else(|| Error::AssetMissing(format!("source markdown for {paper_id}")))?;
    let text = state.fetcher.fetch_text(&format!("md/{hash}.md")).await?;
    Ok(truncate_with_marker(&text, max_chars))
}

/// Fetch a translation's markdown for a paper.
pub async fn translation_text(
    state: &SharedState,
    paper_id: &str,
    lang: &str,
    max_chars: usize,
) -> Result<String> {
    let paper = state.store.paper(paper_id).await?;
    let hash = paper.translations.get(lang).cloned().ok_or_else(|| {
        Error::AssetMissing(format!("translation {lang} for {paper_id}"))
    })?;
    let text = state
        .fetcher
        .fetch_text(&format!("md_translate/{lang}/{hash}.md"))
        .await?;
    Ok(truncate_with_marker(&text, max_chars))
}

async fn paper_bibtex(
    state: &SharedState,
    arguments: Value,
) -> Result<ToolOutcome> {
    let args: PaperArgs = match parse_args(arguments) {
        Ok(a) => a,
        Err(out) => return Ok(out),
    };
    let row = state.store.bibtex(&args.paper_id).await?;
    Ok(ToolOutcome::Text(
        json!({
            "paper_id": row.paper_id,
            "doi": row.doi,
            "bibtex_key": row.bibtex_key,
            "entry_type": row.entry_type,
            "bibtex_raw": row.bibtex_raw,
        })
        .to_string(),
    ))
}
