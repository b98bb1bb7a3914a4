//! MCP resources
//!
//! Resources live under `paper://{paper_id}/...` and resolve the static
//! asset location internally, returning content rather than URLs. Reads are
//! bounded by the default truncation limit.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::SharedState;
use crate::mcp::tools::{metadata_json, source_text, summary_text, translation_text};
use crate::mcp::{RpcFailure, DEFAULT_MAX_CHARS};
use crate::snapshot::store::{fetch_paper, has_bibtex};
use crate::Error;

/// JSON-RPC error code for an unknown resource, per MCP convention.
const RESOURCE_NOT_FOUND: i64 = -32002;

pub fn resource_templates() -> Vec<Value> {
    vec![
        json!({
            "uriTemplate": "paper://{paper_id}/metadata",
            "name": "Paper metadata",
            "description": "Full metadata for one paper as JSON.",
            "mimeType": "application/json",
        }),
        json!({
            "uriTemplate": "paper://{paper_id}/summary",
            "name": "Paper summary (preferred template)",
            "description": "Extracted summary text using the paper's preferred template.",
            "mimeType": "text/markdown",
        }),
        json!({
            "uriTemplate": "paper://{paper_id}/summary/{template}",
            "name": "Paper summary (specific template)",
            "description": "Extracted summary text for a named template.",
            "mimeType": "text/markdown",
        }),
        json!({
            "uriTemplate": "paper://{paper_id}/source",
            "name": "Paper source markdown",
            "description": "Extracted source markdown. Reads are truncated at the default limit.",
            "mimeType": "text/markdown",
        }),
        json!({
            "uriTemplate": "paper://{paper_id}/translation/{lang}",
            "name": "Paper translation",
            "description": "Translated markdown for one language.",
            "mimeType": "text/markdown",
        }),
    ]
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    uri: String,
}

pub async fn read_resource(
    state: &SharedState,
    params: &Value,
) -> std::result::Result<Value, RpcFailure> {
    let read: ReadParams = serde_json::from_value(params.clone())
        .map_err(|e| RpcFailure::invalid_params(format!("invalid resources/read params: {e}")))?;

    let parsed = parse_uri(&read.uri)
        .ok_or_else(|| RpcFailure::invalid_params(format!("unsupported resource uri: {}", read.uri)))?;

    let result = fetch(state, &parsed).await;
    match result {
        Ok((mime, text)) => Ok(json!({
            "contents": [{
                "uri": read.uri,
                "mimeType": mime,
                "text": text,
            }],
        })),
        Err(err) if err.is_not_found() => Err(RpcFailure {
            code: RESOURCE_NOT_FOUND,
            message: err.to_string(),
            data: Some(json!({"error": err.code(), "uri": read.uri})),
        }),
        Err(err) => Err(RpcFailure::internal(&err)),
    }
}

#[derive(Debug, PartialEq)]
enum Resource {
    Metadata,
    Summary(Option<String>),
    Source,
    Translation(String),
}

struct ParsedUri {
    paper_id: String,
    resource: Resource,
}

fn parse_uri(uri: &str) -> Option<ParsedUri> {
    let rest = uri.strip_prefix("paper://")?;
    let (paper_id, resource_path) = rest.split_once('/')?;
    if paper_id.is_empty() {
        return None;
    }
    let resource = match resource_path {
        "metadata" => Resource::Metadata,
        "summary" => Resource::Summary(None),
        "source" => Resource::Source,
        other => {
            if let Some(template) = other.strip_prefix("summary/") {
                Resource::Summary(Some(template.to_string()))
            } else if let Some(lang) = other.strip_prefix("translation/") {
                Resource::Translation(lang.to_string())
            } else {
                return None;
            }
        }
    };
    Some(ParsedUri {
        paper_id: paper_id.to_string(),
        resource,
    })
}

async fn fetch(state: &SharedState, parsed: &ParsedUri) -> crate::Result<(&'static str, String)> {
    let paper_id = &parsed.paper_id;
    match &parsed.resource {
        Resource::Metadata => {
            let id = paper_id.clone();
            let (paper, with_bibtex) = state
                .store
                .with_conn(move |conn| {
                    let paper = fetch_paper(conn, &id)?;
                    let with_bibtex = has_bibtex(conn, &id);
                    Ok((paper, with_bibtex))
                })
                .await?;
            Ok((
                "application/json",
                metadata_json(&paper, with_bibtex).to_string(),
            ))
        }
        Resource::Summary(template) => {
            let text =
                summary_text(state, paper_id, template.as_deref(), DEFAULT_MAX_CHARS).await?;
            Ok(("text/markdown", text))
        }
        Resource::Source => {
            let text = source_text(state, paper_id, DEFAULT_MAX_CHARS).await?;
            Ok(("text/markdown", text))
        }
        Resource::Translation(lang) => {
            if lang.is_empty() {
                return Err(Error::AssetMissing(format!(
                    "translation language missing for {paper_id}"
                )));
            }
            let text = translation_text(state, paper_id, lang, DEFAULT_MAX_CHARS).await?;
            Ok(("text/markdown", text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uris() {
        let p = parse_uri("paper://abc123/metadata").unwrap();
        assert_eq!(p.paper_id, "abc123");
        assert_eq!(p.resource, Resource::Metadata);

        let p = parse_uri("paper://abc123/summary/deep_read").unwrap();
        assert_eq!(p.resource, Resource::Summary(Some("deep_read".to_string())));

        let p = parse_uri("paper://abc123/translation/zh").unwrap();
        assert_eq!(p.resource, Resource::Translation("zh".to_string()));

        assert!(parse_uri("paper://abc123/pdf").is_none());
        assert!(parse_uri("https://example.com/x").is_none());
        assert!(parse_uri("paper://abc123").is_none());
    }
}
