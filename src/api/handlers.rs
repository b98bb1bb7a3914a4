//! API handlers

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::urls::UrlResolver;
use crate::api::{ApiResult, SharedState};
use crate::facet::{FacetKind, FacetValue};
use crate::query::engine::{execute_search, facet_scoped_list, SearchOutcome};
use crate::query::{SearchParams, SortOrder, DEFAULT_PAGE_SIZE};
use crate::snapshot::store::{fetch_paper, has_bibtex, BibtexRow};
use crate::snapshot::PaperRow;
use crate::stats;
use crate::Error;

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_facet_page_size() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
pub struct SearchQueryParams {
    pub q: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub sort: SortOrder,
}

impl SearchQueryParams {
    fn into_params(self) -> SearchParams {
        SearchParams {
            q: self.q,
            page: self.page,
            page_size: self.page_size,
            sort: self.sort,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchItem {
    pub paper_id: String,
    pub title: String,
    pub year: String,
    pub month: String,
    pub venue: String,
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet_markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_preview: Option<String>,
    pub has_pdf: bool,
    pub has_source: bool,
    pub translation_langs: Vec<String>,
    pub available_summary_templates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_md_url: Option<String>,
    pub translation_urls: BTreeMap<String, String>,
    pub summary_urls: BTreeMap<String, String>,
    pub manifest_url: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub has_more: bool,
    pub items: Vec<SearchItem>,
}

fn search_item(paper: PaperRow, snippet: Option<String>, urls: &UrlResolver) -> SearchItem {
    SearchItem {
        has_pdf: paper.pdf_content_hash.is_some(),
        has_source: paper.source_content_hash.is_some(),
        translation_langs: paper.translation_langs(),
        available_summary_templates: paper.available_summary_templates.clone(),
        pdf_url: paper.pdf_content_hash.as_deref().map(|h| urls.pdf_url(h)),
        source_md_url: paper
            .source_content_hash
            .as_deref()
            .map(|h| urls.source_md_url(h)),
        translation_urls: urls.translation_urls(&paper),
        summary_urls: urls.summary_urls(&paper),
        manifest_url: urls.manifest_url(&paper.paper_id),
        paper_id: paper.paper_id,
        title: paper.title,
        year: paper.year,
        month: paper.month,
        venue: paper.venue,
        authors: paper.authors,
        snippet_markdown: snippet,
        summary_preview: paper.summary_preview,
    }
}

fn search_response(
    outcome: SearchOutcome,
    params: &SearchParams,
    urls: &UrlResolver,
) -> SearchResponse {
    let has_more = params.offset() + (outcome.hits.len() as u64) < outcome.total;
    SearchResponse {
        page: params.page,
        page_size: params.page_size,
        total: outcome.total,
        has_more,
        items: outcome
            .hits
            .into_iter()
            .map(|hit| search_item(hit.paper, hit.snippet_markdown, urls))
            .collect(),
    }
}

/// GET /api/v1/search
pub async fn search(
    State(state): State<SharedState>,
    Query(query): Query<SearchQueryParams>,
) -> ApiResult<SearchResponse> {
    let params = query.into_params();
    // Limit violations never reach the database.
    params.validate()?;
    let exec = params.clone();
    let outcome = state
        .store
        .with_conn(move |conn| execute_search(conn, &exec))
        .await?;
    Ok(Json(search_response(outcome, &params, &state.urls)))
}

#[derive(Debug, Serialize)]
pub struct PaperDetail {
    #[serde(flatten)]
    pub paper: PaperRow,
    pub has_bibtex: bool,
    pub translation_langs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_md_url: Option<String>,
    pub translation_urls: BTreeMap<String, String>,
    pub summary_urls: BTreeMap<String, String>,
    pub manifest_url: String,
}

/// GET /api/v1/papers/{paper_id}
pub async fn paper_detail(
    State(state): State<SharedState>,
    Path(paper_id): Path<String>,
) -> ApiResult<PaperDetail> {
    let id = paper_id.clone();
    let (paper, with_bibtex) = state
        .store
        .with_conn(move |conn| {
            let paper = fetch_paper(conn, &id)?;
            let with_bibtex = has_bibtex(conn, &id);
            Ok((paper, with_bibtex))
        })
        .await?;
    let urls = &state.urls;
    Ok(Json(PaperDetail {
        has_bibtex: with_bibtex,
        translation_langs: paper.translation_langs(),
        pdf_url: paper.pdf_content_hash.as_deref().map(|h| urls.pdf_url(h)),
        source_md_url: paper
            .source_content_hash
            .as_deref()
            .map(|h| urls.source_md_url(h)),
        translation_urls: urls.translation_urls(&paper),
        summary_urls: urls.summary_urls(&paper),
        manifest_url: urls.manifest_url(&paper.paper_id),
        paper,
    }))
}

/// GET /api/v1/papers/{paper_id}/bibtex
pub async fn paper_bibtex(
    State(state): State<SharedState>,
    Path(paper_id): Path<String>,
) -> ApiResult<BibtexRow> {
    let row = state.store.bibtex(&paper_id).await?;
    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQueryParams {
    pub template: Option<String>,
}

/// GET /api/v1/papers/{paper_id}/summary?template=…
///
/// Proxies the summary JSON from the static asset layer; an omitted
/// template means the paper's preferred one.
pub async fn paper_summary(
    State(state): State<SharedState>,
    Path(paper_id): Path<String>,
    Query(query): Query<SummaryQueryParams>,
) -> ApiResult<serde_json::Value> {
    let paper = state.store.paper(&paper_id).await?;
    let template = resolve_template(&paper, query.template.as_deref())?;
    let body = state
        .fetcher
        .fetch_json(&format!("summary/{paper_id}/{template}.json"))
        .await?;
    Ok(Json(body))
}

/// Pick the effective summary template for a paper, or fail with the
/// available list.
pub fn resolve_template(paper: &PaperRow, requested: Option<&str>) -> Result<String, Error> {
    let available = &paper.available_summary_templates;
    let template = match requested {
        Some(t) => t.to_string(),
        None => paper
            .preferred_summary_template
            .clone()
            .or_else(|| available.first().cloned())
            .unwrap_or_default(),
    };
    if available.iter().any(|t| t == &template) {
        Ok(template)
    } else {
        Err(Error::TemplateNotAvailable {
            paper_id: paper.paper_id.clone(),
            template,
            available: available.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct FacetPageParams {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_facet_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub sort: SortOrder,
}

/// GET /api/v1/facets/{kind}
pub async fn facet_list(
    State(state): State<SharedState>,
    Path(kind): Path<String>,
    Query(query): Query<FacetPageParams>,
) -> ApiResult<stats::FacetList> {
    let kind: FacetKind = kind.parse()?;
    let params = SearchParams {
        q: None,
        page: query.page,
        page_size: query.page_size,
        sort: SortOrder::Relevance,
    };
    params.validate()?;
    let list = state
        .store
        .with_conn(move |conn| stats::list_facet(conn, kind, params.page, params.page_size))
        .await?;
    Ok(Json(list))
}

/// GET /api/v1/facets/{kind}/{id}/papers
pub async fn facet_papers_by_id(
    State(state): State<SharedState>,
    Path((kind, facet_id)): Path<(String, i64)>,
    Query(query): Query<FacetPageParams>,
) -> ApiResult<SearchResponse> {
    let kind: FacetKind = kind.parse()?;
    let params = SearchParams {
        q: None,
        page: query.page,
        page_size: query.page_size,
        sort: query.sort,
    };
    params.validate()?;
    let exec = params.clone();
    let outcome = state
        .store
        .with_conn(move |conn| facet_scoped_list(conn, kind, facet_id, &exec))
        .await?;
    Ok(Json(search_response(outcome, &params, &state.urls)))
}

/// GET /api/v1/facets/{kind}/by-value/{value}/papers
pub async fn facet_papers_by_value(
    State(state): State<SharedState>,
    Path((kind, value)): Path<(String, String)>,
    Query(query): Query<FacetPageParams>,
) -> ApiResult<SearchResponse> {
    let kind: FacetKind = kind.parse()?;
    let params = SearchParams {
        q: None,
        page: query.page,
        page_size: query.page_size,
        sort: query.sort,
    };
    params.validate()?;
    let exec = params.clone();
    let outcome = state
        .store
        .with_conn(move |conn| {
            match stats::resolve_value(conn, kind, &value)? {
                Some(FacetValue { id, .. }) => facet_scoped_list(conn, kind, id, &exec),
                None => Ok(SearchOutcome::default()),
            }
        })
        .await?;
    Ok(Json(search_response(outcome, &params, &state.urls)))
}

/// GET /api/v1/facets/{kind}/by-value/{value}/stats
pub async fn facet_value_stats(
    State(state): State<SharedState>,
    Path((kind, value)): Path<(String, String)>,
) -> ApiResult<stats::FacetStats> {
    let kind: FacetKind = kind.parse()?;
    let result = state
        .store
        .with_conn(move |conn| stats::facet_stats(conn, kind, &value))
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
pub struct GlobalStatsResponse {
    pub snapshot_build_id: String,
    #[serde(flatten)]
    pub stats: stats::GlobalStats,
}

/// GET /api/v1/stats
pub async fn global_stats(State(state): State<SharedState>) -> ApiResult<GlobalStatsResponse> {
    let result = state.store.with_conn(stats::global_stats).await?;
    Ok(Json(GlobalStatsResponse {
        snapshot_build_id: state.store.snapshot_build_id().to_string(),
        stats: result,
    }))
}

#[derive(Debug, Serialize)]
pub struct RuntimeConfig {
    pub static_base_url: String,
    pub snapshot_build_id: String,
    pub api_version: String,
}

/// GET /api/v1/config — runtime settings the front-end needs.
pub async fn runtime_config(State(state): State<SharedState>) -> ApiResult<RuntimeConfig> {
    Ok(Json(RuntimeConfig {
        static_base_url: state.urls.base().to_string(),
        snapshot_build_id: state.store.snapshot_build_id().to_string(),
        api_version: "v1".to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub papers: u64,
    pub snapshot_build_id: String,
}

/// Health check with snapshot status
pub async fn health(State(state): State<SharedState>) -> ApiResult<HealthResponse> {
    let papers = state.store.paper_count().await?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        papers,
        snapshot_build_id: state.store.snapshot_build_id().to_string(),
    }))
}
