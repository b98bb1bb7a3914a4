//! Query execution over the snapshot FTS tables
//!
//! Ranked FTS5 matching with bm25 column weights favoring title and summary
//! over source/translated content, marker-delimited snippets with the
//! index-time CJK spacing removed, deterministic title tie-breaks, and a
//! trigram fallback for plain queries that miss the main corpus entirely.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::bibtex::month_number;
use crate::facet::{facet_match_key, FacetKind};
use crate::query::parser::{parse_query, Field, FieldValue, ParsedQuery, Term};
use crate::query::rewrite::{rewrite_phrase, rewrite_term};
use crate::query::{SearchParams, SortOrder};
use crate::snapshot::{PaperRow, PAPER_COLUMNS};
use crate::textproc::despace_cjk;
use crate::Result;

/// bm25 column weights for `search_index`, in declared column order
/// (`paper_id` is unindexed and weighted zero): title and summary dominate,
/// authors/venue/meta matter, source and translated text trail.
const BM25_WEIGHTS: &str = "0.0, 10.0, 4.0, 4.0, 3.0, 8.0, 1.0, 1.0";
/// Snippet window, in tokens.
const SNIPPET_TOKENS: u32 = 16;
/// Minimum query length for the trigram fallback to be meaningful.
const TRIGRAM_MIN_CHARS: usize = 3;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub paper: PaperRow,
    pub snippet_markdown: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

/// Execute a search or, for an empty query, a plain listing under the
/// requested sort.
pub fn execute_search(conn: &Connection, params: &SearchParams) -> Result<SearchOutcome> {
    params.validate()?;
    match params.effective_q() {
        None => listing(conn, params, None),
        Some(q) => {
            let parsed = parse_query(q)?;
            let outcome = fts_search(conn, &parsed, params)?;
            if outcome.total == 0
                && parsed.is_plain()
                && q.chars().count() >= TRIGRAM_MIN_CHARS
            {
                return trigram_search(conn, &parsed, params);
            }
            Ok(outcome)
        }
    }
}

/// Listing of papers carrying one facet value, under the requested sort.
pub fn facet_scoped_list(
    conn: &Connection,
    kind: FacetKind,
    facet_id: i64,
    params: &SearchParams,
) -> Result<SearchOutcome> {
    params.validate()?;
    let scope = Filter {
        condition: "EXISTS (SELECT 1 FROM paper_facets pf \
                    WHERE pf.paper_id = p.paper_id AND pf.kind = ? AND pf.facet_id = ?)"
            .to_string(),
        values: vec![
            Value::Text(kind.as_str().to_string()),
            Value::Integer(facet_id),
        ],
    };
    listing(conn, params, Some(scope))
}

struct Filter {
    condition: String,
    values: Vec<Value>,
}

/// Build the FTS5 match expression for a parsed query, or `None` when the
/// query consists of SQL-side filters only.
fn build_match_expr(parsed: &ParsedQuery) -> Option<String> {
    let clauses: Vec<String> = parsed
        .clauses
        .iter()
        .map(|clause| {
            clause
                .iter()
                .map(rewrite_term)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" AND ")
        })
        .filter(|c| !c.is_empty())
        .collect();

    let mut expr = match clauses.len() {
        0 => None,
        1 => Some(clauses.into_iter().next().unwrap_or_default()),
        _ => Some(
            clauses
                .iter()
                .map(|c| format!("({c})"))
                .collect::<Vec<_>>()
                .join(" OR "),
        ),
    };

    // Column filters live in the match expression.
    let mut column_units: Vec<String> = Vec::new();
    for filter in &parsed.filters {
        let column = match filter.field {
            Field::Title => "title",
            Field::Author => "authors",
            Field::Venue => "venue",
            _ => continue,
        };
        if let FieldValue::Exact(value) = &filter.value {
            let phrase = rewrite_phrase(value);
            if !phrase.is_empty() {
                column_units.push(format!("{column} : ({phrase})"));
            }
        }
    }
    if !column_units.is_empty() {
        let units = column_units.join(" AND ");
        expr = Some(match expr {
            Some(e) => format!("({e}) AND {units}"),
            None => units,
        });
    }

    if let Some(mut e) = expr {
        for negative in &parsed.negatives {
            let rewritten = rewrite_term(negative);
            if !rewritten.is_empty() {
                e = format!("({e}) NOT ({rewritten})");
            }
        }
        return Some(e);
    }
    None
}

/// SQL-side filters (year, month, tag) that the FTS expression cannot carry.
fn build_sql_filters(parsed: &ParsedQuery) -> Vec<Filter> {
    let mut filters = Vec::new();
    for filter in &parsed.filters {
        match (filter.field, &filter.value) {
            (Field::Year, FieldValue::Exact(value)) => filters.push(Filter {
                condition: "p.year = ?".to_string(),
                values: vec![Value::Text(value.clone())],
            }),
            (Field::Year, FieldValue::Range(from, to)) => filters.push(Filter {
                condition: "p.year BETWEEN ? AND ?".to_string(),
                values: vec![Value::Text(from.clone()), Value::Text(to.clone())],
            }),
            (Field::Month, FieldValue::Exact(value)) => {
                let month = month_number(value).unwrap_or_else(|| {
                    if value.eq_ignore_ascii_case("unknown") {
                        "Unknown".to_string()
                    } else {
                        value.clone()
                    }
                });
                filters.push(Filter {
                    condition: "p.month = ?".to_string(),
                    values: vec![Value::Text(month)],
                });
            }
            (Field::Tag, FieldValue::Exact(value)) => {
                let key = facet_match_key(value).unwrap_or_default();
                filters.push(Filter {
                    condition: "EXISTS (SELECT 1 FROM paper_facets pf \
                                JOIN facet_values fv ON fv.kind = pf.kind AND fv.id = pf.facet_id \
                                WHERE pf.paper_id = p.paper_id AND pf.kind = 'tag' AND fv.value = ?)"
                        .to_string(),
                    values: vec![Value::Text(key)],
                });
            }
            _ => {}
        }
    }
    filters
}

fn prefixed_columns() -> String {
    PAPER_COLUMNS
        .split(", ")
        .map(|c| format!("p.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// ORDER BY clause. Every sort ends on title ascending so pagination is a
/// total order within one snapshot.
fn order_clause(sort: SortOrder, ranked: bool) -> &'static str {
    match (sort, ranked) {
        (SortOrder::Relevance, true) => "score, p.title COLLATE NOCASE ASC",
        // An unranked relevance listing falls back to newest-first.
        (SortOrder::Relevance, false) | (SortOrder::YearDesc, _) => {
            "CASE WHEN p.year = 'unknown' THEN 1 ELSE 0 END, p.year DESC, \
             p.title COLLATE NOCASE ASC"
        }
        (SortOrder::YearAsc, _) => {
            "CASE WHEN p.year = 'unknown' THEN 1 ELSE 0 END, p.year ASC, \
             p.title COLLATE NOCASE ASC"
        }
        (SortOrder::TitleAsc, _) => "p.title COLLATE NOCASE ASC",
        (SortOrder::TitleDesc, _) => "p.title COLLATE NOCASE DESC",
        (SortOrder::VenueAsc, _) => "p.venue COLLATE NOCASE ASC, p.title COLLATE NOCASE ASC",
        (SortOrder::VenueDesc, _) => "p.venue COLLATE NOCASE DESC, p.title COLLATE NOCASE ASC",
    }
}

fn fts_search(
    conn: &Connection,
    parsed: &ParsedQuery,
    params: &SearchParams,
) -> Result<SearchOutcome> {
    let match_expr = build_match_expr(parsed);
    let sql_filters = build_sql_filters(parsed);

    let Some(match_expr) = match_expr else {
        // Filter-only query: a listing constrained by the SQL filters.
        return listing_filtered(conn, params, sql_filters);
    };

    let mut where_clause = String::from("search_index MATCH ?");
    let mut values: Vec<Value> = vec![Value::Text(match_expr)];
    for filter in &sql_filters {
        where_clause.push_str(" AND ");
        where_clause.push_str(&filter.condition);
        values.extend(filter.values.iter().cloned());
    }

    let count_sql = format!(
        "SELECT COUNT(*) FROM search_index \
         JOIN papers p ON p.paper_id = search_index.paper_id \
         WHERE {where_clause}"
    );
    let total: i64 = conn.query_row(
        &count_sql,
        params_from_iter(values.iter()),
        |r| r.get(0),
    )?;

    let page_sql = format!(
        "SELECT {cols}, \
         snippet(search_index, -1, '[[[', ']]]', '…', {SNIPPET_TOKENS}) AS snip, \
         bm25(search_index, {BM25_WEIGHTS}) AS score \
         FROM search_index \
         JOIN papers p ON p.paper_id = search_index.paper_id \
         WHERE {where_clause} \
         ORDER BY {order} \
         LIMIT ? OFFSET ?",
        cols = prefixed_columns(),
        order = order_clause(params.sort, true),
    );
    values.push(Value::Integer(i64::from(params.page_size)));
    values.push(Value::Integer(params.offset() as i64));

    let mut stmt = conn.prepare(&page_sql)?;
    let snippet_col = PAPER_COLUMNS.split(", ").count();
    let hits = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            let paper = PaperRow::from_row(row)?;
            let snippet: Option<String> = row.get(snippet_col)?;
            Ok(SearchHit {
                paper,
                snippet_markdown: snippet.map(|s| despace_cjk(&s)),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(SearchOutcome {
        total: total as u64,
        hits,
    })
}

/// Typo-tolerant retry over title and venue when the main corpus finds
/// nothing for a plain query.
fn trigram_search(
    conn: &Connection,
    parsed: &ParsedQuery,
    params: &SearchParams,
) -> Result<SearchOutcome> {
    let words: Vec<String> = parsed
        .clauses
        .iter()
        .flatten()
        .filter_map(|t| match t {
            Term::Word(w) if w.chars().count() >= TRIGRAM_MIN_CHARS => {
                Some(format!("\"{}\"", w.replace('"', "\"\"")))
            }
            _ => None,
        })
        .collect();
    if words.is_empty() {
        return Ok(SearchOutcome::default());
    }
    let match_expr = words.join(" AND ");

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM title_trigram WHERE title_trigram MATCH ?1",
        [&match_expr],
        |r| r.get(0),
    )?;
    let page_sql = format!(
        "SELECT {cols}, \
         snippet(title_trigram, -1, '[[[', ']]]', '…', {SNIPPET_TOKENS}) AS snip, \
         bm25(title_trigram) AS score \
         FROM title_trigram \
         JOIN papers p ON p.paper_id = title_trigram.paper_id \
         WHERE title_trigram MATCH ?1 \
         ORDER BY {order} \
         LIMIT ?2 OFFSET ?3",
        cols = prefixed_columns(),
        order = order_clause(params.sort, true),
    );
    let mut stmt = conn.prepare(&page_sql)?;
    let snippet_col = PAPER_COLUMNS.split(", ").count();
    let hits = stmt
        .query_map(
            rusqlite::params![
                match_expr,
                i64::from(params.page_size),
                params.offset() as i64
            ],
            |row| {
                let paper = PaperRow::from_row(row)?;
                let snippet: Option<String> = row.get(snippet_col)?;
                Ok(SearchHit {
                    paper,
                    snippet_markdown: snippet.map(|s| despace_cjk(&s)),
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(SearchOutcome {
        total: total as u64,
        hits,
    })
}

fn listing(
    conn: &Connection,
    params: &SearchParams,
    scope: Option<Filter>,
) -> Result<SearchOutcome> {
    listing_filtered(conn, params, scope.into_iter().collect())
}

fn listing_filtered(
    conn: &Connection,
    params: &SearchParams,
    filters: Vec<Filter>,
) -> Result<SearchOutcome> {
    let mut where_clause = String::new();
    let mut values: Vec<Value> = Vec::new();
    for (index, filter) in filters.iter().enumerate() {
        where_clause.push_str(if index == 0 { " WHERE " } else { " AND " });
        where_clause.push_str(&filter.condition);
        values.extend(filter.values.iter().cloned());
    }

    let count_sql = format!("SELECT COUNT(*) FROM papers p{where_clause}");
    let total: i64 = conn.query_row(
        &count_sql,
        params_from_iter(values.iter()),
        |r| r.get(0),
    )?;

    let page_sql = format!(
        "SELECT {cols} FROM papers p{where_clause} ORDER BY {order} LIMIT ? OFFSET ?",
        cols = prefixed_columns(),
        order = order_clause(params.sort, false),
    );
    values.push(Value::Integer(i64::from(params.page_size)));
    values.push(Value::Integer(params.offset() as i64));

    let mut stmt = conn.prepare(&page_sql)?;
    let hits = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(SearchHit {
                paper: PaperRow::from_row(row)?,
                snippet_markdown: None,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(SearchOutcome {
        total: total as u64,
        hits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_query;

    #[test]
    fn test_cjk_only_query_is_quoted_phrase() {
        let parsed = parse_query("深度学习").unwrap();
        assert_eq!(build_match_expr(&parsed).unwrap(), "\"深 度 学 习\"");
    }

    #[test]
    fn test_mixed_script_query() {
        let parsed = parse_query("深度学习 transformer").unwrap();
        assert_eq!(
            build_match_expr(&parsed).unwrap(),
            "\"深 度 学 习\" AND transformer"
        );
    }

    #[test]
    fn test_or_and_negation_expression() {
        let parsed = parse_query("bert OR gpt -survey").unwrap();
        assert_eq!(
            build_match_expr(&parsed).unwrap(),
            "((bert) OR (gpt)) NOT (survey)"
        );
    }

    #[test]
    fn test_column_filter_in_match() {
        let parsed = parse_query("title:attention").unwrap();
        assert_eq!(
            build_match_expr(&parsed).unwrap(),
            "title : (\"attention\")"
        );
    }

    #[test]
    fn test_year_range_is_sql_side() {
        let parsed = parse_query("attention year:2020..2024").unwrap();
        let filters = build_sql_filters(&parsed);
        assert_eq!(filters.len(), 1);
        assert!(filters[0].condition.contains("BETWEEN"));
    }
}
