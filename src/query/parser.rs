//! Search query parsing
//!
//! Grammar: whitespace-separated atoms with `AND` / `OR` operators (implicit
//! `AND`), double-quoted phrases, unary `-` negation, and field filters
//! (`title:`, `author:`, `tag:`, `venue:`, `year:`, `month:`) including
//! `year:2020..2024` ranges. CJK punctuation separates tokens exactly like
//! ASCII whitespace. `OR` binds looser than the implicit `AND`, so
//! `a b OR c` parses as `(a AND b) OR c`.

use crate::textproc::is_cjk_punct;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Word(String),
    Phrase(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Author,
    Tag,
    Venue,
    Year,
    Month,
}

impl Field {
    fn parse(name: &str) -> Option<Field> {
        match name {
            "title" => Some(Field::Title),
            "author" => Some(Field::Author),
            "tag" => Some(Field::Tag),
            "venue" => Some(Field::Venue),
            "year" => Some(Field::Year),
            "month" => Some(Field::Month),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Exact(String),
    /// Inclusive `year:2020..2024` range.
    Range(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    pub field: Field,
    pub value: FieldValue,
}

/// A parsed query: OR-alternatives of AND-lists, negated terms, and field
/// filters (always conjunctive).
#[derive(Debug, Clone, Default)]
pub struct ParsedQuery {
    pub clauses: Vec<Vec<Term>>,
    pub negatives: Vec<Term>,
    pub filters: Vec<FieldFilter>,
}

impl ParsedQuery {
    pub fn has_positive_terms(&self) -> bool {
        self.clauses.iter().any(|c| !c.is_empty())
    }

    /// True when the query is a bare term list: single AND-clause of words,
    /// no phrases, negation, or filters. Only such queries get the
    /// trigram-index fallback.
    pub fn is_plain(&self) -> bool {
        self.negatives.is_empty()
            && self.filters.is_empty()
            && self.clauses.len() == 1
            && self
                .clauses
                .iter()
                .flatten()
                .all(|t| matches!(t, Term::Word(_)))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RawToken {
    Or,
    And,
    Negated(String),
    NegatedPhrase(String),
    Phrase(String),
    Word(String),
}

pub fn parse_query(q: &str) -> Result<ParsedQuery> {
    let tokens = tokenize(q)?;
    let mut parsed = ParsedQuery::default();
    let mut current: Vec<Term> = Vec::new();

    for token in tokens {
        match token {
            RawToken::Or => {
                if !current.is_empty() {
                    parsed.clauses.push(std::mem::take(&mut current));
                }
            }
            RawToken::And => {} // implicit
            RawToken::Negated(word) => parsed.negatives.push(Term::Word(word)),
            RawToken::NegatedPhrase(phrase) => parsed.negatives.push(Term::Phrase(phrase)),
            RawToken::Phrase(phrase) => current.push(Term::Phrase(phrase)),
            RawToken::Word(word) => match split_field(&word) {
                Some((field, value)) => parsed.filters.push(parse_filter(field, &value)?),
                None => current.push(Term::Word(word)),
            },
        }
    }
    if !current.is_empty() {
        parsed.clauses.push(current);
    }

    if !parsed.negatives.is_empty() && !parsed.has_positive_terms() {
        return Err(Error::InvalidQuery(
            "negation requires at least one positive term".to_string(),
        ));
    }
    if !parsed.has_positive_terms() && parsed.filters.is_empty() {
        return Err(Error::InvalidQuery("empty query".to_string()));
    }
    Ok(parsed)
}

fn tokenize(q: &str) -> Result<Vec<RawToken>> {
    // CJK punctuation separates tokens like whitespace does.
    let cleaned: String = q
        .chars()
        .map(|c| if is_cjk_punct(c) && c != '"' { ' ' } else { c })
        .collect();

    let chars: Vec<char> = cleaned.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let negated = c == '-' && matches!(chars.get(i + 1), Some(n) if !n.is_whitespace());
        if negated {
            i += 1;
        }
        if chars[i] == '"' {
            let close = chars[i + 1..]
                .iter()
                .position(|&c| c == '"')
                .ok_or_else(|| Error::InvalidQuery("unbalanced quote".to_string()))?;
            let phrase: String = chars[i + 1..i + 1 + close].iter().collect();
            let phrase = phrase.trim().to_string();
            if !phrase.is_empty() {
                tokens.push(if negated {
                    RawToken::NegatedPhrase(phrase)
                } else {
                    RawToken::Phrase(phrase)
                });
            }
            i += close + 2;
            continue;
        }
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '"' {
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();
        match word.as_str() {
            "AND" if !negated => tokens.push(RawToken::And),
            "OR" if !negated => tokens.push(RawToken::Or),
            _ => tokens.push(if negated {
                RawToken::Negated(word)
            } else {
                RawToken::Word(word)
            }),
        }
    }
    Ok(tokens)
}

/// `field:value` when the prefix names a known field; the colon must not be
/// the first or last character.
fn split_field(word: &str) -> Option<(Field, String)> {
    let (name, value) = word.split_once(':')?;
    let field = Field::parse(&name.to_lowercase())?;
    if value.is_empty() {
        return None;
    }
    Some((field, value.to_string()))
}

fn parse_filter(field: Field, value: &str) -> Result<FieldFilter> {
    let value = value.trim_matches('"');
    if field == Field::Year {
        if let Some((from, to)) = value.split_once("..") {
            if !is_year(from) || !is_year(to) {
                return Err(Error::InvalidQuery(format!(
                    "invalid year range: {value}"
                )));
            }
            return Ok(FieldFilter {
                field,
                value: FieldValue::Range(from.to_string(), to.to_string()),
            });
        }
    }
    Ok(FieldFilter {
        field,
        value: FieldValue::Exact(value.to_string()),
    })
}

fn is_year(s: &str) -> bool {
    s.len() == 4 && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_terms_are_one_clause() {
        let q = parse_query("deep learning").unwrap();
        assert_eq!(q.clauses.len(), 1);
        assert_eq!(
            q.clauses[0],
            vec![Term::Word("deep".into()), Term::Word("learning".into())]
        );
        assert!(q.is_plain());
    }

    #[test]
    fn test_or_splits_clauses() {
        let q = parse_query("bert OR gpt transformer").unwrap();
        assert_eq!(q.clauses.len(), 2);
        assert_eq!(q.clauses[0], vec![Term::Word("bert".into())]);
        assert_eq!(
            q.clauses[1],
            vec![Term::Word("gpt".into()), Term::Word("transformer".into())]
        );
    }

    #[test]
    fn test_phrase_and_negation() {
        let q = parse_query("\"graph attention\" -survey").unwrap();
        assert_eq!(q.clauses[0], vec![Term::Phrase("graph attention".into())]);
        assert_eq!(q.negatives, vec![Term::Word("survey".into())]);
        assert!(!q.is_plain());
    }

    #[test]
    fn test_field_filters() {
        let q = parse_query("attention year:2020..2024 venue:NeurIPS tag:nlp").unwrap();
        assert_eq!(q.filters.len(), 3);
        assert_eq!(
            q.filters[0],
            FieldFilter {
                field: Field::Year,
                value: FieldValue::Range("2020".into(), "2024".into()),
            }
        );
        assert_eq!(q.filters[1].field, Field::Venue);
        assert_eq!(q.filters[2].field, Field::Tag);
    }

    #[test]
    fn test_cjk_punctuation_separates() {
        let q = parse_query("深度学习，注意力").unwrap();
        assert_eq!(q.clauses[0].len(), 2);
    }

    #[test]
    fn test_negation_only_is_invalid() {
        assert!(parse_query("-survey").is_err());
    }

    #[test]
    fn test_unbalanced_quote_is_invalid() {
        assert!(parse_query("\"unclosed").is_err());
    }

    #[test]
    fn test_unknown_field_prefix_is_a_word() {
        let q = parse_query("doi:10.1145/xyz").unwrap();
        assert_eq!(q.clauses[0], vec![Term::Word("doi:10.1145/xyz".into())]);
    }
}
