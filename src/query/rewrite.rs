//! CJK-aware rewriting of parsed terms into FTS5 match syntax
//!
//! The corpus is indexed with per-character CJK spacing, so query-side CJK
//! runs must become quoted phrases of spaced characters to match:
//! `深度学习` → `"深 度 学 习"`. Mixed-script tokens split at script
//! boundaries with the per-segment rule; Latin/digit segments pass through
//! verbatim (quoted only when they contain FTS-significant characters).

use crate::query::parser::Term;
use crate::textproc::is_cjk;

/// One segment of a token: a maximal same-script run.
enum Segment {
    Cjk(String),
    Other(String),
}

fn split_scripts(token: &str) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    for c in token.chars() {
        let cjk = is_cjk(c);
        match segments.last_mut() {
            Some(Segment::Cjk(run)) if cjk => run.push(c),
            Some(Segment::Other(run)) if !cjk => run.push(c),
            _ => segments.push(if cjk {
                Segment::Cjk(c.to_string())
            } else {
                Segment::Other(c.to_string())
            }),
        }
    }
    segments
}

/// Space the characters of a CJK run and quote it as one FTS phrase.
fn cjk_phrase(run: &str) -> String {
    let spaced: Vec<String> = run.chars().map(|c| c.to_string()).collect();
    format!("\"{}\"", spaced.join(" "))
}

/// Quote a token for FTS5 when it carries anything the query parser would
/// interpret; plain alphanumeric tokens pass through bare.
fn fts_escape(token: &str) -> String {
    if !token.is_empty() && token.chars().all(|c| c.is_alphanumeric()) {
        token.to_string()
    } else {
        format!("\"{}\"", token.replace('"', "\"\""))
    }
}

/// Rewrite one word token into FTS5 syntax. A token may expand into several
/// space-separated (AND-joined) units when scripts mix.
pub fn rewrite_word(word: &str) -> String {
    let units: Vec<String> = split_scripts(word)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Cjk(run) => Some(cjk_phrase(&run)),
            Segment::Other(run) => {
                let trimmed = run.trim();
                // A run with no word characters would tokenize to an empty
                // FTS phrase; drop it.
                if trimmed.chars().any(char::is_alphanumeric) {
                    Some(fts_escape(trimmed))
                } else {
                    None
                }
            }
        })
        .collect();
    units.join(" ")
}

/// Rewrite a quoted phrase: CJK runs inside the phrase get per-character
/// spacing, everything stays inside one FTS phrase.
pub fn rewrite_phrase(phrase: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for word in phrase.split_whitespace() {
        for segment in split_scripts(word) {
            match segment {
                Segment::Cjk(run) => {
                    parts.extend(run.chars().map(|c| c.to_string()));
                }
                Segment::Other(run) => parts.push(run),
            }
        }
    }
    if parts.iter().all(|p| !p.chars().any(char::is_alphanumeric)) {
        return String::new();
    }
    format!("\"{}\"", parts.join(" ").replace('"', "\"\""))
}

pub fn rewrite_term(term: &Term) -> String {
    match term {
        Term::Word(word) => rewrite_word(word),
        Term::Phrase(phrase) => rewrite_phrase(phrase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cjk_only_token_becomes_quoted_phrase() {
        assert_eq!(rewrite_word("深度学习"), "\"深 度 学 习\"");
    }

    #[test]
    fn test_latin_token_is_verbatim() {
        assert_eq!(rewrite_word("transformer"), "transformer");
        assert_eq!(rewrite_word("bert2024"), "bert2024");
    }

    #[test]
    fn test_mixed_token_splits_at_script_boundary() {
        assert_eq!(rewrite_word("深度学习transformer"), "\"深 度 学 习\" transformer");
        assert_eq!(rewrite_word("BERT模型"), "BERT \"模 型\"");
    }

    #[test]
    fn test_punctuated_latin_is_quoted() {
        assert_eq!(rewrite_word("10.1145/xyz"), "\"10.1145/xyz\"");
    }

    #[test]
    fn test_phrase_with_cjk_stays_single_phrase() {
        assert_eq!(rewrite_phrase("深度学习"), "\"深 度 学 习\"");
        assert_eq!(
            rewrite_phrase("graph attention"),
            "\"graph attention\""
        );
        assert_eq!(rewrite_phrase("深度 models"), "\"深 度 models\"");
    }
}
