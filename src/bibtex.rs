//! Minimal BibTeX reader and deterministic entry rendering
//!
//! Parses the subset of BibTeX the extraction pipeline emits: `@type{key,
//! field = {value}, ...}` entries with braced, quoted, or bare values and
//! `#` concatenation. `@comment`, `@preamble`, and `@string` blocks are
//! skipped. Rendering is deterministic (stable field order, normalized
//! whitespace) so rebuilt snapshots carry identical entry text; it is not
//! required to be byte-identical to the source file.

use std::collections::BTreeMap;

use crate::textproc::collapse_whitespace;
use crate::{Error, Result};

/// Field order used when rendering; anything not listed follows
/// alphabetically.
const RENDER_ORDER: [&str; 12] = [
    "title", "author", "year", "month", "journal", "booktitle", "venue", "doi", "volume",
    "number", "pages", "publisher",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibtexEntry {
    pub entry_type: String,
    pub key: String,
    pub fields: BTreeMap<String, String>,
}

impl BibtexEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Deterministic single-entry text.
    pub fn render(&self) -> String {
        let mut ordered: Vec<(&String, &String)> = Vec::with_capacity(self.fields.len());
        for name in RENDER_ORDER {
            if let Some(pair) = self.fields.get_key_value(name) {
                ordered.push(pair);
            }
        }
        for pair in &self.fields {
            if !RENDER_ORDER.contains(&pair.0.as_str()) {
                ordered.push(pair);
            }
        }
        let mut out = format!("@{}{{{},\n", self.entry_type, self.key);
        for (name, value) in ordered {
            out.push_str(&format!("  {name} = {{{value}}},\n"));
        }
        out.push('}');
        out
    }
}

/// Parse every entry in a `.bib` document.
pub fn parse_bibtex(input: &str) -> Result<Vec<BibtexEntry>> {
    let chars: Vec<char> = input.chars().collect();
    let mut entries = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '@' {
            i += 1;
            continue;
        }
        i += 1;
        let type_start = i;
        while i < chars.len() && chars[i] != '{' && chars[i] != '(' {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        let entry_type: String = chars[type_start..i]
            .iter()
            .collect::<String>()
            .trim()
            .to_lowercase();
        i += 1; // consume '{'

        if matches!(entry_type.as_str(), "comment" | "preamble" | "string") {
            i = skip_balanced(&chars, i)?;
            continue;
        }

        let key_start = i;
        while i < chars.len() && chars[i] != ',' && chars[i] != '}' {
            i += 1;
        }
        let key: String = chars[key_start..i].iter().collect::<String>().trim().to_string();
        if key.is_empty() {
            return Err(Error::invalid_input("BibTeX entry without a citation key"));
        }
        let mut fields = BTreeMap::new();
        if i < chars.len() && chars[i] == ',' {
            i += 1;
            i = parse_fields(&chars, i, &mut fields)?;
        } else if i < chars.len() {
            i += 1; // consume '}'
        }
        entries.push(BibtexEntry {
            entry_type,
            key,
            fields,
        });
    }
    Ok(entries)
}

fn parse_fields(
    chars: &[char],
    mut i: usize,
    fields: &mut BTreeMap<String, String>,
) -> Result<usize> {
    loop {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            return Err(Error::invalid_input("unterminated BibTeX entry"));
        }
        if chars[i] == '}' {
            return Ok(i + 1);
        }
        let name_start = i;
        while i < chars.len() && chars[i] != '=' && chars[i] != '}' && chars[i] != ',' {
            i += 1;
        }
        if i >= chars.len() || chars[i] != '=' {
            return Err(Error::invalid_input("malformed BibTeX field"));
        }
        let name: String = chars[name_start..i]
            .iter()
            .collect::<String>()
            .trim()
            .to_lowercase();
        i += 1;

        // Value: one or more `#`-joined parts.
        let mut value = String::new();
        loop {
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if i >= chars.len() {
                return Err(Error::invalid_input("unterminated BibTeX value"));
            }
            let (part, next) = parse_value_part(chars, i)?;
            value.push_str(&part);
            i = next;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if i < chars.len() && chars[i] == '#' {
                i += 1;
            } else {
                break;
            }
        }
        if !name.is_empty() {
            fields.insert(name, collapse_whitespace(&value));
        }
    }
}

fn parse_value_part(chars: &[char], mut i: usize) -> Result<(String, usize)> {
    match chars[i] {
        '{' => {
            let start = i + 1;
            let end = find_balanced_close(chars, i)?;
            let inner: String = chars[start..end].iter().collect();
            Ok((strip_braces(&inner), end + 1))
        }
        '"' => {
            i += 1;
            let start = i;
            let mut depth = 0usize;
            while i < chars.len() {
                match chars[i] {
                    '{' => depth += 1,
                    '}' => depth = depth.saturating_sub(1),
                    '"' if depth == 0 => break,
                    _ => {}
                }
                i += 1;
            }
            if i >= chars.len() {
                return Err(Error::invalid_input("unterminated quoted BibTeX value"));
            }
            let inner: String = chars[start..i].iter().collect();
            Ok((strip_braces(&inner), i + 1))
        }
        _ => {
            let start = i;
            while i < chars.len() && !matches!(chars[i], ',' | '}' | '#') && !chars[i].is_whitespace()
            {
                i += 1;
            }
            Ok((chars[start..i].iter().collect(), i))
        }
    }
}

/// Index just past the closing brace matching the one already consumed at
/// `open - 1`... i.e. `i` points at the first char inside the block.
fn skip_balanced(chars: &[char], mut i: usize) -> Result<usize> {
    let mut depth = 1usize;
    while i < chars.len() {
        match chars[i] {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(Error::invalid_input("unbalanced braces in BibTeX input"))
}

/// Given `i` at an opening brace, return the index of its matching close.
fn find_balanced_close(chars: &[char], i: usize) -> Result<usize> {
    let mut depth = 0usize;
    for (offset, &c) in chars[i..].iter().enumerate() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + offset);
                }
            }
            _ => {}
        }
    }
    Err(Error::invalid_input("unbalanced braces in BibTeX value"))
}

/// Remove protective braces from a value, keeping inner text.
fn strip_braces(s: &str) -> String {
    s.chars().filter(|&c| c != '{' && c != '}').collect()
}

/// Map a BibTeX month (name, abbreviation, or number) to `01`..`12`.
pub fn month_number(raw: &str) -> Option<String> {
    let lowered = raw.trim().trim_matches(['{', '}', '"']).to_lowercase();
    let n = match lowered.as_str() {
        "jan" | "january" | "1" | "01" => 1,
        "feb" | "february" | "2" | "02" => 2,
        "mar" | "march" | "3" | "03" => 3,
        "apr" | "april" | "4" | "04" => 4,
        "may" | "5" | "05" => 5,
        "jun" | "june" | "6" | "06" => 6,
        "jul" | "july" | "7" | "07" => 7,
        "aug" | "august" | "8" | "08" => 8,
        "sep" | "sept" | "september" | "9" | "09" => 9,
        "oct" | "october" | "10" => 10,
        "nov" | "november" | "11" => 11,
        "dec" | "december" | "12" => 12,
        _ => return None,
    };
    Some(format!("{n:02}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
% a stray comment line
@comment{ignored completely}
@article{vaswani2017attention,
  title   = {Attention Is All You Need},
  author  = "Vaswani, Ashish and Shazeer, Noam",
  year    = 2017,
  month   = jun,
  journal = {NeurIPS},
  doi     = {10.5555/3295222}
}
@inproceedings{he2016deep,
  title = {Deep {Residual} Learning},
  year = {2016},
}
"#;

    #[test]
    fn test_parse_entries() {
        let entries = parse_bibtex(SAMPLE).unwrap();
        assert_eq!(entries.len(), 2);
        let first = &entries[0];
        assert_eq!(first.entry_type, "article");
        assert_eq!(first.key, "vaswani2017attention");
        assert_eq!(first.field("title"), Some("Attention Is All You Need"));
        assert_eq!(
            first.field("author"),
            Some("Vaswani, Ashish and Shazeer, Noam")
        );
        assert_eq!(first.field("year"), Some("2017"));
        assert_eq!(first.field("month"), Some("jun"));
    }

    #[test]
    fn test_nested_braces_stripped() {
        let entries = parse_bibtex(SAMPLE).unwrap();
        assert_eq!(entries[1].field("title"), Some("Deep Residual Learning"));
    }

    #[test]
    fn test_render_is_deterministic_and_ordered() {
        let entries = parse_bibtex(SAMPLE).unwrap();
        let text = entries[0].render();
        assert!(text.starts_with("@article{vaswani2017attention,"));
        let title_pos = text.find("title").unwrap();
        let author_pos = text.find("author").unwrap();
        let doi_pos = text.find("doi").unwrap();
        assert!(title_pos < author_pos && author_pos < doi_pos);
        assert_eq!(text, entries[0].render());
    }

    #[test]
    fn test_month_number() {
        assert_eq!(month_number("jun").as_deref(), Some("06"));
        assert_eq!(month_number("{December}").as_deref(), Some("12"));
        assert_eq!(month_number("3").as_deref(), Some("03"));
        assert_eq!(month_number("smarch"), None);
    }
}
