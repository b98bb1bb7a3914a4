//! Plain-text extraction and CJK-aware text processing
//!
//! Pure functions shared by the snapshot writer (index-time corpus
//! construction) and the query engine (query rewriting, snippet cleanup).
//! Everything here is deterministic and side-effect free.

use unicode_normalization::UnicodeNormalization;

/// Sentinel characters standing in for the literal snippet markers while
/// CJK spacing is stripped. Private-use codepoints never occur in corpus text.
const MARK_OPEN: char = '\u{E000}';
const MARK_CLOSE: char = '\u{E001}';

/// Opening snippet highlight marker.
pub const SNIPPET_OPEN: &str = "[[[";
/// Closing snippet highlight marker.
pub const SNIPPET_CLOSE: &str = "]]]";

/// True for characters indexed per-character: Han ideographs (including
/// extensions and compatibility forms), kana, and Hangul syllables.
pub fn is_cjk(c: char) -> bool {
    matches!(u32::from(c),
        0x3400..=0x4DBF      // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xF900..=0xFAFF    // CJK compatibility ideographs
        | 0x20000..=0x2EBEF  // CJK extensions B..F
        | 0x3040..=0x309F    // hiragana
        | 0x30A0..=0x30FF    // katakana
        | 0xAC00..=0xD7AF    // hangul syllables
    )
}

/// CJK punctuation and fullwidth forms are query separators, equivalent to
/// ASCII whitespace during tokenization.
pub fn is_cjk_punct(c: char) -> bool {
    matches!(u32::from(c),
        0x3000..=0x303F      // CJK symbols and punctuation (、。「」【】 ...)
        | 0xFF00..=0xFF0F    // fullwidth ！ ... ／
        | 0xFF1A..=0xFF20    // fullwidth ： ... ＠
        | 0xFF3B..=0xFF40    // fullwidth ［ ... ｀
        | 0xFF5B..=0xFF65    // fullwidth ｛ ... halfwidth 。
        | 0x2018..=0x201D    // curly quotes as used in CJK text
    )
}

/// NFKC-normalize, lowercase, and collapse whitespace. The match key for
/// facet values and author names.
pub fn normalize_value(raw: &str) -> String {
    let folded: String = raw.nfkc().flat_map(|c| c.to_lowercase()).collect();
    collapse_whitespace(&folded)
}

/// Title match key: like [`normalize_value`] but with punctuation and symbol
/// characters stripped, so `"Attention Is All You Need!"` and
/// `"attention is all you need"` collide.
pub fn normalize_title_key(raw: &str) -> String {
    let folded: String = raw
        .nfkc()
        .flat_map(|c| c.to_lowercase())
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    collapse_whitespace(&folded)
}

/// Collapse runs of Unicode whitespace into single ASCII spaces and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First run of exactly four ASCII digits, or `None`.
pub fn first_year_run(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 4 {
                return Some(s[start..i].to_string());
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Insert index-time CJK spacing: a space between adjacent CJK characters,
/// and at CJK/alphanumeric script boundaries, so the unicode word tokenizer
/// yields per-character CJK tokens that line up with rewritten queries.
pub fn space_cjk(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 2);
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if let Some(p) = prev {
            let boundary = (is_cjk(p) && is_cjk(c))
                || (is_cjk(p) && c.is_alphanumeric() && !is_cjk(c))
                || (p.is_alphanumeric() && !is_cjk(p) && is_cjk(c));
            if boundary {
                out.push(' ');
            }
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Remove the index-time CJK spacing from a snippet so it reads naturally.
/// Marker-aware: a space flanked by CJK characters is dropped even when a
/// `[[[` / `]]]` marker sits between the space and the character.
pub fn despace_cjk(text: &str) -> String {
    let encoded = text
        .replace(SNIPPET_OPEN, "\u{E000}")
        .replace(SNIPPET_CLOSE, "\u{E001}");
    let chars: Vec<char> = encoded.chars().collect();
    let mut out: Vec<char> = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ' ' {
            let prev = out
                .iter()
                .rev()
                .find(|&&p| p != MARK_OPEN && p != MARK_CLOSE)
                .copied();
            let next = chars[i + 1..]
                .iter()
                .find(|&&n| n != MARK_OPEN && n != MARK_CLOSE)
                .copied();
            if let (Some(p), Some(n)) = (prev, next) {
                let cjk_gap = is_cjk(p) && is_cjk(n);
                let script_gap = (is_cjk(p) && n.is_alphanumeric() && !is_cjk(n))
                    || (p.is_alphanumeric() && !is_cjk(p) && is_cjk(n));
                // Script-boundary spacing was also inserted at index time, but
                // a single space between CJK and Latin is legitimate prose;
                // only CJK-CJK gaps are unambiguous artifacts.
                if cjk_gap && !script_gap {
                    i += 1;
                    continue;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    out.into_iter()
        .collect::<String>()
        .replace('\u{E000}', SNIPPET_OPEN)
        .replace('\u{E001}', SNIPPET_CLOSE)
}

/// Reduce Markdown to searchable plain text.
///
/// Dropped entirely: fenced code blocks, table rows, display/inline math,
/// HTML tags. Rewritten: images to their alt text, links to their link text,
/// headings/blockquotes/list markers to bare text. The result is
/// whitespace-normalized and safe to slice for snippets (no structural
/// markup survives that a snippet window could cut through).
pub fn markdown_to_plain(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut in_fence = false;
    let mut fence_marker = "";
    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if in_fence {
            if trimmed.starts_with(fence_marker) {
                in_fence = false;
            }
            continue;
        }
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = true;
            fence_marker = if trimmed.starts_with("```") { "```" } else { "~~~" };
            continue;
        }
        // Table rows and separator rules
        if trimmed.starts_with('|') {
            continue;
        }
        let stripped = strip_block_prefix(trimmed);
        let flat = strip_inline(stripped);
        if !flat.trim().is_empty() {
            out.push_str(flat.trim());
            out.push('\n');
        }
    }
    collapse_whitespace(&out)
}

/// Remove heading, blockquote, and list markers from the start of a line.
fn strip_block_prefix(line: &str) -> &str {
    let mut s = line;
    while let Some(rest) = s.strip_prefix('>') {
        s = rest.trim_start();
    }
    s = s.trim_start_matches('#').trim_start();
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = s.strip_prefix(marker) {
            s = rest;
            break;
        }
    }
    // Ordered list markers: "1. ", "12. "
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = s[digits..].strip_prefix(". ") {
            s = rest;
        }
    }
    s
}

/// Inline pass: images to alt text, links to text, inline code unwrapped,
/// inline math and HTML tags removed, emphasis markers dropped.
fn strip_inline(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '!' if chars.get(i + 1) == Some(&'[') => {
                // ![alt](url) -> alt
                if let Some((alt, rest)) = parse_link(&chars[i + 1..]) {
                    out.push_str(&alt);
                    i += 1 + rest;
                    continue;
                }
                out.push('!');
                i += 1;
            }
            '[' => {
                // [text](url) -> text
                if let Some((text, rest)) = parse_link(&chars[i..]) {
                    out.push_str(&text);
                    i += rest;
                    continue;
                }
                out.push('[');
                i += 1;
            }
            '`' => {
                // Unwrap inline code, keeping its content
                i += 1;
            }
            '$' => {
                // Inline or display math: skip to the closing dollar run
                let run = chars[i..].iter().take_while(|&&c| c == '$').count();
                i += run;
                while i < chars.len() && chars[i] != '$' {
                    i += 1;
                }
                i += chars[i..].iter().take_while(|&&c| c == '$').count();
            }
            '<' => {
                // HTML tag: skip to '>' on the same line, else keep literal '<'
                if let Some(close) = chars[i + 1..].iter().position(|&c| c == '>') {
                    i += close + 2;
                } else {
                    out.push('<');
                    i += 1;
                }
            }
            '*' => {
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Parse `[text](target)` starting at the opening bracket. Returns the link
/// text and the number of consumed characters.
fn parse_link(chars: &[char]) -> Option<(String, usize)> {
    if chars.first() != Some(&'[') {
        return None;
    }
    let close = chars.iter().position(|&c| c == ']')?;
    if chars.get(close + 1) != Some(&'(') {
        return None;
    }
    let paren_close = chars[close + 2..].iter().position(|&c| c == ')')?;
    let text: String = chars[1..close].iter().collect();
    Some((text, close + 2 + paren_close + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_cjk_pairs() {
        assert_eq!(space_cjk("深度学习"), "深 度 学 习");
        assert_eq!(space_cjk("深度学习transformer"), "深 度 学 习 transformer");
        assert_eq!(space_cjk("BERT模型"), "BERT 模 型");
        assert_eq!(space_cjk("plain ascii"), "plain ascii");
    }

    #[test]
    fn test_despace_plain_cjk() {
        assert_eq!(despace_cjk("深 度 学 习"), "深度学习");
        assert_eq!(despace_cjk("uses 深 度 models"), "uses 深 度 models".replace("深 度", "深度"));
    }

    #[test]
    fn test_despace_is_marker_aware() {
        assert_eq!(despace_cjk("[[[深 度 学 习]]]"), "[[[深度学习]]]");
        assert_eq!(despace_cjk("基 于 [[[深 度]]] 学 习"), "基于[[[深度]]]学习");
    }

    #[test]
    fn test_despace_keeps_latin_spacing() {
        assert_eq!(despace_cjk("deep learning model"), "deep learning model");
        assert_eq!(despace_cjk("[[[deep]]] learning"), "[[[deep]]] learning");
    }

    #[test]
    fn test_normalize_title_key_strips_punctuation() {
        assert_eq!(
            normalize_title_key("Attention Is All You Need!"),
            "attention is all you need"
        );
        assert_eq!(normalize_title_key("Ｄｅｅｐ　Learning"), "deep learning");
    }

    #[test]
    fn test_first_year_run() {
        assert_eq!(first_year_run("2024-03-01").as_deref(), Some("2024"));
        assert_eq!(first_year_run("vol. 12, 1999").as_deref(), Some("1999"));
        assert_eq!(first_year_run("12345").as_deref(), None);
        assert_eq!(first_year_run("no digits"), None);
    }

    #[test]
    fn test_markdown_strips_tables_and_code() {
        let md = "# Title\n\nIntro text.\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\n```rust\nfn hidden() {}\n```\n\nAfter.";
        let plain = markdown_to_plain(md);
        assert!(plain.contains("Title"));
        assert!(plain.contains("Intro text."));
        assert!(plain.contains("After."));
        assert!(!plain.contains('|'));
        assert!(!plain.contains("hidden"));
    }

    #[test]
    fn test_markdown_images_and_links() {
        let md = "See ![model diagram](images/abc.png) and [the paper](https://example.com).";
        let plain = markdown_to_plain(md);
        assert_eq!(plain, "See model diagram and the paper.");
    }

    #[test]
    fn test_markdown_math_removed() {
        let plain = markdown_to_plain("loss $x^2 + y$ converges, $$\\int f$$ done");
        assert!(!plain.contains("x^2"));
        assert!(!plain.contains("\\int"));
        assert!(plain.contains("converges"));
    }
}
