//! Paper identity resolution and cross-build continuity
//!
//! A paper's identity is its strongest available identifier, canonicalized
//! into a `paper_key`; the `paper_id` is a 32-hex-char truncation of
//! `sha256("v1|" + paper_key)`. When a previous snapshot is supplied, every
//! candidate key is looked up in its alias table so the historical
//! `paper_id` survives identifier upgrades (for example a DOI appearing for
//! a paper previously keyed by metadata). Weak metadata-derived keys carry a
//! structured fingerprint so hash collisions between genuinely different
//! papers are detected instead of silently merging them.

use std::collections::{BTreeSet, HashMap, HashSet};

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::textproc::{collapse_whitespace, first_year_run, normalize_title_key, normalize_value};

/// Identity key namespace prefix for the versioned id hash.
const ID_HASH_PREFIX: &str = "v1|";
/// Hex length of the derived `paper_id`.
const PAPER_ID_LEN: usize = 32;
/// Hex length of the metadata-hash portion of a `meta:` key.
const META_HASH_LEN: usize = 16;

/// Below this normalized-title similarity, a weak-key match is suspect.
pub const META_TITLE_SIMILARITY_THRESHOLD: f64 = 0.55;
/// Below this author-set Jaccard overlap, a weak-key match is suspect.
pub const META_AUTHOR_OVERLAP_THRESHOLD: f64 = 0.5;

/// Identifier classes, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Doi,
    Arxiv,
    Bib,
    Meta,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Doi => "doi",
            KeyType::Arxiv => "arxiv",
            KeyType::Bib => "bib",
            KeyType::Meta => "meta",
        }
    }

    pub fn parse(s: &str) -> Option<KeyType> {
        match s {
            "doi" => Some(KeyType::Doi),
            "arxiv" => Some(KeyType::Arxiv),
            "bib" => Some(KeyType::Bib),
            "meta" => Some(KeyType::Meta),
            _ => None,
        }
    }

    pub fn is_strong(self) -> bool {
        !matches!(self, KeyType::Meta)
    }
}

/// A canonical identity key: `doi:10.1145/xyz`, `arxiv:2301.00001`,
/// `bib:vaswani2017`, or `meta:<hash>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperKey {
    pub kind: KeyType,
    pub key: String,
}

/// Canonicalize a DOI: strip `doi:` and resolver-URL prefixes, decode
/// percent escapes, lowercase, trim whitespace and trailing punctuation.
/// Returns `None` when the remainder is not a DOI (`10.`-prefixed).
pub fn canonicalize_doi(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    for prefix in ["https://doi.org/", "http://doi.org/", "doi:"] {
        if let Some(rest) = strip_prefix_ignore_case(s, prefix) {
            s = rest;
            break;
        }
    }
    let decoded = percent_decode_str(s).decode_utf8().ok()?;
    let lowered = decoded.trim().to_lowercase();
    let trimmed = lowered.trim_end_matches(['.', ',', ';', ')']).trim();
    if trimmed.starts_with("10.") && trimmed.contains('/') {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Canonicalize an arXiv id: strip `arxiv:` and abs-URL prefixes, lowercase,
/// drop a trailing `vN` version suffix. Accepts both new-style
/// (`2301.00001`) and old-style (`hep-th/9901001`) identifiers.
pub fn canonicalize_arxiv(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    for prefix in [
        "https://arxiv.org/abs/",
        "http://arxiv.org/abs/",
        "arxiv:",
    ] {
        if let Some(rest) = strip_prefix_ignore_case(s, prefix) {
            s = rest;
            break;
        }
    }
    let lowered = s.trim().trim_end_matches('/').to_lowercase();
    let unversioned = strip_arxiv_version(&lowered);
    if unversioned.is_empty() || !unversioned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(unversioned.to_string())
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Drop a trailing `vN` suffix (`2301.00001v3` → `2301.00001`).
fn strip_arxiv_version(id: &str) -> &str {
    if let Some(pos) = id.rfind('v') {
        let suffix = &id[pos + 1..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return &id[..pos];
        }
    }
    id
}

/// Structured fingerprint of the normalized metadata a `meta:` key hashes.
/// Stored alongside the paper so a later build can tell a genuine
/// continuation from a hash collision between different papers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MetaFingerprint {
    pub title: String,
    pub authors: Vec<String>,
    pub year: String,
    pub venue: String,
}

impl MetaFingerprint {
    pub fn new(title: &str, authors: &[String], date_hint: &str, venue: &str) -> Self {
        let mut normalized_authors: Vec<String> = authors
            .iter()
            .map(|a| normalize_value(a))
            .filter(|a| !a.is_empty())
            .collect();
        normalized_authors.sort();
        MetaFingerprint {
            title: normalize_title_key(title),
            authors: normalized_authors,
            year: first_year_run(date_hint).unwrap_or_else(|| "unknown".to_string()),
            venue: collapse_whitespace(&normalize_value(venue)),
        }
    }

    /// The `meta:<hash>` key derived from this fingerprint.
    pub fn meta_key(&self) -> String {
        let joined = format!(
            "{}|{}|{}|{}",
            self.title,
            self.authors.join(";"),
            self.year,
            self.venue
        );
        let digest = Sha256::digest(joined.as_bytes());
        format!("meta:{}", &hex::encode(digest)[..META_HASH_LEN])
    }

    /// Whether `other` plausibly describes the same paper. Either a similar
    /// title or a substantial author overlap keeps continuity.
    pub fn matches(&self, other: &MetaFingerprint) -> bool {
        let title_sim = strsim::normalized_levenshtein(&self.title, &other.title);
        if title_sim >= META_TITLE_SIMILARITY_THRESHOLD {
            return true;
        }
        author_jaccard(&self.authors, &other.authors) >= META_AUTHOR_OVERLAP_THRESHOLD
    }
}

fn author_jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let sa: BTreeSet<&String> = a.iter().collect();
    let sb: BTreeSet<&String> = b.iter().collect();
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// `truncate32(sha256_hex("v1|" + paper_key))`.
pub fn paper_id_for_key(paper_key: &str) -> String {
    let digest = Sha256::digest(format!("{ID_HASH_PREFIX}{paper_key}").as_bytes());
    hex::encode(digest)[..PAPER_ID_LEN].to_string()
}

/// Raw identifier material extracted from a merged input record.
#[derive(Debug, Clone, Default)]
pub struct IdentityInput {
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    pub bibtex_key: Option<String>,
    pub fingerprint: MetaFingerprint,
}

impl IdentityInput {
    /// All candidate keys in strength order. The `meta:` key is always
    /// present as the fallback.
    pub fn candidate_keys(&self) -> Vec<PaperKey> {
        let mut keys = Vec::with_capacity(4);
        if let Some(doi) = self.doi.as_deref().and_then(canonicalize_doi) {
            keys.push(PaperKey {
                kind: KeyType::Doi,
                key: format!("doi:{doi}"),
            });
        }
        if let Some(arxiv) = self.arxiv_id.as_deref().and_then(canonicalize_arxiv) {
            keys.push(PaperKey {
                kind: KeyType::Arxiv,
                key: format!("arxiv:{arxiv}"),
            });
        }
        if let Some(bib) = self.bibtex_key.as_deref().filter(|k| !k.trim().is_empty()) {
            keys.push(PaperKey {
                kind: KeyType::Bib,
                key: format!("bib:{}", bib.trim()),
            });
        }
        keys.push(PaperKey {
            kind: KeyType::Meta,
            key: self.fingerprint.meta_key(),
        });
        keys
    }
}

/// Resolved identity for one paper in the current build.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub paper_id: String,
    pub paper_key: String,
    pub paper_key_type: KeyType,
    /// Every identity key that should alias to `paper_id` in this snapshot.
    pub aliases: Vec<String>,
}

/// Non-fatal identity diagnostics, aggregated into the build report.
#[derive(Debug, Clone)]
pub enum IdentityDiagnostic {
    /// Candidate keys matched different historical paper ids; the strongest
    /// key won.
    Conflict {
        chosen_id: String,
        chosen_key: String,
        losing: Vec<(String, String)>,
    },
    /// A weak-key match failed the fingerprint guard; a fresh id was minted.
    FingerprintDivergence {
        previous_id: String,
        minted_key: String,
        title_a: String,
        title_b: String,
    },
}

/// Alias table and fingerprints loaded from a previous snapshot.
#[derive(Debug, Default)]
pub struct PreviousIdentities {
    /// paper_key → historical paper_id.
    pub aliases: HashMap<String, String>,
    /// historical paper_id → its stored meta fingerprint.
    pub fingerprints: HashMap<String, MetaFingerprint>,
}

/// Assigns paper ids for a build, carrying continuity from a previous
/// snapshot and guarding weak-key collisions. One resolver instance is used
/// per build so minted keys and assigned ids stay unique within it.
pub struct IdentityResolver {
    previous: PreviousIdentities,
    used_keys: HashSet<String>,
    used_ids: HashSet<String>,
}

impl IdentityResolver {
    pub fn new(previous: PreviousIdentities) -> Self {
        IdentityResolver {
            previous,
            used_keys: HashSet::new(),
            used_ids: HashSet::new(),
        }
    }

    pub fn resolve(
        &mut self,
        input: &IdentityInput,
    ) -> (ResolvedIdentity, Vec<IdentityDiagnostic>) {
        let candidates = input.candidate_keys();
        let mut diagnostics = Vec::new();

        let matches: Vec<(&PaperKey, &String)> = candidates
            .iter()
            .filter_map(|k| self.previous.aliases.get(&k.key).map(|id| (k, id)))
            .collect();

        let strongest = &candidates[0];
        let mut paper_id = None;

        if let Some((matched_key, matched_id)) = matches.first() {
            let distinct: BTreeSet<&String> = matches.iter().map(|(_, id)| *id).collect();
            if distinct.len() > 1 {
                diagnostics.push(IdentityDiagnostic::Conflict {
                    chosen_id: (*matched_id).clone(),
                    chosen_key: matched_key.key.clone(),
                    losing: matches
                        .iter()
                        .skip(1)
                        .filter(|(_, id)| *id != *matched_id)
                        .map(|(k, id)| (k.key.clone(), (*id).clone()))
                        .collect(),
                });
            }

            if matched_key.kind == KeyType::Meta {
                let diverged = self
                    .previous
                    .fingerprints
                    .get(*matched_id)
                    .map(|prev| !prev.matches(&input.fingerprint))
                    .unwrap_or(false);
                if diverged {
                    let prev_title = self
                        .previous
                        .fingerprints
                        .get(*matched_id)
                        .map(|f| f.title.clone())
                        .unwrap_or_default();
                    let previous_id = (*matched_id).clone();
                    // A strong current key carries a fresh identity on its
                    // own; a meta-only paper needs a disambiguated key to
                    // break away from the colliding hash.
                    let (fresh_key, minted) = if strongest.kind.is_strong() {
                        (strongest.key.clone(), None)
                    } else {
                        let minted = self.mint_meta_key(&matched_key.key);
                        (minted.clone(), Some(minted))
                    };
                    diagnostics.push(IdentityDiagnostic::FingerprintDivergence {
                        previous_id,
                        minted_key: fresh_key.clone(),
                        title_a: prev_title,
                        title_b: input.fingerprint.title.clone(),
                    });
                    let id = paper_id_for_key(&fresh_key);
                    let resolved = self.finish(id, strongest, &candidates, minted);
                    return (resolved, diagnostics);
                }
            }
            paper_id = Some((*matched_id).clone());
        }

        // Fresh papers take the hash of their strongest key. An id already
        // taken this build (two inputs normalizing to one key, or two papers
        // matching the same historical id) gets a disambiguated meta key.
        let mut minted = None;
        let id = match paper_id {
            Some(id) if !self.used_ids.contains(&id) => id,
            Some(_) => {
                let key = self.mint_meta_key(&input.fingerprint.meta_key());
                let id = paper_id_for_key(&key);
                minted = Some(key);
                id
            }
            None => {
                let key = strongest.key.clone();
                let mut id = paper_id_for_key(&key);
                if self.used_ids.contains(&id) {
                    let key = self.mint_meta_key(&input.fingerprint.meta_key());
                    id = paper_id_for_key(&key);
                    minted = Some(key);
                }
                id
            }
        };

        let resolved = self.finish(id, strongest, &candidates, minted);
        (resolved, diagnostics)
    }

    /// Suffix the base meta key with `:2`, `:3`, ... until the result is
    /// unused by both the previous snapshot and the current build.
    fn mint_meta_key(&self, base: &str) -> String {
        let mut n = 2u32;
        loop {
            let candidate = format!("{base}:{n}");
            if !self.previous.aliases.contains_key(&candidate)
                && !self.used_keys.contains(&candidate)
            {
                return candidate;
            }
            n += 1;
        }
    }

    fn finish(
        &mut self,
        paper_id: String,
        strongest: &PaperKey,
        candidates: &[PaperKey],
        minted: Option<String>,
    ) -> ResolvedIdentity {
        let mut aliases: Vec<String> = candidates.iter().map(|k| k.key.clone()).collect();
        if let Some(m) = &minted {
            // The minted key replaces the colliding meta key in the alias set.
            aliases.retain(|a| !a.starts_with("meta:"));
            aliases.push(m.clone());
        }
        for alias in &aliases {
            self.used_keys.insert(alias.clone());
        }
        self.used_ids.insert(paper_id.clone());
        // A minted key always becomes the stored key: the strong key it
        // displaced is already claimed by another paper this build.
        let (paper_key, paper_key_type) = match &minted {
            Some(m) => (m.clone(), KeyType::Meta),
            None => (strongest.key.clone(), strongest.kind),
        };
        ResolvedIdentity {
            paper_id,
            paper_key,
            paper_key_type,
            aliases,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_input(title: &str, authors: &[&str]) -> IdentityInput {
        IdentityInput {
            fingerprint: MetaFingerprint::new(
                title,
                &authors.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
                "2020",
                "NeurIPS",
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_doi_canonicalization() {
        assert_eq!(
            canonicalize_doi("https://doi.org/10.1145/XYZ.").as_deref(),
            Some("10.1145/xyz")
        );
        assert_eq!(
            canonicalize_doi("doi:10.1000/a%20b;").as_deref(),
            Some("10.1000/a b")
        );
        assert_eq!(canonicalize_doi("not-a-doi"), None);
    }

    #[test]
    fn test_arxiv_canonicalization() {
        assert_eq!(
            canonicalize_arxiv("arXiv:2301.00001v3").as_deref(),
            Some("2301.00001")
        );
        assert_eq!(
            canonicalize_arxiv("https://arxiv.org/abs/hep-th/9901001v2").as_deref(),
            Some("hep-th/9901001")
        );
        assert_eq!(canonicalize_arxiv("vvv"), None);
    }

    #[test]
    fn test_paper_id_shape() {
        let id = paper_id_for_key("doi:10.1145/xyz");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // Stable across calls
        assert_eq!(id, paper_id_for_key("doi:10.1145/xyz"));
    }

    #[test]
    fn test_key_strength_order() {
        let input = IdentityInput {
            doi: Some("10.1145/xyz".to_string()),
            arxiv_id: Some("2301.00001".to_string()),
            bibtex_key: Some("smith2020".to_string()),
            fingerprint: MetaFingerprint::new("T", &["A".to_string()], "2020", "V"),
        };
        let keys = input.candidate_keys();
        assert_eq!(keys[0].kind, KeyType::Doi);
        assert_eq!(keys[1].kind, KeyType::Arxiv);
        assert_eq!(keys[2].kind, KeyType::Bib);
        assert_eq!(keys[3].kind, KeyType::Meta);
    }

    #[test]
    fn test_continuity_upgrades_key_but_keeps_id() {
        // Build 1: metadata only.
        let mut resolver = IdentityResolver::new(PreviousIdentities::default());
        let b1 = meta_input("Attention Is All You Need", &["Vaswani"]);
        let (r1, d1) = resolver.resolve(&b1);
        assert!(d1.is_empty());
        assert_eq!(r1.paper_key_type, KeyType::Meta);

        // Build 2: same paper gains a DOI; previous aliases carry the id.
        let mut previous = PreviousIdentities::default();
        for alias in &r1.aliases {
            previous.aliases.insert(alias.clone(), r1.paper_id.clone());
        }
        previous
            .fingerprints
            .insert(r1.paper_id.clone(), b1.fingerprint.clone());
        let mut resolver2 = IdentityResolver::new(previous);
        let mut b2 = meta_input("Attention Is All You Need", &["Vaswani"]);
        b2.doi = Some("10.1145/XYZ".to_string());
        let (r2, d2) = resolver2.resolve(&b2);
        assert!(d2.is_empty());
        assert_eq!(r2.paper_id, r1.paper_id);
        assert_eq!(r2.paper_key, "doi:10.1145/xyz");
        assert_eq!(r2.paper_key_type, KeyType::Doi);
        assert!(r2.aliases.iter().any(|a| a.starts_with("meta:")));
        assert!(r2.aliases.contains(&"doi:10.1145/xyz".to_string()));
    }

    #[test]
    fn test_fingerprint_divergence_mints_fresh_id() {
        // A historical paper whose stored fingerprint is unrelated to the
        // current record, yet whose meta key collides with it.
        let historical = meta_input("Graph Neural Networks for Molecules", &["Li", "Chen"]);
        let current = meta_input("Quantum Error Correction Codes", &["Novak"]);
        let old_id = "a".repeat(32);

        let mut previous = PreviousIdentities::default();
        previous
            .aliases
            .insert(current.fingerprint.meta_key(), old_id.clone());
        previous
            .fingerprints
            .insert(old_id.clone(), historical.fingerprint.clone());

        let mut resolver = IdentityResolver::new(previous);
        let (r, diags) = resolver.resolve(&current);
        assert_ne!(r.paper_id, old_id);
        assert!(matches!(
            diags.as_slice(),
            [IdentityDiagnostic::FingerprintDivergence { .. }]
        ));
        // The minted key keeps the hash identity intact.
        assert!(r.paper_key.starts_with("meta:"));
        assert!(r.paper_key.ends_with(":2"));
        assert_eq!(r.paper_id, paper_id_for_key(&r.paper_key));
    }

    #[test]
    fn test_fingerprint_similarity_guard() {
        let a = MetaFingerprint::new("Deep Learning Survey", &["Smith".into()], "2020", "X");
        let near = MetaFingerprint::new("Deep Learning: A Survey", &["Smith".into()], "2021", "Y");
        let far = MetaFingerprint::new("Unrelated Topic Entirely", &["Jones".into()], "1999", "Z");
        assert!(a.matches(&near));
        assert!(!a.matches(&far));
        // Author overlap alone preserves continuity despite a retitle.
        let retitled =
            MetaFingerprint::new("Completely New Name Here Now", &["Smith".into()], "2022", "X");
        assert!(a.matches(&retitled));
    }
}
