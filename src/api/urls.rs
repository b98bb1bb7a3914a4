//! Asset URL resolution
//!
//! Content-hashed paths are immutable and emitted without a cache-buster;
//! the static host is expected to serve them with a long immutable cache
//! policy. Build-dependent objects (summary, manifest) are addressed by
//! `paper_id` and carry `?v=<snapshot_build_id>` so a new build busts
//! client caches.

use std::collections::BTreeMap;

use crate::snapshot::PaperRow;

#[derive(Debug, Clone)]
pub struct UrlResolver {
    base: String,
    build_id: String,
}

impl UrlResolver {
    pub fn new(static_base_url: impl Into<String>, snapshot_build_id: impl Into<String>) -> Self {
        Self {
            base: static_base_url.into().trim_end_matches('/').to_string(),
            build_id: snapshot_build_id.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn immutable(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn versioned(&self, path: &str) -> String {
        format!("{}/{}?v={}", self.base, path, self.build_id)
    }

    pub fn pdf_url(&self, hash: &str) -> String {
        self.immutable(&format!("pdf/{hash}.pdf"))
    }

    pub fn source_md_url(&self, hash: &str) -> String {
        self.immutable(&format!("md/{hash}.md"))
    }

    pub fn translation_url(&self, lang: &str, hash: &str) -> String {
        self.immutable(&format!("md_translate/{lang}/{hash}.md"))
    }

    pub fn summary_url(&self, paper_id: &str, template: &str) -> String {
        self.versioned(&format!("summary/{paper_id}/{template}.json"))
    }

    pub fn manifest_url(&self, paper_id: &str) -> String {
        self.versioned(&format!("manifest/{paper_id}.json"))
    }

    /// template → summary URL for every available template.
    pub fn summary_urls(&self, paper: &PaperRow) -> BTreeMap<String, String> {
        paper
            .available_summary_templates
            .iter()
            .map(|t| (t.clone(), self.summary_url(&paper.paper_id, t)))
            .collect()
    }

    /// language → translation URL map.
    pub fn translation_urls(&self, paper: &PaperRow) -> BTreeMap<String, String> {
        paper
            .translations
            .iter()
            .map(|(lang, hash)| (lang.clone(), self.translation_url(lang, hash)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_urls_have_no_cache_buster() {
        let urls = UrlResolver::new("https://cdn.example.com/", "build-1");
        assert_eq!(
            urls.pdf_url("abc"),
            "https://cdn.example.com/pdf/abc.pdf"
        );
        assert_eq!(urls.source_md_url("abc"), "https://cdn.example.com/md/abc.md");
    }

    #[test]
    fn test_build_dependent_urls_are_versioned() {
        let urls = UrlResolver::new("/static", "build-1");
        assert_eq!(
            urls.summary_url("p1", "deep_read"),
            "/static/summary/p1/deep_read.json?v=build-1"
        );
        assert_eq!(urls.manifest_url("p1"), "/static/manifest/p1.json?v=build-1");
    }
}
