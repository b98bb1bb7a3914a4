//! Static asset export
//!
//! Writes the content-addressed static tree for a snapshot:
//!
//! ```text
//! /pdf/<sha256>.pdf
//! /md/<sha256>.md
//! /md_translate/<lang>/<sha256>.md
//! /images/<sha256>.<ext>
//! /summary/<paper_id>.json            (single template)
//! /summary/<paper_id>/<template>.json (per template)
//! /manifest/<paper_id>.json
//! ```
//!
//! Hashed paths are immutable: a blob is written only when its target path
//! does not exist yet, so unchanged content is never rewritten and an image
//! referenced from both the source and a translation lands once.

pub mod fetch;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::input::MergedPaper;
use crate::textproc::collapse_whitespace;
use crate::{Error, Result};

/// Read buffer for streaming file hashes.
const HASH_BUF_SIZE: usize = 64 * 1024;
/// Maximum sanitized folder-name length before the fallback chain kicks in.
const MAX_FOLDER_NAME: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Available,
    Missing,
}

/// One asset reference inside a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestAsset {
    pub static_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub status: AssetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// Per-paper manifest naming every asset the paper uses, with enough
/// metadata to reconstruct a downloadable folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub paper_id: String,
    pub folder_name: String,
    pub folder_name_short: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf: Option<ManifestAsset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_md: Option<ManifestAsset>,
    pub translated_md: Vec<ManifestAsset>,
    pub summary_templates: Vec<String>,
    pub images: Vec<ManifestAsset>,
}

/// Everything the exporter learned about one paper's files; feeds the
/// snapshot writer (content hashes, extracted text) and the manifest.
#[derive(Debug, Clone, Default)]
pub struct ExportedAssets {
    pub pdf_hash: Option<String>,
    pub source_hash: Option<String>,
    /// Source markdown with image references rewritten.
    pub source_markdown: Option<String>,
    /// lang → (content hash, rewritten markdown).
    pub translations: BTreeMap<String, (String, String)>,
    pub images: Vec<ManifestAsset>,
    pub missing: Vec<String>,
    pub files_written: usize,
    pub files_reused: usize,
}

/// Writes content-addressed blobs and per-paper JSON under one export root.
pub struct StaticExporter {
    export_dir: PathBuf,
    pdf_roots: Vec<PathBuf>,
    md_roots: Vec<PathBuf>,
    md_translated_roots: Vec<PathBuf>,
}

impl StaticExporter {
    pub fn new(
        export_dir: impl Into<PathBuf>,
        pdf_roots: Vec<PathBuf>,
        md_roots: Vec<PathBuf>,
        md_translated_roots: Vec<PathBuf>,
    ) -> Result<Self> {
        let export_dir = export_dir.into();
        std::fs::create_dir_all(&export_dir)?;
        Ok(Self {
            export_dir,
            pdf_roots,
            md_roots,
            md_translated_roots,
        })
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Hash and export every file a paper references. Missing files are
    /// recorded, not fatal.
    pub async fn export_paper_files(&self, paper: &MergedPaper) -> Result<ExportedAssets> {
        let mut out = ExportedAssets::default();

        // Images first: markdown rewriting needs the name → hash map.
        let mut image_map: BTreeMap<String, (String, String)> = BTreeMap::new();
        for image_ref in &paper.images {
            let ext = extension_of(image_ref).unwrap_or_else(|| "png".to_string());
            match self.resolve(image_ref, &self.md_roots) {
                Some(path) => {
                    let hash = hash_file(&path).await?;
                    let rel = format!("images/{hash}.{ext}");
                    self.copy_absent(&path, &rel, &mut out).await?;
                    if let Some(name) = file_name_of(image_ref) {
                        image_map.insert(name, (hash.clone(), ext.clone()));
                    }
                    out.images.push(ManifestAsset {
                        static_path: rel,
                        sha256: Some(hash),
                        status: AssetStatus::Available,
                        ext: Some(ext),
                        lang: None,
                    });
                }
                None => {
                    out.missing.push(image_ref.clone());
                    out.images.push(ManifestAsset {
                        static_path: image_ref.clone(),
                        sha256: None,
                        status: AssetStatus::Missing,
                        ext: Some(ext),
                        lang: None,
                    });
                }
            }
        }

        if let Some(pdf_ref) = &paper.pdf_path {
            match self.resolve(pdf_ref, &self.pdf_roots) {
                Some(path) => {
                    let hash = hash_file(&path).await?;
                    let rel = format!("pdf/{hash}.pdf");
                    self.copy_absent(&path, &rel, &mut out).await?;
                    out.pdf_hash = Some(hash);
                }
                None => out.missing.push(pdf_ref.clone()),
            }
        }

        if let Some(src_ref) = &paper.source_path {
            match self.resolve(src_ref, &self.md_roots) {
                Some(path) => {
                    let raw = fs::read_to_string(&path).await?;
                    let rewritten = rewrite_image_refs(&raw, &image_map);
                    let hash = hash_bytes(rewritten.as_bytes());
                    self.write_absent(format!("md/{hash}.md"), rewritten.as_bytes(), &mut out)
                        .await?;
                    out.source_hash = Some(hash);
                    out.source_markdown = Some(rewritten);
                }
                None => out.missing.push(src_ref.clone()),
            }
        }

        for (lang, trans_ref) in &paper.translations {
            match self.resolve(trans_ref, &self.md_translated_roots) {
                Some(path) => {
                    let raw = fs::read_to_string(&path).await?;
                    let rewritten = rewrite_image_refs(&raw, &image_map);
                    let hash = hash_bytes(rewritten.as_bytes());
                    self.write_absent(
                        format!("md_translate/{lang}/{hash}.md"),
                        rewritten.as_bytes(),
                        &mut out,
                    )
                    .await?;
                    out.translations.insert(lang.clone(), (hash, rewritten));
                }
                None => out.missing.push(format!("{trans_ref} ({lang})")),
            }
        }

        Ok(out)
    }

    /// Emit the per-paper summary JSON files and the manifest. One summary
    /// file per template; papers with a single template additionally get the
    /// flat `/summary/<paper_id>.json` form.
    pub async fn write_paper_json(
        &self,
        paper_id: &str,
        paper: &MergedPaper,
        assets: &ExportedAssets,
    ) -> Result<Manifest> {
        for (template, summary) in &paper.summaries {
            let body = serde_json::json!({
                "paper_id": paper_id,
                "paper_title": paper.title,
                "summary": summary.summary_markdown,
                "metadata": summary.metadata,
            });
            let rendered = serde_json::to_vec_pretty(&body)?;
            self.write_always(format!("summary/{paper_id}/{template}.json"), &rendered)
                .await?;
            if paper.summaries.len() == 1 {
                self.write_always(format!("summary/{paper_id}.json"), &rendered)
                    .await?;
            }
        }

        let manifest = self.build_manifest(paper_id, paper, assets);
        let rendered = serde_json::to_vec_pretty(&manifest)?;
        self.write_always(format!("manifest/{paper_id}.json"), &rendered)
            .await?;
        Ok(manifest)
    }

    fn build_manifest(
        &self,
        paper_id: &str,
        paper: &MergedPaper,
        assets: &ExportedAssets,
    ) -> Manifest {
        let pdf = match (&assets.pdf_hash, &paper.pdf_path) {
            (Some(hash), _) => Some(ManifestAsset {
                static_path: format!("pdf/{hash}.pdf"),
                sha256: Some(hash.clone()),
                status: AssetStatus::Available,
                ext: Some("pdf".to_string()),
                lang: None,
            }),
            (None, Some(reference)) => Some(ManifestAsset {
                static_path: reference.clone(),
                sha256: None,
                status: AssetStatus::Missing,
                ext: Some("pdf".to_string()),
                lang: None,
            }),
            (None, None) => None,
        };
        let source_md = assets.source_hash.as_ref().map(|hash| ManifestAsset {
            static_path: format!("md/{hash}.md"),
            sha256: Some(hash.clone()),
            status: AssetStatus::Available,
            ext: Some("md".to_string()),
            lang: None,
        });
        let translated_md = assets
            .translations
            .iter()
            .map(|(lang, (hash, _))| ManifestAsset {
                static_path: format!("md_translate/{lang}/{hash}.md"),
                sha256: Some(hash.clone()),
                status: AssetStatus::Available,
                ext: Some("md".to_string()),
                lang: Some(lang.clone()),
            })
            .collect();

        let (folder_name, folder_name_short) = folder_names(paper, paper_id);
        Manifest {
            paper_id: paper_id.to_string(),
            folder_name,
            folder_name_short,
            pdf,
            source_md,
            translated_md,
            summary_templates: paper.available_templates(),
            images: assets.images.clone(),
        }
    }

    /// Resolve a referenced path: absolute, cwd-relative, or under one of
    /// the configured roots (first hit wins).
    fn resolve(&self, reference: &str, roots: &[PathBuf]) -> Option<PathBuf> {
        let direct = PathBuf::from(reference);
        if direct.is_file() {
            return Some(direct);
        }
        for root in roots {
            let candidate = root.join(reference);
            if candidate.is_file() {
                return Some(candidate);
            }
            // References often carry pipeline-internal directories; retry
            // with just the file name.
            if let Some(name) = direct.file_name() {
                let candidate = root.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    async fn copy_absent(
        &self,
        from: &Path,
        rel: &str,
        out: &mut ExportedAssets,
    ) -> Result<()> {
        let target = self.export_dir.join(rel);
        if target.exists() {
            out.files_reused += 1;
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(from, &target).await?;
        out.files_written += 1;
        Ok(())
    }

    async fn write_absent(
        &self,
        rel: String,
        data: &[u8],
        out: &mut ExportedAssets,
    ) -> Result<()> {
        let target = self.export_dir.join(&rel);
        if target.exists() {
            out.files_reused += 1;
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, data).await?;
        out.files_written += 1;
        Ok(())
    }

    /// Build-dependent JSON (summary, manifest) is rewritten every build.
    async fn write_always(&self, rel: String, data: &[u8]) -> Result<()> {
        let target = self.export_dir.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, data).await?;
        Ok(())
    }
}

/// Streaming SHA-256 of a file, off the async runtime.
pub async fn hash_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_BUF_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| Error::internal(format!("hash task panicked: {e}")))?
}

pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Rewrite `![alt](target)` image references whose file name was exported,
/// pointing them at the content-addressed `images/` path so a downloaded
/// folder renders offline.
pub fn rewrite_image_refs(markdown: &str, images: &BTreeMap<String, (String, String)>) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut rest = markdown;
    while let Some(start) = rest.find("![") {
        let (before, tail) = rest.split_at(start);
        out.push_str(before);
        let Some(close) = tail.find(']') else {
            out.push_str(tail);
            return out;
        };
        if tail[close + 1..].starts_with('(') {
            if let Some(paren_close) = tail[close + 2..].find(')') {
                let alt = &tail[..close + 1];
                let target = &tail[close + 2..close + 2 + paren_close];
                let replacement = file_name_of(target)
                    .and_then(|name| images.get(&name))
                    .map(|(hash, ext)| format!("images/{hash}.{ext}"));
                match replacement {
                    Some(new_target) => {
                        out.push_str(alt);
                        out.push('(');
                        out.push_str(&new_target);
                        out.push(')');
                    }
                    None => out.push_str(&tail[..close + 2 + paren_close + 1]),
                }
                rest = &tail[close + 2 + paren_close + 1..];
                continue;
            }
        }
        out.push_str(&tail[..close + 1]);
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    out
}

fn file_name_of(reference: &str) -> Option<String> {
    Path::new(reference)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn extension_of(reference: &str) -> Option<String> {
    Path::new(reference)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Replace filesystem-hostile characters and collapse whitespace.
pub fn sanitize_filename(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    collapse_whitespace(&replaced)
}

/// Folder names for ZIP packaging: the full form, then progressively
/// shorter fallbacks when the sanitized name exceeds the length limit.
pub fn folder_names(paper: &MergedPaper, paper_id: &str) -> (String, String) {
    let first_author = paper
        .authors
        .first()
        .map(|a| sanitize_filename(a))
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let year = &paper.year;

    let short = truncate_name(&format!("{first_author}_{year}__{paper_id}"));
    let full = format!(
        "{first_author}_{year}_{}__{paper_id}",
        sanitize_filename(&paper.title)
    );
    let folder = if full.chars().count() <= MAX_FOLDER_NAME {
        full
    } else if short.chars().count() <= MAX_FOLDER_NAME {
        short.clone()
    } else {
        paper_id.to_string()
    };
    (folder, short)
}

fn truncate_name(name: &str) -> String {
    if name.chars().count() <= MAX_FOLDER_NAME {
        name.to_string()
    } else {
        name.chars().take(MAX_FOLDER_NAME).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_image_refs() {
        let mut images = BTreeMap::new();
        images.insert("fig1.png".to_string(), ("abc123".to_string(), "png".to_string()));
        let md = "Intro ![Figure 1](assets/fig1.png) and ![other](missing.png).";
        let rewritten = rewrite_image_refs(md, &images);
        assert!(rewritten.contains("![Figure 1](images/abc123.png)"));
        assert!(rewritten.contains("![other](missing.png)"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b:c*d?e\"f<g>h|i"), "a_b_c_d_e_f_g_h_i");
        assert_eq!(sanitize_filename("  spaced   name "), "spaced name");
    }

    #[test]
    fn test_folder_name_fallback_chain() {
        let mut paper = MergedPaper::default();
        paper.authors = vec!["Vaswani".to_string()];
        paper.year = "2017".to_string();
        paper.title = "Short Title".to_string();
        let (folder, short) = folder_names(&paper, "deadbeef");
        assert_eq!(folder, "Vaswani_2017_Short Title__deadbeef");
        assert_eq!(short, "Vaswani_2017__deadbeef");

        paper.title = "x".repeat(200);
        let (folder, short) = folder_names(&paper, "deadbeef");
        assert_eq!(folder, short);
    }

    #[test]
    fn test_hash_bytes_stable() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_eq!(hash_bytes(b"abc").len(), 64);
    }
}
