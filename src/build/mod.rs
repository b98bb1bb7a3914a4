//! Snapshot build orchestration
//!
//! Pipeline: load inputs → merge → resolve identity → export assets
//! (bounded worker pool) → emit per-paper JSON → write the snapshot
//! database in a single transaction. Per-paper problems are aggregated into
//! the build report; only structural failures abort the build.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::assets::{ExportedAssets, StaticExporter};
use crate::bibtex::{parse_bibtex, BibtexEntry};
use crate::identity::{IdentityInput, IdentityResolver, MetaFingerprint};
use crate::input::{load_collection, merge_inputs, MergedPaper};
use crate::report::BuildReport;
use crate::snapshot::writer::{load_previous, write_snapshot, PreviousData, SnapshotPaper};
use crate::snapshot::BuildMeta;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub inputs: Vec<PathBuf>,
    pub bibtex: Option<PathBuf>,
    pub pdf_roots: Vec<PathBuf>,
    pub md_roots: Vec<PathBuf>,
    pub md_translated_roots: Vec<PathBuf>,
    pub previous_snapshot_db: Option<PathBuf>,
    pub output_db: PathBuf,
    pub static_export_dir: PathBuf,
}

/// Worker-pool width for asset hashing and export.
fn export_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Run a full snapshot build.
pub async fn build_snapshot(options: BuildOptions) -> Result<(BuildMeta, BuildReport)> {
    let mut report = BuildReport::default();

    let mut collections = Vec::with_capacity(options.inputs.len());
    for input in &options.inputs {
        collections.push(load_collection(input)?);
    }

    let bib_entries: Vec<BibtexEntry> = match &options.bibtex {
        Some(path) => parse_bibtex(&std::fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    let merged = merge_inputs(collections, &bib_entries, &mut report);
    tracing::info!(papers = merged.len(), "inputs merged");

    let (previous_identities, previous_data) = match &options.previous_snapshot_db {
        Some(path) => load_previous(path)?,
        None => (Default::default(), PreviousData::default()),
    };

    let mut resolver = IdentityResolver::new(previous_identities);
    let mut resolved = Vec::with_capacity(merged.len());
    for paper in merged {
        let input = identity_input(&paper);
        let (identity, diagnostics) = resolver.resolve(&input);
        report.record_identity(&diagnostics);
        resolved.push((paper, identity));
    }

    let exporter = Arc::new(StaticExporter::new(
        &options.static_export_dir,
        options.pdf_roots.clone(),
        options.md_roots.clone(),
        options.md_translated_roots.clone(),
    )?);

    let exported = export_all(Arc::clone(&exporter), &resolved).await?;

    let mut papers = Vec::with_capacity(resolved.len());
    for ((merged, identity), assets) in resolved.into_iter().zip(exported) {
        for missing in &assets.missing {
            report.missing_asset(format!("{}: {missing}", identity.paper_id));
        }
        report.assets_exported += assets.files_written;
        report.assets_reused += assets.files_reused;
        exporter
            .write_paper_json(&identity.paper_id, &merged, &assets)
            .await?;
        papers.push(SnapshotPaper {
            merged,
            identity,
            assets,
        });
    }

    let meta = write_snapshot(&options.output_db, &papers, &previous_data, &mut report)?;
    Ok((meta, report))
}

fn identity_input(paper: &MergedPaper) -> IdentityInput {
    IdentityInput {
        doi: paper.doi.clone(),
        arxiv_id: paper.arxiv_id.clone(),
        bibtex_key: paper
            .bibtex
            .as_ref()
            .map(|b| b.key.clone())
            .filter(|k| !k.is_empty()),
        fingerprint: MetaFingerprint::new(
            &paper.title,
            &paper.authors,
            &paper.publication_date,
            &paper.venue,
        ),
    }
}

/// Fan asset export out over a bounded worker pool, preserving paper order.
async fn export_all(
    exporter: Arc<StaticExporter>,
    resolved: &[(MergedPaper, crate::identity::ResolvedIdentity)],
) -> Result<Vec<ExportedAssets>> {
    let semaphore = Arc::new(Semaphore::new(export_concurrency()));
    let mut join_set = JoinSet::new();
    for (index, (paper, _)) in resolved.iter().enumerate() {
        let exporter = Arc::clone(&exporter);
        let semaphore = Arc::clone(&semaphore);
        let paper = paper.clone();
        join_set.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| Error::internal(format!("export pool closed: {e}")))?;
            let assets = exporter.export_paper_files(&paper).await?;
            Ok::<_, Error>((index, assets))
        });
    }

    let mut results: Vec<Option<ExportedAssets>> = (0..resolved.len()).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        let (index, assets) =
            joined.map_err(|e| Error::internal(format!("export task panicked: {e}")))??;
        results[index] = Some(assets);
    }
    Ok(results.into_iter().flatten().collect())
}
