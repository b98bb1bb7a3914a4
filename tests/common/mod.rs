//! Shared fixtures for integration tests: a small two-paper corpus built
//! through the full pipeline into a temp directory, and an API server on an
//! ephemeral port.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use paperdb::api::urls::UrlResolver;
use paperdb::api::{ApiState, SharedState};
use paperdb::assets::fetch::AssetFetcher;
use paperdb::build::{build_snapshot, BuildOptions};
use paperdb::mcp::mcp_router;
use paperdb::report::BuildReport;
use paperdb::snapshot::store::SnapshotStore;
use paperdb::snapshot::BuildMeta;

pub const P1_TITLE: &str = "Deep Residual Learning for Image Recognition";
pub const P2_TITLE: &str = "深度学习模型综述";

/// A built snapshot in a temp dir, with input fixtures on disk.
pub struct Fixture {
    pub dir: TempDir,
    pub db: PathBuf,
    pub export_dir: PathBuf,
    pub meta: BuildMeta,
    pub report: BuildReport,
}

impl Fixture {
    pub fn input_path(&self) -> PathBuf {
        self.dir.path().join("input.json")
    }

    pub fn md_root(&self) -> PathBuf {
        self.dir.path().join("md")
    }
}

fn write_fixture_files(dir: &TempDir) {
    let md_root = dir.path().join("md");
    std::fs::create_dir_all(&md_root).unwrap();
    std::fs::write(
        md_root.join("p1.md"),
        "# Residual Networks\n\nWe introduce residual connections. \
         本文提出深度学习方法。\n\n![architecture](figs/arch.png)\n",
    )
    .unwrap();
    std::fs::write(
        md_root.join("p2.md"),
        "# 综述\n\n深度学习发展迅速，transformer 模型广泛应用。\n",
    )
    .unwrap();
    std::fs::write(md_root.join("arch.png"), b"\x89PNG fake image bytes").unwrap();

    let trans_root = dir.path().join("md_translate");
    std::fs::create_dir_all(&trans_root).unwrap();
    std::fs::write(
        trans_root.join("p2.en.md"),
        "# Survey\n\nDeep learning is developing rapidly.\n",
    )
    .unwrap();

    let input = serde_json::json!({
        "template_tag": "deep_read",
        "papers": [
            {
                "paper_title": P1_TITLE,
                "paper_authors": ["Kaiming He", "Xiangyu Zhang"],
                "publication_date": "2016-06-27",
                "publication_venue": "CVPR",
                "doi": "https://doi.org/10.1109/CVPR.2016.90",
                "keywords": ["resnet", "cnn"],
                "institutions": ["Microsoft Research"],
                "tags": ["vision"],
                "summary": "Residual learning reformulates layers as **residual functions**.",
                "provider": "acme",
                "model": "extractor-1",
                "prompt_template": "deep_read",
                "source_path": "p1.md",
                "images": ["arch.png"]
            },
            {
                "paper_title": P2_TITLE,
                "paper_authors": ["李明"],
                "publication_date": "2023-01-15",
                "publication_venue": "计算机学报",
                "keywords": ["深度学习"],
                "tags": ["survey"],
                "summary": "对深度学习的发展进行综述。",
                "prompt_template": "deep_read",
                "source_path": "p2.md",
                "translations": {"en": "p2.en.md"}
            }
        ]
    });
    std::fs::write(
        dir.path().join("input.json"),
        serde_json::to_vec_pretty(&input).unwrap(),
    )
    .unwrap();

    std::fs::write(
        dir.path().join("refs.bib"),
        "@inproceedings{he2016resnet,\n  title = {Deep Residual Learning for Image Recognition},\n  booktitle = {CVPR},\n  year = {2016},\n  month = {jun},\n  doi = {10.1109/CVPR.2016.90},\n}\n",
    )
    .unwrap();
}

/// Build the standard two-paper fixture snapshot.
pub async fn build_fixture() -> Fixture {
    build_fixture_with(|_| {}).await
}

/// Build the fixture, letting the caller adjust options first.
pub async fn build_fixture_with(adjust: impl FnOnce(&mut BuildOptions)) -> Fixture {
    let dir = TempDir::new().unwrap();
    write_fixture_files(&dir);
    let db = dir.path().join("snapshot.db");
    let export_dir = dir.path().join("static");
    let mut options = BuildOptions {
        inputs: vec![dir.path().join("input.json")],
        bibtex: Some(dir.path().join("refs.bib")),
        pdf_roots: vec![],
        md_roots: vec![dir.path().join("md")],
        md_translated_roots: vec![dir.path().join("md_translate")],
        previous_snapshot_db: None,
        output_db: db.clone(),
        static_export_dir: export_dir.clone(),
    };
    adjust(&mut options);
    let (meta, report) = build_snapshot(options).await.unwrap();
    Fixture {
        dir,
        db,
        export_dir,
        meta,
        report,
    }
}

/// Look a paper id up by exact title.
pub fn paper_id_by_title(fixture: &Fixture, title: &str) -> String {
    let conn = paperdb::snapshot::open_read_only(&fixture.db).unwrap();
    conn.query_row(
        "SELECT paper_id FROM papers WHERE title = ?1",
        [title],
        |r| r.get(0),
    )
    .unwrap()
}

/// Serve the fixture's snapshot (API + MCP) on an ephemeral port, proxying
/// assets from the local export tree. Returns the base URL.
pub async fn serve_fixture(fixture: &Fixture, allowed_origins: Vec<String>) -> String {
    let store = SnapshotStore::open(&fixture.db).unwrap();
    let urls = UrlResolver::new("/static", store.snapshot_build_id());
    let fetcher = Arc::new(AssetFetcher::new(fixture.export_dir.to_str().unwrap()).unwrap());
    let state: SharedState = Arc::new(ApiState {
        store,
        urls,
        fetcher,
        allowed_origins,
    });
    let app = paperdb::api::create_router(Arc::clone(&state)).merge(mcp_router(state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
