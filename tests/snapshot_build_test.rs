//! End-to-end builder tests: static tree layout, snapshot contents,
//! determinism across rebuilds, and paper-id continuity.

mod common;

use common::{build_fixture, build_fixture_with, paper_id_by_title, P1_TITLE, P2_TITLE};
use paperdb::identity::paper_id_for_key;
use paperdb::snapshot::open_read_only;

#[tokio::test]
async fn test_build_produces_snapshot_and_static_tree() {
    let fixture = build_fixture().await;
    assert!(fixture.db.exists());

    let conn = open_read_only(&fixture.db).unwrap();
    let papers: i64 = conn
        .query_row("SELECT COUNT(*) FROM papers", [], |r| r.get(0))
        .unwrap();
    assert_eq!(papers, 2);

    // BibTeX enrichment: the .bib file wins for year and canonicalizes DOI.
    let p1 = paper_id_by_title(&fixture, P1_TITLE);
    let (doi, year, key_type): (Option<String>, String, String) = conn
        .query_row(
            "SELECT doi, year, paper_key_type FROM papers WHERE paper_id = ?1",
            [&p1],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(doi.as_deref(), Some("10.1109/cvpr.2016.90"));
    assert_eq!(year, "2016");
    assert_eq!(key_type, "doi");

    // Hash identity for fresh papers.
    assert_eq!(p1, paper_id_for_key("doi:10.1109/cvpr.2016.90"));

    // Static tree: source markdown and manifest exist; the image got
    // content-addressed and the markdown reference was rewritten.
    let (source_hash,): (Option<String>,) = conn
        .query_row(
            "SELECT source_content_hash FROM papers WHERE paper_id = ?1",
            [&p1],
            |r| Ok((r.get(0)?,)),
        )
        .unwrap();
    let source_hash = source_hash.unwrap();
    let md_path = fixture.export_dir.join(format!("md/{source_hash}.md"));
    let rewritten = std::fs::read_to_string(&md_path).unwrap();
    assert!(rewritten.contains("](images/"));
    assert!(!rewritten.contains("figs/arch.png"));

    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(fixture.export_dir.join(format!("manifest/{p1}.json"))).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["paper_id"], serde_json::json!(p1));
    assert_eq!(manifest["summary_templates"], serde_json::json!(["deep_read"]));
    for asset in manifest["images"].as_array().unwrap() {
        assert_eq!(asset["status"], "available");
        let path = asset["static_path"].as_str().unwrap();
        assert!(fixture.export_dir.join(path).exists(), "missing {path}");
    }

    // Single-template papers get both summary forms.
    assert!(fixture
        .export_dir
        .join(format!("summary/{p1}/deep_read.json"))
        .exists());
    assert!(fixture.export_dir.join(format!("summary/{p1}.json")).exists());

    assert!(!fixture.report.has_problems(), "{}", fixture.report.render());
}

#[tokio::test]
async fn test_rebuild_is_deterministic() {
    let a = build_fixture().await;
    let b = build_fixture().await;

    let read_facets = |db: &std::path::Path| {
        let conn = open_read_only(db).unwrap();
        let mut stmt = conn
            .prepare("SELECT kind, id, value FROM facet_values ORDER BY kind, id")
            .unwrap();
        let rows: Vec<(String, i64, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        rows
    };
    assert_eq!(read_facets(&a.db), read_facets(&b.db));

    // Content-hashed assets match byte for byte across builds.
    let hashes = |fixture: &common::Fixture| {
        let mut names: Vec<String> = std::fs::read_dir(fixture.export_dir.join("md"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    };
    assert_eq!(hashes(&a), hashes(&b));

    // Same paper ids.
    assert_eq!(
        paper_id_by_title(&a, P2_TITLE),
        paper_id_by_title(&b, P2_TITLE)
    );
}

#[tokio::test]
async fn test_doi_continuity_across_builds() {
    // Build 1: P2 has no DOI, so it is keyed by metadata.
    let first = build_fixture().await;
    let p2_first = paper_id_by_title(&first, P2_TITLE);
    {
        let conn = open_read_only(&first.db).unwrap();
        let key_type: String = conn
            .query_row(
                "SELECT paper_key_type FROM papers WHERE paper_id = ?1",
                [&p2_first],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(key_type, "meta");
    }

    // Build 2: same inputs, but P2 gains a DOI; continuity keeps the id.
    let prev_db = first.db.clone();
    let second = build_fixture_with(move |options| {
        options.previous_snapshot_db = Some(prev_db.clone());
    })
    .await;
    // Patch the second build's input to add a DOI for P2 and rebuild once
    // more against the first snapshot.
    let input_path = second.input_path();
    let mut input: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&input_path).unwrap()).unwrap();
    input["papers"][1]["doi"] = serde_json::json!("10.1145/XYZ");
    std::fs::write(&input_path, serde_json::to_vec_pretty(&input).unwrap()).unwrap();

    let db3 = second.dir.path().join("snapshot3.db");
    let options = paperdb::build::BuildOptions {
        inputs: vec![input_path],
        bibtex: None,
        pdf_roots: vec![],
        md_roots: vec![second.md_root()],
        md_translated_roots: vec![second.dir.path().join("md_translate")],
        previous_snapshot_db: Some(first.db.clone()),
        output_db: db3.clone(),
        static_export_dir: second.export_dir.clone(),
    };
    let (_, report) = paperdb::build::build_snapshot(options).await.unwrap();
    assert!(report.identity_conflicts.is_empty());

    let conn = open_read_only(&db3).unwrap();
    let (paper_id, doi, key_type): (String, Option<String>, String) = conn
        .query_row(
            "SELECT paper_id, doi, paper_key_type FROM papers WHERE title = ?1",
            [P2_TITLE],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    // The historical id survives the identifier upgrade.
    assert_eq!(paper_id, p2_first);
    assert_eq!(doi.as_deref(), Some("10.1145/xyz"));
    assert_eq!(key_type, "doi");

    // Both the historical meta key and the new DOI key alias to the id.
    let aliases: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT paper_key FROM paper_aliases WHERE paper_id = ?1")
            .unwrap();
        let rows = stmt
            .query_map([&paper_id], |r| r.get::<_, String>(0))
            .unwrap();
        rows.map(|r| r.unwrap()).collect()
    };
    assert!(aliases.iter().any(|a| a.starts_with("meta:")));
    assert!(aliases.contains(&"doi:10.1145/xyz".to_string()));
}
