//! Integration tests for the toolforge-store crate.
//!
//! Exercises the full catalog lifecycle — migrations, CRUD, bug state, and
//! search — against a real SQLite database on disk (via tempfile).

use toolforge_store::{
    Database, ListOptions, NewTool, ParamKind, StoreError, ToolParam, ToolPatch, ToolStore,
};

fn spec(name: &str, description: &str, tags: &[&str], category: Option<&str>) -> NewTool {
    NewTool {
        name: name.into(),
        description: description.into(),
        category: category.map(String::from),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        parameters: vec![
            ToolParam {
                name: "a".into(),
                kind: ParamKind::Number,
                required: true,
                description: "first operand".into(),
            },
            ToolParam {
                name: "b".into(),
                kind: ParamKind::Number,
                required: true,
                description: "second operand".into(),
            },
        ],
        return_schema: Some(serde_json::json!({"type": "number"})),
        code: "function run(args) return args.a + args.b end".into(),
    }
}

async fn disk_store() -> (tempfile::TempDir, ToolStore) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_and_migrate(dir.path().join("tools.db"))
        .await
        .unwrap();
    (dir, ToolStore::new(db))
}

// ═══════════════════════════════════════════════════════════════════════
//  Lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn full_crud_lifecycle_on_disk() {
    let (_dir, store) = disk_store().await;

    let created = store
        .create(spec("add", "add two numbers", &["math"], Some("math")))
        .await
        .unwrap();

    // Round trip by id and by name.
    let fetched = store.get_by_id(&created.id).await.unwrap();
    assert_eq!(fetched.name, "add");
    assert_eq!(fetched.parameters.len(), 2);

    // Rename and patch description.
    let patch = ToolPatch {
        name: Some("add_numbers".into()),
        description: Some("sum two numbers".into()),
        ..Default::default()
    };
    let updated = store.update(&created.id, patch).await.unwrap();
    assert_eq!(updated.name, "add_numbers");
    assert!(store.get_by_name("add").await.is_err());
    assert!(store.get_by_name("add_numbers").await.is_ok());

    // Delete, then delete again (idempotent).
    store.delete(&created.id).await.unwrap();
    store.delete(&created.id).await.unwrap();
    assert!(matches!(
        store.get_by_id(&created.id).await.unwrap_err(),
        StoreError::NotFound(_)
    ));
}

#[tokio::test]
async fn reopen_preserves_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tools.db");

    {
        let db = Database::open_and_migrate(path.clone()).await.unwrap();
        let store = ToolStore::new(db);
        store
            .create(spec("persistent", "survives restarts", &[], None))
            .await
            .unwrap();
    }

    let db = Database::open_and_migrate(path).await.unwrap();
    let store = ToolStore::new(db);
    let tool = store.get_by_name("persistent").await.unwrap();
    assert_eq!(tool.description, "survives restarts");
}

// ═══════════════════════════════════════════════════════════════════════
//  Bug state invariants
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn bug_count_zero_iff_not_bugged() {
    let (_dir, store) = disk_store().await;
    let tool = store
        .create(spec("div", "divide two numbers", &["math"], Some("math")))
        .await
        .unwrap();

    // Any interleaving of report_bug and clear_bugs keeps the invariant
    // `bug_count == 0 ⇔ !is_bugged` at the clear points and the threshold
    // relation everywhere else.
    for round in 0..3 {
        for i in 1..=4 {
            let t = store
                .report_bug(&tool.id, "RuntimeError", "divide by zero", "stack")
                .await
                .unwrap();
            assert_eq!(t.bug_count, i);
            assert_eq!(t.is_bugged, i >= 3, "round {round}, report {i}");
        }
        let t = store.clear_bugs(&tool.id).await.unwrap();
        assert_eq!(t.bug_count, 0);
        assert!(!t.is_bugged);
    }
}

#[tokio::test]
async fn bugged_tools_hidden_from_default_views() {
    let (_dir, store) = disk_store().await;
    let good = store
        .create(spec("add", "add two numbers", &["math"], Some("math")))
        .await
        .unwrap();
    let bad = store
        .create(spec("div", "divide two numbers", &["math"], Some("math")))
        .await
        .unwrap();
    for _ in 0..3 {
        store
            .report_bug(&bad.id, "RuntimeError", "divide by zero", "")
            .await
            .unwrap();
    }

    // Default list excludes the bugged tool.
    let listed = store.list(ListOptions::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, good.id);

    // Default search never returns it either, even on an exact name query.
    let hits = store.search("div", 10, Some(0.0), true).await.unwrap();
    assert!(hits.iter().all(|h| h.tool.id != bad.id));

    // Opting in shows it again.
    let hits = store.search("div", 10, Some(0.0), false).await.unwrap();
    assert!(hits.iter().any(|h| h.tool.id == bad.id));

    let bugged = store.list_bugged().await.unwrap();
    assert_eq!(bugged.len(), 1);
    assert_eq!(bugged[0].id, bad.id);
}

#[tokio::test]
async fn inactive_tools_hidden_from_search() {
    let (_dir, store) = disk_store().await;
    let tool = store
        .create(spec("add", "add two numbers", &["math"], None))
        .await
        .unwrap();
    store.deactivate(&tool.id).await.unwrap();

    let hits = store.search("add", 10, Some(0.0), true).await.unwrap();
    assert!(hits.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Search relevance
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn search_ranks_relevant_tool_first() {
    let (_dir, store) = disk_store().await;
    store
        .create(spec("multiply", "multiply two numbers", &["math", "product"], Some("math")))
        .await
        .unwrap();
    store
        .create(spec("add", "add two numbers", &["math", "sum"], Some("math")))
        .await
        .unwrap();
    store
        .create(NewTool {
            name: "count_chars".into(),
            description: "count characters in a string".into(),
            category: Some("text".into()),
            tags: vec!["text".into(), "count".into()],
            parameters: vec![],
            return_schema: Some(serde_json::json!({"type": "number"})),
            code: "function run(args) return #args.s end".into(),
        })
        .await
        .unwrap();

    let hits = store
        .search("multiply two numbers", 10, None, true)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].tool.name, "multiply");

    // Synonym bridge: "times" → multiply.
    let hits = store.search("times", 10, Some(0.0), true).await.unwrap();
    assert_eq!(hits[0].tool.name, "multiply");

    let hits = store
        .search("how many letters in a word", 10, Some(0.05), true)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].tool.name, "count_chars");
}

#[tokio::test]
async fn search_popularity_breaks_close_calls() {
    let (_dir, store) = disk_store().await;
    let hot = store
        .create(spec("adder_hot", "add two numbers", &["math"], None))
        .await
        .unwrap();
    store
        .create(spec("adder_cold", "add two numbers", &["math"], None))
        .await
        .unwrap();
    for _ in 0..20 {
        store.record_success(&hot.id).await.unwrap();
    }

    let hits = store.search("add numbers", 10, Some(0.0), true).await.unwrap();
    assert_eq!(hits[0].tool.id, hot.id);
}
