use std::sync::Arc;

use quarry_core::{Analyst, AnalystError, CancellationToken, Settings};
use quarry_exec::SqliteExecutor;
use quarry_infer::ScriptedEngine;
use quarry_store::{EmbeddingIndex, StoreRegistry};
use quarry_types::{KnowledgeKind, PlanMode, SessionState};
use serde_json::json;

async fn analyst(
    dir: &std::path::Path,
    responses: Vec<&str>,
) -> (Analyst, Arc<ScriptedEngine>) {
    let settings = Settings {
        store_dir: dir.to_path_buf(),
        namespace: "library".into(),
        embed_dim: 128,
        ..Settings::default()
    };
    let registry = StoreRegistry::new(&settings.store_dir);
    let index = quarry_core::open_index(&settings, &registry).await.unwrap();

    let executor = SqliteExecutor::open_in_memory().await.unwrap();
    executor
        .execute_batch(
            "CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT, author_id INTEGER);
             CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO authors VALUES (1, 'Le Guin'), (2, 'Herbert');
             INSERT INTO books VALUES (1, 'The Dispossessed', 1), (2, 'Dune', 2), (3, 'Lathe of Heaven', 1);",
        )
        .await
        .unwrap();

    let engine = Arc::new(ScriptedEngine::new(responses));
    let analyst = Analyst::new(settings, Arc::new(index), engine.clone(), Arc::new(executor));
    (analyst, engine)
}

fn index_of(analyst: &Analyst) -> &Arc<EmbeddingIndex> {
    analyst.index()
}

#[tokio::test]
async fn train_from_schema_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (analyst, _) = analyst(dir.path(), vec![]).await;

    let first = analyst.train_from_schema().await.unwrap();
    assert_eq!(first.len(), 2);
    let second = analyst.train_from_schema().await.unwrap();
    assert!(second.is_empty());

    let records = index_of(&analyst).get_all().await;
    assert!(records.iter().all(|r| r.kind == KnowledgeKind::Ddl));
    assert!(records
        .iter()
        .any(|r| r.text.as_deref().unwrap().starts_with("CREATE TABLE authors")));
}

#[tokio::test]
async fn ask_generates_with_examples_and_executes() {
    let dir = tempfile::tempdir().unwrap();
    let (analyst, engine) = analyst(
        dir.path(),
        vec!["```sql\nSELECT a.name, COUNT(*) AS books FROM books b JOIN authors a ON a.id = b.author\\_id GROUP BY a.name ORDER BY books DESC\n```"],
    )
    .await;
    analyst
        .import_legacy([
            "How many books are there? => SELECT COUNT(*) FROM books",
            "",
            "Authors are stored by surname only.",
        ])
        .await
        .unwrap();

    let answer = analyst.ask("Books per author?").await.unwrap();
    assert!(answer.sql.contains("b.author_id"));
    assert_eq!(answer.result.columns, vec!["name", "books"]);
    assert_eq!(answer.result.rows[0], vec![json!("Le Guin"), json!(2)]);

    let prompt = engine.requests().await[0].transcript();
    assert!(prompt.contains("Q: How many books are there?\nA: SELECT COUNT(*) FROM books"));
    assert!(prompt.contains("Authors are stored by surname only."));
    assert!(prompt.contains("books(id INTEGER, title TEXT, author_id INTEGER)"));

    let kinds: Vec<KnowledgeKind> = index_of(&analyst)
        .get_all()
        .await
        .into_iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![KnowledgeKind::QuestionSql, KnowledgeKind::Documentation]
    );
}

#[tokio::test]
async fn ask_surfaces_execution_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (analyst, _) = analyst(dir.path(), vec!["I am not sure which table holds that."]).await;

    let err = analyst.ask("Who borrowed Dune?").await.unwrap_err();
    assert!(matches!(err, AnalystError::Execution(_)));
}

#[tokio::test]
async fn plan_report_dispatches_on_mode() {
    let dir = tempfile::tempdir().unwrap();
    let (analyst, _) = analyst(
        dir.path(),
        vec![r#"[{"subquestion": "How many books?", "query": "SELECT COUNT(*) AS n FROM books"}]"#],
    )
    .await;

    let session = analyst
        .plan_report("Library size", PlanMode::SingleShot, &CancellationToken::new())
        .await;
    assert_eq!(session.state, SessionState::Terminated);
    assert_eq!(session.combined_result.rows[0][0], json!(3));
}

#[tokio::test]
async fn connect_requires_completion_url() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        store_dir: dir.path().to_path_buf(),
        ..Settings::default()
    };
    let registry = StoreRegistry::new(&settings.store_dir);
    let executor = Arc::new(SqliteExecutor::open_in_memory().await.unwrap());

    let err = Analyst::connect(settings, &registry, executor).await.err().unwrap();
    assert!(matches!(err, AnalystError::Config(_)));
}
