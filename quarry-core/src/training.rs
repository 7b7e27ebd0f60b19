use quarry_exec::QueryExecutor;
use quarry_store::EmbeddingIndex;
use quarry_types::{Knowledge, KnowledgeKind};
use tracing::info;

use crate::error::AnalystError;

/// Add every schema statement of the database as DDL knowledge. Statements
/// already stored verbatim are skipped, so repeated runs add nothing.
pub async fn train_from_schema(
    index: &EmbeddingIndex,
    executor: &dyn QueryExecutor,
) -> Result<Vec<String>, AnalystError> {
    let known: Vec<String> = index
        .get_all()
        .await
        .into_iter()
        .filter(|r| r.kind == KnowledgeKind::Ddl)
        .filter_map(|r| r.text)
        .collect();

    let mut ids = Vec::new();
    for ddl in executor.ddl_statements().await? {
        if known.iter().any(|k| k == &ddl) {
            continue;
        }
        ids.push(index.add_ddl(ddl).await?);
    }
    info!(namespace = index.namespace(), added = ids.len(), "trained from schema");
    Ok(ids)
}

/// Import lines in the old `question => sql` encoding. Lines without the
/// delimiter become documentation; blank lines are skipped.
pub async fn import_legacy<'a, I>(index: &EmbeddingIndex, lines: I) -> Result<Vec<String>, AnalystError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ids = Vec::new();
    for line in lines.into_iter().filter(|l| !l.trim().is_empty()) {
        ids.push(index.add(Knowledge::from_legacy_text(line)).await?);
    }
    info!(namespace = index.namespace(), imported = ids.len(), "imported legacy entries");
    Ok(ids)
}
