use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use quarry_types::{ColumnInfo, SchemaDescription, Table, TableSchema};
use thiserror::Error;
use tracing::{debug, warn};

pub mod sqlite;
pub use sqlite::SqliteExecutor;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("sqlite error: {0}")]
    Sqlite(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("database connection is closed")]
    Closed,
}

/// Runs queries against one relational dataset.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Table, ExecutionError>;

    async fn list_tables(&self) -> Result<Vec<String>, ExecutionError>;

    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>, ExecutionError>;

    /// Statements that recreate the schema, when the backend can produce
    /// them.
    async fn ddl_statements(&self) -> Result<Vec<String>, ExecutionError> {
        Ok(Vec::new())
    }

    /// Abort whatever statement is currently running, if the backend can.
    /// Called when a bounded call gives up waiting.
    fn interrupt(&self) {}
}

async fn bounded<T, F>(
    executor: &dyn QueryExecutor,
    limit: Duration,
    fut: F,
) -> Result<T, ExecutionError>
where
    F: Future<Output = Result<T, ExecutionError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            executor.interrupt();
            warn!(?limit, "query timed out, interrupted");
            Err(ExecutionError::Timeout(limit))
        }
    }
}

/// Run one query with an upper bound on wall time. On expiry the running
/// statement is interrupted so the connection is free for the next call.
pub async fn execute_within(
    executor: &dyn QueryExecutor,
    sql: &str,
    limit: Duration,
) -> Result<Table, ExecutionError> {
    bounded(executor, limit, executor.execute(sql)).await
}

/// List every table with its columns. `limit` bounds the whole walk.
pub async fn describe_schema(
    executor: &dyn QueryExecutor,
    limit: Duration,
) -> Result<SchemaDescription, ExecutionError> {
    let walk = async {
        let mut tables = Vec::new();
        for name in executor.list_tables().await? {
            let columns = executor.get_schema(&name).await?;
            tables.push(TableSchema { name, columns });
        }
        Ok::<_, ExecutionError>(tables)
    };
    let tables = bounded(executor, limit, walk).await?;
    debug!(tables = tables.len(), "described schema");
    Ok(SchemaDescription { tables })
}
