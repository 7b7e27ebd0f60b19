//! SQLite-backed [`QueryExecutor`].
//!
//! All database access runs on tokio-rusqlite's dedicated thread.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use quarry_types::{ColumnInfo, Table};
use rusqlite::types::ValueRef;
use serde_json::Value;
use tracing::debug;

use crate::{ExecutionError, QueryExecutor};

impl From<tokio_rusqlite::Error> for ExecutionError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::ConnectionClosed => ExecutionError::Closed,
            other => ExecutionError::Sqlite(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct SqliteExecutor {
    conn: tokio_rusqlite::Connection,
    // Usable from any thread while the connection thread is busy.
    interrupt: Arc<rusqlite::InterruptHandle>,
}

impl SqliteExecutor {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::with_connection(conn).await
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> Result<Self, ExecutionError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: tokio_rusqlite::Connection) -> Result<Self, ExecutionError> {
        let handle = conn.call(|conn| Ok(conn.get_interrupt_handle())).await?;
        Ok(Self {
            conn,
            interrupt: Arc::new(handle),
        })
    }

    /// Run several statements without collecting results.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), ExecutionError> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str) -> Result<Table, ExecutionError> {
        let sql = sql.to_string();
        let table = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> =
                    stmt.column_names().into_iter().map(String::from).collect();
                let width = columns.len();

                let mut table = Table::new(columns);
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let mut cells = Vec::with_capacity(width);
                    for i in 0..width {
                        cells.push(to_json(row.get_ref(i)?));
                    }
                    table.rows.push(cells);
                }
                Ok(table)
            })
            .await?;
        debug!(rows = table.len(), columns = table.columns.len(), "query executed");
        Ok(table)
    }

    async fn list_tables(&self) -> Result<Vec<String>, ExecutionError> {
        let names = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |r| r.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(names)
            })
            .await?;
        Ok(names)
    }

    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>, ExecutionError> {
        let pragma = format!("PRAGMA table_info({})", quote_ident(table));
        let columns = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&pragma)?;
                let columns = stmt
                    .query_map([], |r| {
                        Ok(ColumnInfo {
                            name: r.get(1)?,
                            data_type: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(columns)
            })
            .await?;
        Ok(columns)
    }

    async fn ddl_statements(&self) -> Result<Vec<String>, ExecutionError> {
        let ddl = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT sql FROM sqlite_master \
                     WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%' ORDER BY rowid",
                )?;
                let ddl = stmt
                    .query_map([], |r| r.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ddl)
            })
            .await?;
        Ok(ddl)
    }

    fn interrupt(&self) {
        self.interrupt.interrupt();
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{describe_schema, execute_within};
    use serde_json::json;
    use std::time::Duration;

    const ENDLESS: &str =
        "WITH RECURSIVE r(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM r) SELECT count(*) FROM r";

    async fn fixture() -> SqliteExecutor {
        let exec = SqliteExecutor::open_in_memory().await.unwrap();
        exec.execute_batch(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, region TEXT, amount REAL, receipt BLOB);
             INSERT INTO orders VALUES (1, 'north', 10.5, x'CAFE'), (2, NULL, 4.0, NULL);
             CREATE TABLE \"odd \"\"name\" (v TEXT);",
        )
        .await
        .unwrap();
        exec
    }

    #[tokio::test]
    async fn values_map_to_json() {
        let exec = fixture().await;
        let table = exec
            .execute("SELECT id, region, amount, receipt FROM orders ORDER BY id")
            .await
            .unwrap();
        assert_eq!(table.columns, vec!["id", "region", "amount", "receipt"]);
        assert_eq!(
            table.rows,
            vec![
                vec![json!(1), json!("north"), json!(10.5), json!("cafe")],
                vec![json!(2), Value::Null, json!(4.0), Value::Null],
            ]
        );
    }

    #[tokio::test]
    async fn schema_listing_quotes_identifiers() {
        let exec = fixture().await;
        assert_eq!(exec.list_tables().await.unwrap(), vec!["odd \"name", "orders"]);

        let schema = describe_schema(&exec, Duration::from_secs(5)).await.unwrap();
        let odd = &schema.tables[0];
        assert_eq!(odd.columns[0].name, "v");
        let orders = &schema.tables[1];
        assert_eq!(orders.columns[2].data_type, "REAL");

        let ddl = exec.ddl_statements().await.unwrap();
        assert!(ddl[0].starts_with("CREATE TABLE orders"));
    }

    #[tokio::test]
    async fn bad_sql_is_a_typed_error() {
        let exec = fixture().await;
        assert!(matches!(
            exec.execute("SELEC nothing").await,
            Err(ExecutionError::Sqlite(_))
        ));
    }

    #[tokio::test]
    async fn timed_out_query_is_interrupted() {
        let exec = fixture().await;
        let limit = Duration::from_millis(200);
        assert!(matches!(
            execute_within(&exec, ENDLESS, limit).await,
            Err(ExecutionError::Timeout(d)) if d == limit
        ));

        // The connection thread must be free again, not still counting.
        let next = tokio::time::timeout(
            Duration::from_secs(5),
            execute_within(&exec, "SELECT count(*) FROM orders", Duration::from_secs(5)),
        )
        .await
        .expect("connection still busy after timeout")
        .unwrap();
        assert_eq!(next.rows, vec![vec![json!(2)]]);
    }

    #[tokio::test]
    async fn file_database_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.db");
        SqliteExecutor::open(&path)
            .await
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (7);")
            .await
            .unwrap();

        let reopened = SqliteExecutor::open(&path).await.unwrap();
        let table = reopened.execute("SELECT x FROM t").await.unwrap();
        assert_eq!(table.rows, vec![vec![json!(7)]]);
    }
}
