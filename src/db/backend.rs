//! Storage backend - executes parametrized statements against the store
use crate::{
    db::{Dialect, Query, SqlQuery, SqlRow, SqlValue},
    error::{BansError, BansResult},
};
use async_trait::async_trait;
use sqlx::any::{Any, AnyArguments};
use sqlx::AnyPool;
use sqlx::query::Query as SqlxQuery;
use tracing::debug;

/// Dialect-neutral access to the relational store
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Dialect statements are rendered in
    fn dialect(&self) -> Dialect;

    /// Run statements in one transaction, discarding results
    async fn execute(&self, queries: &[SqlQuery]) -> BansResult<()>;

    /// Run statements and return one row set per statement, in order
    async fn query(&self, queries: &[SqlQuery]) -> BansResult<Vec<Vec<SqlRow>>>;

    /// Cheap connectivity check
    async fn ping(&self) -> BansResult<()> {
        self.query(&[SqlQuery::plain(Query::Ping)]).await.map(|_| ())
    }
}

/// `sqlx` backed implementation over an `AnyPool`
#[derive(Clone)]
pub struct SqlBackend {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlBackend {
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Bind typed parameters positionally; values are never interpolated into SQL
fn bind_params<'q>(sql: &'q str, params: &[SqlValue]) -> SqlxQuery<'q, Any, AnyArguments<'q>> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Int(value) => query.bind(*value),
            SqlValue::Text(value) => query.bind(value.clone()),
        })
}

#[async_trait]
impl StorageBackend for SqlBackend {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&self, queries: &[SqlQuery]) -> BansResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BansError::storage("BEGIN", e))?;

        for query in queries {
            let sql = query.query.eval(self.dialect);
            debug!(statement = %sql, params = query.params.len(), "Executing statement");

            bind_params(&sql, &query.params)
                .execute(&mut *tx)
                .await
                .map_err(|e| BansError::storage(sql.clone(), e))?;
        }

        tx.commit()
            .await
            .map_err(|e| BansError::storage("COMMIT", e))?;

        Ok(())
    }

    async fn query(&self, queries: &[SqlQuery]) -> BansResult<Vec<Vec<SqlRow>>> {
        let mut results = Vec::with_capacity(queries.len());

        for query in queries {
            let sql = query.query.eval(self.dialect);
            debug!(statement = %sql, params = query.params.len(), "Running query");

            let rows = bind_params(&sql, &query.params)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| BansError::storage(sql.clone(), e))?;

            let rows = rows
                .iter()
                .map(SqlRow::from_any)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| BansError::storage(sql.clone(), e))?;

            results.push(rows);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_backend;

    #[tokio::test]
    async fn test_query_preserves_statement_order() {
        let backend = memory_backend().await;

        backend
            .execute(&[SqlQuery::new(
                Query::InsertCache,
                vec![
                    SqlValue::from("069a79f4-44e9-4726-a5be-fca90e38aaf5"),
                    SqlValue::from("Notch"),
                    SqlValue::from("127.0.0.1"),
                    SqlValue::Int(10),
                    SqlValue::Int(20),
                ],
            )])
            .await
            .unwrap();

        let results = backend
            .query(&[
                SqlQuery::plain(Query::SelectAllCached),
                SqlQuery::plain(Query::SelectAllActive),
                SqlQuery::plain(Query::Ping),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].len(), 1);
        assert_eq!(results[0][0].get_text("name").unwrap(), "Notch");
        assert_eq!(results[0][0].get_i64("update_iplist").unwrap(), 20);
        assert!(results[1].is_empty());
        assert_eq!(results[2].len(), 1);
    }

    #[tokio::test]
    async fn test_failed_statement_rolls_back_batch() {
        let backend = memory_backend().await;

        let insert = SqlQuery::new(
            Query::InsertCache,
            vec![
                SqlValue::from("069a79f4-44e9-4726-a5be-fca90e38aaf5"),
                SqlValue::from("Notch"),
                SqlValue::from(""),
                SqlValue::Int(1),
                SqlValue::Int(1),
            ],
        );
        // NOT NULL violation on name
        let broken = SqlQuery::new(
            Query::InsertCache,
            vec![
                SqlValue::from("61699b2e-d327-4a01-9f1e-0ea8c3f06bc6"),
                SqlValue::Null,
                SqlValue::from(""),
                SqlValue::Int(1),
                SqlValue::Int(1),
            ],
        );

        let err = backend.execute(&[insert, broken]).await.unwrap_err();
        assert!(matches!(err, BansError::Storage { .. }));

        let rows = backend
            .query(&[SqlQuery::plain(Query::SelectAllCached)])
            .await
            .unwrap();
        assert!(rows[0].is_empty());
    }

    #[tokio::test]
    async fn test_ping() {
        let backend = memory_backend().await;
        backend.ping().await.unwrap();
    }
}
