use crate::error::DbError;
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{Flag, RetryPolicy};
use ledger::{ColumnCell, RowHandle, TableTransport, TransportError};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{Connection, Row};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Advisory lock key claimed for the duration of a run.
const RUN_LOCK_KEY: i64 = 0x4b50_495f_4c45_4447;

fn backend(e: sqlx::Error) -> TransportError {
    DbError::from(e).into()
}

/// The ledger table stored in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgTable {
    pool: PgPool,
    retry: RetryPolicy,
    /// The connection that holds the advisory lock while a run is active.
    run_lock: Arc<Mutex<Option<PoolConnection<Postgres>>>>,
}

impl PgTable {
    pub fn new(pool: PgPool, retry: RetryPolicy) -> Self {
        Self {
            pool,
            retry,
            run_lock: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl TableTransport for PgTable {
    async fn begin_run(&self) -> Result<(), TransportError> {
        let mut held = self.run_lock.lock().await;
        if held.is_some() {
            return Err(TransportError::Locked);
        }

        let pool = &self.pool;
        let mut conn = self
            .retry
            .run("ledger.acquire", || async move { pool.acquire().await })
            .await
            .map_err(backend)?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .map_err(backend)?;
        if !acquired {
            tracing::warn!("Ledger advisory lock is held by another session.");
            return Err(TransportError::Locked);
        }
        *held = Some(conn);
        Ok(())
    }

    async fn end_run(&self) -> Result<(), TransportError> {
        let Some(mut conn) = self.run_lock.lock().await.take() else {
            return Ok(());
        };
        let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(RUN_LOCK_KEY)
            .execute(&mut *conn)
            .await;
        if let Err(e) = unlocked {
            // The session may still hold the lock; it must not go back to the pool.
            tracing::warn!(error = %e, "Advisory unlock failed; closing the lock connection.");
            if let Err(close_err) = conn.detach().close().await {
                tracing::debug!(error = %close_err, "Lock connection closed uncleanly.");
            }
            return Err(backend(e));
        }
        Ok(())
    }

    async fn read_header(&self) -> Result<Vec<String>, TransportError> {
        let pool = &self.pool;
        self.retry
            .run("ledger.read_header", || async move {
                sqlx::query_scalar::<_, String>(
                    "SELECT column_key FROM ledger_header ORDER BY position ASC",
                )
                .fetch_all(pool)
                .await
            })
            .await
            .map_err(backend)
    }

    async fn write_header(&self, header: &[String]) -> Result<(), TransportError> {
        let pool = &self.pool;
        self.retry
            .run("ledger.write_header", || async move {
                let mut tx = pool.begin().await?;
                sqlx::query("DELETE FROM ledger_header")
                    .execute(&mut *tx)
                    .await?;
                for (position, key) in header.iter().enumerate() {
                    sqlx::query("INSERT INTO ledger_header (position, column_key) VALUES ($1, $2)")
                        .bind(position as i32)
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await
            })
            .await
            .map_err(backend)
    }

    async fn find_row(&self, date: NaiveDate) -> Result<Option<RowHandle>, TransportError> {
        let pool = &self.pool;
        let row_id = self
            .retry
            .run("ledger.find_row", || async move {
                sqlx::query_scalar::<_, i64>("SELECT row_id FROM ledger_rows WHERE row_date = $1")
                    .bind(date)
                    .fetch_optional(pool)
                    .await
            })
            .await
            .map_err(backend)?;
        Ok(row_id.map(|id| RowHandle { id, date }))
    }

    async fn append_row(&self, date: NaiveDate) -> Result<RowHandle, TransportError> {
        let pool = &self.pool;
        let id = self
            .retry
            .run("ledger.append_row", || async move {
                sqlx::query_scalar::<_, i64>(
                    "INSERT INTO ledger_rows (row_date) VALUES ($1) RETURNING row_id",
                )
                .bind(date)
                .fetch_one(pool)
                .await
            })
            .await
            .map_err(backend)?;
        Ok(RowHandle { id, date })
    }

    async fn read_column(&self, column: &str) -> Result<Vec<ColumnCell>, TransportError> {
        let pool = &self.pool;
        let rows = self
            .retry
            .run("ledger.read_column", || async move {
                sqlx::query(
                    r#"
                    SELECT r.row_date, c.raw_value
                    FROM ledger_cells AS c
                    JOIN ledger_rows AS r ON r.row_id = c.row_id
                    WHERE c.column_key = $1 AND c.raw_value <> ''
                    ORDER BY r.row_id ASC
                    "#,
                )
                .bind(column)
                .fetch_all(pool)
                .await
            })
            .await
            .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                Ok(ColumnCell {
                    date: row.try_get("row_date").map_err(backend)?,
                    raw: row.try_get("raw_value").map_err(backend)?,
                })
            })
            .collect()
    }

    async fn write_cell(
        &self,
        row: &RowHandle,
        column: &str,
        value: &str,
    ) -> Result<(), TransportError> {
        let pool = &self.pool;
        let row_id = row.id;
        self.retry
            .run("ledger.write_cell", || async move {
                sqlx::query(
                    r#"
                    INSERT INTO ledger_cells (row_id, column_key, raw_value)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (row_id, column_key) DO UPDATE SET raw_value = EXCLUDED.raw_value
                    "#,
                )
                .bind(row_id)
                .bind(column)
                .bind(value)
                .execute(pool)
                .await
            })
            .await
            .map_err(backend)?;
        Ok(())
    }

    /// All cells of the row are written in one transaction.
    async fn write_cells(
        &self,
        row: &RowHandle,
        cells: &[(String, String)],
    ) -> Result<(), TransportError> {
        let pool = &self.pool;
        let row_id = row.id;
        self.retry
            .run("ledger.write_cells", || async move {
                let mut tx = pool.begin().await?;
                for (column, value) in cells {
                    sqlx::query(
                        r#"
                        INSERT INTO ledger_cells (row_id, column_key, raw_value)
                        VALUES ($1, $2, $3)
                        ON CONFLICT (row_id, column_key) DO UPDATE SET raw_value = EXCLUDED.raw_value
                        "#,
                    )
                    .bind(row_id)
                    .bind(column)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await
            })
            .await
            .map_err(backend)
    }

    async fn set_cell_style(
        &self,
        row: &RowHandle,
        column: &str,
        flag: Flag,
    ) -> Result<(), TransportError> {
        let pool = &self.pool;
        let row_id = row.id;
        let style = flag.as_str();
        self.retry
            .run("ledger.set_cell_style", || async move {
                sqlx::query(
                    r#"
                    INSERT INTO ledger_cells (row_id, column_key, style)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (row_id, column_key) DO UPDATE SET style = EXCLUDED.style
                    "#,
                )
                .bind(row_id)
                .bind(column)
                .bind(style)
                .execute(pool)
                .await
            })
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{connect, run_migrations};
    use core_types::{MetricKey, MetricMap, MetricValue};
    use ledger::Ledger;
    use rust_decimal_macros::dec;

    // Needs a disposable database; skipped when DATABASE_URL is unset.
    #[tokio::test]
    async fn ledger_round_trip_on_postgres() {
        if std::env::var("DATABASE_URL").is_err() {
            eprintln!("DATABASE_URL not set, skipping");
            return;
        }
        let pool = connect().await.unwrap();
        run_migrations(&pool).await.unwrap();
        sqlx::query("TRUNCATE ledger_cells, ledger_rows, ledger_header")
            .execute(&pool)
            .await
            .unwrap();

        let table = Arc::new(PgTable::new(pool.clone(), RetryPolicy::immediate(1)));
        table.begin_run().await.unwrap();
        assert_eq!(table.begin_run().await, Err(TransportError::Locked));

        let key = MetricKey::new("bank_total_balance_eur").unwrap();
        let mut ledger = Ledger::open(table.clone()).await.unwrap();
        ledger.reconcile_schema([&key]).await.unwrap();

        let day = |d| NaiveDate::from_ymd_opt(2024, 5, d).unwrap();
        for (d, v) in [(2, dec!(20)), (1, dec!(10)), (3, dec!(30))] {
            let values: MetricMap = [(key.clone(), MetricValue::Number(v))].into_iter().collect();
            ledger.upsert_row(day(d), &values).await.unwrap();
        }

        let history = ledger.history_of(&key, day(3)).await.unwrap();
        assert_eq!(
            history,
            vec![MetricValue::Number(dec!(10)), MetricValue::Number(dec!(20))]
        );
        assert_eq!(
            table.read_header().await.unwrap(),
            vec!["date", "bank_total_balance_eur", "notes"]
        );

        let row = table.find_row(day(3)).await.unwrap().unwrap();
        ledger.mark_cell(&row, &key, Flag::Red).await.unwrap();
        let style: Option<String> = sqlx::query_scalar(
            "SELECT c.style FROM ledger_cells c JOIN ledger_rows r USING (row_id) \
             WHERE r.row_date = $1 AND c.column_key = $2",
        )
        .bind(day(3))
        .bind(key.as_str())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(style.as_deref().map(Flag::from_style), Some(Flag::Red));

        table.end_run().await.unwrap();
        table.begin_run().await.unwrap();

        // Kill the session holding the lock so the unlock statement fails; the
        // broken session must not be handed out again.
        sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_locks \
             WHERE locktype = 'advisory' AND pid <> pg_backend_pid()",
        )
        .execute(&pool)
        .await
        .unwrap();
        assert!(matches!(table.end_run().await, Err(TransportError::Backend(_))));

        table.begin_run().await.unwrap();
        table.end_run().await.unwrap();
    }
}
