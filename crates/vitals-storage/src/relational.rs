//! Relational backend over SeaORM (PostgreSQL or SQLite).
//!
//! Every statement is raw SQL; placeholders follow the connected backend.
//! Single-row operations and whole batch transactions run under the retry
//! helper, so a dropped connection is retried with the standard backoff.

use crate::error::{Result, StorageError};
use crate::Storage;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Statement,
    TransactionTrait, Value,
};
use std::collections::HashMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use vitals_common::lifecycle::Component;
use vitals_common::retry::Backoff;

#[derive(Debug, Clone, Copy)]
enum Query {
    UpsertGauge,
    UpsertCounter,
    SelectGauge,
    SelectCounter,
    AllGauges,
    AllCounters,
}

impl Query {
    fn sql(self, backend: DatabaseBackend) -> &'static str {
        let pg = backend == DatabaseBackend::Postgres;
        match self {
            Query::UpsertGauge if pg => "INSERT INTO gauge (name, value) VALUES ($1, $2) \
                 ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value RETURNING value",
            Query::UpsertGauge => "INSERT INTO gauge (name, value) VALUES (?, ?) \
                 ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value RETURNING value",
            Query::UpsertCounter if pg => "INSERT INTO counter (name, value) VALUES ($1, $2) \
                 ON CONFLICT (name) DO UPDATE SET value = counter.value + EXCLUDED.value RETURNING value",
            Query::UpsertCounter => "INSERT INTO counter (name, value) VALUES (?, ?) \
                 ON CONFLICT (name) DO UPDATE SET value = counter.value + EXCLUDED.value RETURNING value",
            Query::SelectGauge if pg => "SELECT value FROM gauge WHERE name = $1",
            Query::SelectGauge => "SELECT value FROM gauge WHERE name = ?",
            Query::SelectCounter if pg => "SELECT value FROM counter WHERE name = $1",
            Query::SelectCounter => "SELECT value FROM counter WHERE name = ?",
            Query::AllGauges => "SELECT name, value FROM gauge",
            Query::AllCounters => "SELECT name, value FROM counter",
        }
    }
}

pub struct DbStorage {
    db: DatabaseConnection,
    backend: DatabaseBackend,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl DbStorage {
    /// Connects to `dsn`, retrying transient connection failures.
    ///
    /// # Errors
    ///
    /// [`StorageError::Permanent`] for DSNs of unsupported databases.
    pub async fn connect(dsn: &str) -> Result<Self> {
        if !(dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") || dsn.starts_with("sqlite:")) {
            return Err(StorageError::Permanent(format!(
                "unsupported database DSN scheme: {}",
                dsn.split(':').next().unwrap_or_default()
            )));
        }
        let backoff = Backoff::default();
        let cancel = CancellationToken::new();
        let db = backoff
            .retry(&cancel, StorageError::is_transient, || async move {
                Database::connect(dsn).await.map_err(StorageError::from)
            })
            .await?;
        Ok(Self::from_connection(db, backoff))
    }

    pub fn from_connection(db: DatabaseConnection, backoff: Backoff) -> Self {
        let backend = db.get_database_backend();
        Self {
            db,
            backend,
            backoff,
            cancel: CancellationToken::new(),
        }
    }

    fn stmt(&self, query: Query, values: impl IntoIterator<Item = Value>) -> Statement {
        Statement::from_sql_and_values(self.backend, query.sql(self.backend), values)
    }

    async fn retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.backoff
            .retry(&self.cancel, StorageError::is_transient, op)
            .await
    }

    async fn upsert_returning<T>(&self, query: Query, name: &str, value: Value, column: &str) -> Result<T>
    where
        T: sea_orm::TryGetable,
    {
        self.retry(|| {
            let stmt = self.stmt(query, [name.into(), value.clone()]);
            async move {
                let row = self
                    .db
                    .query_one(stmt)
                    .await?
                    .ok_or_else(|| StorageError::Permanent(format!("upsert of {name:?} returned no row")))?;
                Ok(row.try_get::<T>("", column)?)
            }
        })
        .await
    }

    async fn lookup<T>(&self, query: Query, kind: &'static str, name: &str) -> Result<T>
    where
        T: sea_orm::TryGetable,
    {
        self.retry(|| {
            let stmt = self.stmt(query, [name.into()]);
            async move {
                match self.db.query_one(stmt).await? {
                    Some(row) => Ok(row.try_get::<T>("", "value")?),
                    None => Err(StorageError::NotFound {
                        kind,
                        id: name.to_string(),
                    }),
                }
            }
        })
        .await
    }

    async fn all<T>(&self, query: Query) -> Result<HashMap<String, T>>
    where
        T: sea_orm::TryGetable,
    {
        self.retry(|| {
            let stmt = self.stmt(query, std::iter::empty());
            async move {
                let rows = self.db.query_all(stmt).await?;
                let mut out = HashMap::with_capacity(rows.len());
                for row in rows {
                    out.insert(row.try_get::<String>("", "name")?, row.try_get::<T>("", "value")?);
                }
                Ok(out)
            }
        })
        .await
    }

    /// Runs every statement in one transaction; the whole transaction is the
    /// unit of retry.
    async fn apply_batch(&self, query: Query, rows: Vec<[Value; 2]>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let rows = &rows;
        self.retry(|| async move {
            let txn = self.db.begin().await?;
            let mut outcome: std::result::Result<(), DbErr> = Ok(());
            for [name, value] in rows {
                let stmt = self.stmt(query, [name.clone(), value.clone()]);
                if let Err(e) = txn.execute(stmt).await {
                    outcome = Err(e);
                    break;
                }
            }
            match outcome {
                Ok(()) => txn.commit().await?,
                Err(e) => {
                    if let Err(rollback) = txn.rollback().await {
                        tracing::warn!(error = %rollback, "rollback failed");
                    }
                    return Err(e.into());
                }
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Storage for DbStorage {
    async fn update_gauge_by_name(&self, name: &str, value: f64) -> Result<f64> {
        self.upsert_returning(Query::UpsertGauge, name, value.into(), "value")
            .await
    }

    async fn update_counter_by_name(&self, name: &str, delta: i64) -> Result<i64> {
        self.upsert_returning(Query::UpsertCounter, name, delta.into(), "value")
            .await
    }

    async fn update_gauge_list(&self, gauges: &[(String, f64)]) -> Result<()> {
        let rows = gauges
            .iter()
            .map(|(name, value)| [name.as_str().into(), (*value).into()])
            .collect();
        self.apply_batch(Query::UpsertGauge, rows).await
    }

    async fn update_counter_list(&self, counters: &[(String, i64)]) -> Result<()> {
        let rows = counters
            .iter()
            .map(|(name, delta)| [name.as_str().into(), (*delta).into()])
            .collect();
        self.apply_batch(Query::UpsertCounter, rows).await
    }

    async fn gauge(&self, name: &str) -> Result<f64> {
        self.lookup(Query::SelectGauge, "gauge", name).await
    }

    async fn counter(&self, name: &str) -> Result<i64> {
        self.lookup(Query::SelectCounter, "counter", name).await
    }

    async fn gauges(&self) -> Result<HashMap<String, f64>> {
        self.all(Query::AllGauges).await
    }

    async fn counters(&self) -> Result<HashMap<String, i64>> {
        self.all(Query::AllCounters).await
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl Component for DbStorage {
    fn name(&self) -> &str {
        "db-storage"
    }

    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        if self.backend == DatabaseBackend::Sqlite {
            self.db
                .execute_unprepared("PRAGMA journal_mode=WAL;")
                .await?;
        }
        Migrator::up(&self.db, None).await?;

        // In-flight retries give up once the process starts shutting down.
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            cancel.cancel();
        });
        tracing::info!(backend = ?self.backend, "relational storage ready");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        self.db.clone().close().await?;
        Ok(())
    }
}
