//! SQLite-backed driver.
//!
//! All namespaces share one table keyed by `(namespace, id)`; values are
//! stored as JSON text.

use super::{decode, encode, DurableStore};
use crate::{driver::DriverKind, error::Result};
use async_trait::async_trait;
use persist_engine::{DocId, StoredValue};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Namespaced store persisting to a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url`, creating the database and table if needed.
    ///
    /// In-memory URLs are pinned to a single long-lived connection, since
    /// every SQLite connection would otherwise see its own empty database.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.run_migrations().await?;
        tracing::debug!(url = %url, "SQLite store opened");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS persisted (
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (namespace, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

const UPSERT: &str = r#"
    INSERT INTO persisted (namespace, id, value)
    VALUES (?1, ?2, ?3)
    ON CONFLICT (namespace, id) DO UPDATE SET value = excluded.value
"#;

const DELETE_ONE: &str = "DELETE FROM persisted WHERE namespace = ?1 AND id = ?2";

#[async_trait]
impl DurableStore for SqliteStore {
    fn kind(&self) -> DriverKind {
        DriverKind::Database
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<StoredValue>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM persisted WHERE namespace = ?1 AND id = ?2")
                .bind(namespace)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(text,)| decode(id, &text)).transpose()
    }

    async fn get_all(&self, namespace: &str) -> Result<BTreeMap<DocId, StoredValue>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, value FROM persisted WHERE namespace = ?1 ORDER BY id")
                .bind(namespace)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(id, text)| -> Result<(DocId, StoredValue)> {
                let value = decode(&id, &text)?;
                Ok((id, value))
            })
            .collect()
    }

    async fn set(&self, namespace: &str, id: &str, value: StoredValue) -> Result<()> {
        sqlx::query(UPSERT)
            .bind(namespace)
            .bind(id)
            .bind(encode(value)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_many(
        &self,
        namespace: &str,
        entries: BTreeMap<DocId, StoredValue>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (id, value) in entries {
            sqlx::query(UPSERT)
                .bind(namespace)
                .bind(id)
                .bind(encode(value)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove(&self, namespace: &str, id: &str) -> Result<()> {
        sqlx::query(DELETE_ONE)
            .bind(namespace)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_many(&self, namespace: &str, ids: &[DocId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(DELETE_ONE)
                .bind(namespace)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        sqlx::query("DELETE FROM persisted WHERE namespace = ?1")
            .bind(namespace)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
