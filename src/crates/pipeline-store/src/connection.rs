//! Connection pool wrapper and migration runner.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;

pub type DatabasePool = SqlitePool;

/// Wraps a SQLite pool restricted to a single writer connection, matching
/// spec's single-writer-per-process requirement for the write path.
/// Readers may share a separate pool with more connections.
#[derive(Clone)]
pub struct DatabaseConnection {
    pool: Arc<DatabasePool>,
}

impl DatabaseConnection {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::with_max_connections(database_url, 1).await
    }

    pub async fn connect_read_pool(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        Self::with_max_connections(database_url, max_connections).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").fetch_one(self.pool.as_ref()).await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_migrates_in_memory() {
        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        conn.health_check().await.unwrap();
    }
}
