//! Run row access: one row per end-to-end pipeline invocation.

use crate::error::map_sqlx;
use chrono::{DateTime, Utc};
use pipeline_core::error::Result;
use pipeline_core::model::Run;
use sqlx::{Row, SqlitePool};

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Run {
    let started_at: String = row.get("started_at");
    let finished_at: Option<String> = row.get("finished_at");
    Run {
        run_id: row.get("run_id"),
        started_at: DateTime::parse_from_rfc3339(&started_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        finished_at: finished_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        files_discovered: row.get::<i64, _>("files_discovered") as u64,
        files_completed: row.get::<i64, _>("files_completed") as u64,
        files_errored: row.get::<i64, _>("files_errored") as u64,
        error: row.get("error"),
    }
}

pub async fn create(pool: &SqlitePool, run: &Run) -> Result<()> {
    sqlx::query(
        "INSERT INTO runs (run_id, started_at, finished_at, files_discovered, files_completed, files_errored, error)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&run.run_id)
    .bind(run.started_at.to_rfc3339())
    .bind(run.finished_at.map(|d| d.to_rfc3339()))
    .bind(run.files_discovered as i64)
    .bind(run.files_completed as i64)
    .bind(run.files_errored as i64)
    .bind(&run.error)
    .execute(pool)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, run_id: &str) -> Result<Option<Run>> {
    let row = sqlx::query("SELECT * FROM runs WHERE run_id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(row.as_ref().map(row_to_run))
}

pub async fn mark_finished(pool: &SqlitePool, run_id: &str, error: Option<&str>) -> Result<()> {
    sqlx::query("UPDATE runs SET finished_at = ?, error = ? WHERE run_id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(error)
        .bind(run_id)
        .execute(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

pub async fn set_files_discovered(pool: &SqlitePool, run_id: &str, count: u64) -> Result<()> {
    sqlx::query("UPDATE runs SET files_discovered = ? WHERE run_id = ?")
        .bind(count as i64)
        .bind(run_id)
        .execute(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DatabaseConnection;

    #[tokio::test]
    async fn create_and_finish_a_run() {
        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();

        let run = Run::new("run1");
        create(conn.pool(), &run).await.unwrap();
        assert!(get(conn.pool(), "run1").await.unwrap().unwrap().finished_at.is_none());

        mark_finished(conn.pool(), "run1", None).await.unwrap();
        assert!(get(conn.pool(), "run1").await.unwrap().unwrap().finished_at.is_some());
    }
}
