//! Outbox row access for the transactional outbox publisher.

use crate::error::map_sqlx;
use chrono::{DateTime, Utc};
use pipeline_core::error::Result;
use pipeline_core::model::{OutboxEvent, OutboxEventType, OutboxStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};

fn event_type_str(t: OutboxEventType) -> &'static str {
    match t {
        OutboxEventType::FileAnalysisFinding => "file-analysis-finding",
        OutboxEventType::DirectoryAnalysisFinding => "directory-analysis-finding",
        OutboxEventType::RelationshipAnalysisFinding => "relationship-analysis-finding",
    }
}

fn parse_event_type(raw: &str) -> Option<OutboxEventType> {
    Some(match raw {
        "file-analysis-finding" => OutboxEventType::FileAnalysisFinding,
        "directory-analysis-finding" => OutboxEventType::DirectoryAnalysisFinding,
        "relationship-analysis-finding" => OutboxEventType::RelationshipAnalysisFinding,
        _ => return None,
    })
}

fn status_str(status: OutboxStatus) -> &'static str {
    match status {
        OutboxStatus::Pending => "PENDING",
        OutboxStatus::Published => "PUBLISHED",
        OutboxStatus::Failed => "FAILED",
    }
}

fn parse_status(raw: &str) -> OutboxStatus {
    match raw {
        "PUBLISHED" => OutboxStatus::Published,
        "FAILED" => OutboxStatus::Failed,
        _ => OutboxStatus::Pending,
    }
}

fn row_to_event(row: &SqliteRow) -> Option<OutboxEvent> {
    let event_type = parse_event_type(row.get::<String, _>("event_type").as_str())?;
    let created_at: String = row.get("created_at");
    Some(OutboxEvent {
        id: row.get("id"),
        event_type,
        payload: row.get("payload"),
        status: parse_status(row.get::<String, _>("status").as_str()),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Insert a row within the same transaction as the state change it
/// describes (invariant 2). Takes any sqlx executor so callers can pass
/// a `&mut Transaction` or a pool.
pub async fn insert<'e, E>(executor: E, event_type: OutboxEventType, payload: &str) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("INSERT INTO outbox (event_type, payload, status, created_at) VALUES (?, ?, 'PENDING', ?) RETURNING id")
        .bind(event_type_str(event_type))
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(executor)
        .await
        .map_err(map_sqlx)?;
    Ok(row.get("id"))
}

pub async fn list_pending(pool: &SqlitePool, limit: i64) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query("SELECT * FROM outbox WHERE status = 'PENDING' ORDER BY id LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(rows.iter().filter_map(row_to_event).collect())
}

pub async fn list_failed(pool: &SqlitePool, limit: i64) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query("SELECT * FROM outbox WHERE status = 'FAILED' ORDER BY id LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(rows.iter().filter_map(row_to_event).collect())
}

pub async fn set_status(pool: &SqlitePool, id: i64, status: OutboxStatus) -> Result<()> {
    sqlx::query("UPDATE outbox SET status = ? WHERE id = ?")
        .bind(status_str(status))
        .bind(id)
        .execute(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

/// Reset `FAILED` rows back to `PENDING` so the publisher retries them
/// (the "separate sweeper" spec.md §4.5 names).
pub async fn sweep_failed(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("UPDATE outbox SET status = 'PENDING' WHERE status = 'FAILED'")
        .execute(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(result.rows_affected())
}
