//! File row access.

use crate::error::map_sqlx;
use chrono::{DateTime, Utc};
use pipeline_core::error::Result;
use pipeline_core::model::{File, FileStatus, SpecialFileType};
use sqlx::{Executor, Row, Sqlite, SqlitePool};

fn status_str(status: FileStatus) -> &'static str {
    match status {
        FileStatus::Pending => "pending",
        FileStatus::Processing => "processing",
        FileStatus::Completed => "completed",
        FileStatus::Error => "error",
    }
}

fn parse_status(raw: &str) -> FileStatus {
    match raw {
        "processing" => FileStatus::Processing,
        "completed" => FileStatus::Completed,
        "error" => FileStatus::Error,
        _ => FileStatus::Pending,
    }
}

fn special_type_str(special: Option<SpecialFileType>) -> Option<&'static str> {
    special.map(|s| match s {
        SpecialFileType::Manifest => "manifest",
        SpecialFileType::Entrypoint => "entrypoint",
        SpecialFileType::Config => "config",
    })
}

fn parse_special_type(raw: Option<String>) -> Option<SpecialFileType> {
    match raw.as_deref() {
        Some("manifest") => Some(SpecialFileType::Manifest),
        Some("entrypoint") => Some(SpecialFileType::Entrypoint),
        Some("config") => Some(SpecialFileType::Config),
        _ => None,
    }
}

fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> File {
    let last_processed: Option<String> = row.get("last_processed");
    File {
        id: row.get("id"),
        path: row.get("path"),
        checksum: row.get("checksum"),
        language: row.get("language"),
        status: parse_status(row.get::<String, _>("status").as_str()),
        special_type: parse_special_type(row.get("special_type")),
        last_processed: last_processed.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
    }
}

/// Insert or replace a file row by id (invariant 1: rows are replaced on
/// content change, never duplicated or deleted).
pub async fn upsert<'e, E>(executor: E, file: &File) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO files (id, path, checksum, language, status, special_type, last_processed)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           path = excluded.path,
           checksum = excluded.checksum,
           language = excluded.language,
           status = excluded.status,
           special_type = excluded.special_type,
           last_processed = excluded.last_processed",
    )
    .bind(&file.id)
    .bind(&file.path)
    .bind(&file.checksum)
    .bind(&file.language)
    .bind(status_str(file.status))
    .bind(special_type_str(file.special_type))
    .bind(file.last_processed.map(|d| d.to_rfc3339()))
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<File>> {
    let row = sqlx::query("SELECT * FROM files WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(row.as_ref().map(row_to_file))
}

pub async fn list_by_status(pool: &SqlitePool, status: FileStatus) -> Result<Vec<File>> {
    let rows = sqlx::query("SELECT * FROM files WHERE status = ? ORDER BY path")
        .bind(status_str(status))
        .fetch_all(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(rows.iter().map(row_to_file).collect())
}
