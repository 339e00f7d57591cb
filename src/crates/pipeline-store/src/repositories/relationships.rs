//! Candidate relationship row access.

use crate::error::map_sqlx;
use pipeline_core::error::Result;
use pipeline_core::model::{CandidateRelationship, RelationshipStatus, RelationshipType};
use sqlx::{Executor, Row, Sqlite, SqlitePool};

fn status_str(status: RelationshipStatus) -> &'static str {
    match status {
        RelationshipStatus::Pending => "pending",
        RelationshipStatus::Validated => "validated",
        RelationshipStatus::Discarded => "discarded",
        RelationshipStatus::Conflicted => "conflicted",
    }
}

fn parse_status(raw: &str) -> RelationshipStatus {
    match raw {
        "validated" => RelationshipStatus::Validated,
        "discarded" => RelationshipStatus::Discarded,
        "conflicted" => RelationshipStatus::Conflicted,
        _ => RelationshipStatus::Pending,
    }
}

fn row_to_relationship(row: &sqlx::sqlite::SqliteRow) -> Option<CandidateRelationship> {
    let relationship_type = RelationshipType::parse(row.get::<String, _>("relationship_type").as_str())?;
    Some(CandidateRelationship {
        id: row.get("id"),
        source_poi_id: row.get("source_poi_id"),
        target_poi_id: row.get("target_poi_id"),
        relationship_type,
        status: parse_status(row.get::<String, _>("status").as_str()),
        confidence_score: row.get("confidence_score"),
        run_id: row.get("run_id"),
    })
}

pub async fn insert<'e, E>(executor: E, rel: &CandidateRelationship) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO relationships (id, source_poi_id, target_poi_id, relationship_type, status, confidence_score, run_id)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&rel.id)
    .bind(&rel.source_poi_id)
    .bind(&rel.target_poi_id)
    .bind(rel.relationship_type.as_wire_str())
    .bind(status_str(rel.status))
    .bind(rel.confidence_score)
    .bind(&rel.run_id)
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

/// Apply reconciliation's verdict. Never transitions a row to `validated`
/// without a caller having first confirmed evidence exists (invariant 3
/// is enforced by the reconciler, not this layer).
pub async fn set_status_and_score(
    pool: &SqlitePool,
    id: &str,
    status: RelationshipStatus,
    confidence_score: f64,
) -> Result<()> {
    sqlx::query("UPDATE relationships SET status = ?, confidence_score = ? WHERE id = ?")
        .bind(status_str(status))
        .bind(confidence_score)
        .bind(id)
        .execute(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<CandidateRelationship>> {
    let row = sqlx::query("SELECT * FROM relationships WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(row.as_ref().and_then(row_to_relationship))
}

pub async fn list_pending(pool: &SqlitePool, run_id: &str) -> Result<Vec<CandidateRelationship>> {
    let rows = sqlx::query("SELECT * FROM relationships WHERE run_id = ? AND status = 'pending' ORDER BY id")
        .bind(run_id)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(rows.iter().filter_map(row_to_relationship).collect())
}

/// Page through `VALIDATED` relationships for graph finalization.
pub async fn page_validated(pool: &SqlitePool, run_id: &str, after_id: Option<&str>, limit: i64) -> Result<Vec<CandidateRelationship>> {
    let rows = sqlx::query(
        "SELECT * FROM relationships
         WHERE run_id = ? AND status = 'validated' AND id > ?
         ORDER BY id LIMIT ?",
    )
    .bind(run_id)
    .bind(after_id.unwrap_or(""))
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx)?;
    Ok(rows.iter().filter_map(row_to_relationship).collect())
}

/// Every relationship in a run, regardless of status; used by the
/// global resolution worker, which reviews the whole run at once.
pub async fn list_by_run(pool: &SqlitePool, run_id: &str) -> Result<Vec<CandidateRelationship>> {
    let rows = sqlx::query("SELECT * FROM relationships WHERE run_id = ? ORDER BY id")
        .bind(run_id)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(rows.iter().filter_map(row_to_relationship).collect())
}

/// Relationships whose source or target POI lives under `directory`;
/// used by the directory resolution worker to scope its review to one
/// directory's findings.
pub async fn list_by_directory(pool: &SqlitePool, run_id: &str, directory: &str) -> Result<Vec<CandidateRelationship>> {
    let prefix = format!("{}%", directory.trim_end_matches('/'));
    let rows = sqlx::query(
        "SELECT DISTINCT r.* FROM relationships r
         JOIN pois sp ON sp.checksum = r.source_poi_id
         JOIN files sf ON sf.id = sp.file_id
         JOIN pois tp ON tp.checksum = r.target_poi_id
         JOIN files tf ON tf.id = tp.file_id
         WHERE r.run_id = ? AND (sf.path LIKE ? OR tf.path LIKE ?)
         ORDER BY r.id",
    )
    .bind(run_id)
    .bind(&prefix)
    .bind(&prefix)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx)?;
    Ok(rows.iter().filter_map(row_to_relationship).collect())
}
