//! Evidence row access: one row per worker opinion about a relationship.

use crate::error::map_sqlx;
use pipeline_core::error::Result;
use pipeline_core::model::{Evidence, EvidenceSource};
use sqlx::{Executor, Row, Sqlite, SqlitePool};

fn source_str(source: EvidenceSource) -> &'static str {
    match source {
        EvidenceSource::File => "File",
        EvidenceSource::Directory => "Directory",
        EvidenceSource::Global => "Global",
    }
}

fn parse_source(raw: &str) -> EvidenceSource {
    match raw {
        "Directory" => EvidenceSource::Directory,
        "Global" => EvidenceSource::Global,
        _ => EvidenceSource::File,
    }
}

fn row_to_evidence(row: &sqlx::sqlite::SqliteRow) -> Evidence {
    Evidence {
        id: row.get("id"),
        relationship_id: row.get("relationship_id"),
        run_id: row.get("run_id"),
        source_worker: parse_source(row.get::<String, _>("source_worker").as_str()),
        initial_score: row.get("initial_score"),
        found_relationship: row.get::<i64, _>("found_relationship") != 0,
        payload: row.get("payload"),
    }
}

pub async fn insert<'e, E>(executor: E, evidence: &Evidence) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO relationship_evidence (id, relationship_id, run_id, source_worker, initial_score, found_relationship, payload)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&evidence.id)
    .bind(&evidence.relationship_id)
    .bind(&evidence.run_id)
    .bind(source_str(evidence.source_worker))
    .bind(evidence.initial_score)
    .bind(evidence.found_relationship as i64)
    .bind(&evidence.payload)
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

/// Ordered evidence for one relationship, the input to reconciliation's
/// reduce (order is insertion order, i.e. the order evidence arrived in).
pub async fn list_for_relationship(pool: &SqlitePool, relationship_id: &str) -> Result<Vec<Evidence>> {
    let rows = sqlx::query("SELECT * FROM relationship_evidence WHERE relationship_id = ? ORDER BY rowid")
        .bind(relationship_id)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(rows.iter().map(row_to_evidence).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DatabaseConnection;
    use crate::repositories::relationships;
    use pipeline_core::model::{CandidateRelationship, RelationshipStatus, RelationshipType};

    async fn setup() -> DatabaseConnection {
        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        relationships::insert(
            conn.pool(),
            &CandidateRelationship {
                id: "r1".into(),
                source_poi_id: "p1".into(),
                target_poi_id: "p2".into(),
                relationship_type: RelationshipType::Calls,
                status: RelationshipStatus::Pending,
                confidence_score: 0.0,
                run_id: "run1".into(),
            },
        )
        .await
        .unwrap();
        conn
    }

    #[tokio::test]
    async fn evidence_preserves_insertion_order() {
        let conn = setup().await;
        for (i, found) in [true, false, true].into_iter().enumerate() {
            insert(
                conn.pool(),
                &Evidence {
                    id: format!("e{i}"),
                    relationship_id: "r1".into(),
                    run_id: "run1".into(),
                    source_worker: EvidenceSource::File,
                    initial_score: 0.5,
                    found_relationship: found,
                    payload: "{}".into(),
                },
            )
            .await
            .unwrap();
        }
        let list = list_for_relationship(conn.pool(), "r1").await.unwrap();
        assert_eq!(list.iter().map(|e| e.found_relationship).collect::<Vec<_>>(), vec![true, false, true]);
    }
}
