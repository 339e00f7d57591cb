//! Drives reconciliation over every pending relationship in a run.

use crate::score::reconcile;
use crate::status::{assign_status, Thresholds};
use pipeline_core::error::Result;
use pipeline_store::repositories::{evidence, relationships};
use sqlx::SqlitePool;
use tracing::info;

/// Reconcile every `pending` relationship for `run_id`: one relationship
/// can only be left `pending` by a crash mid-run, so this is both the
/// steady-state path (called right after evidence lands) and the
/// recovery path (re-run over the whole run).
pub async fn reconcile_run(pool: &SqlitePool, run_id: &str, thresholds: Thresholds) -> Result<usize> {
    let pending = relationships::list_pending(pool, run_id).await?;
    let mut reconciled = 0;
    for relationship in pending {
        let evidence_rows = evidence::list_for_relationship(pool, &relationship.id).await?;
        if evidence_rows.is_empty() {
            // invariant 3: never validate without at least one evidence row.
            continue;
        }
        let outcome = reconcile(&evidence_rows);
        let status = assign_status(outcome, thresholds);
        relationships::set_status_and_score(pool, &relationship.id, status, outcome.final_score).await?;
        reconciled += 1;
        info!(relationship_id = %relationship.id, score = outcome.final_score, ?status, "reconciled");
    }
    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::model::{CandidateRelationship, Evidence, EvidenceSource, RelationshipStatus, RelationshipType};
    use pipeline_store::connection::DatabaseConnection;

    #[tokio::test]
    async fn reconciles_only_relationships_with_evidence() {
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
        relationships::insert(
            conn.pool(),
            &CandidateRelationship {
                id: "r2_no_evidence".into(),
                source_poi_id: "p3".into(),
                target_poi_id: "p4".into(),
                relationship_type: RelationshipType::Imports,
                status: RelationshipStatus::Pending,
                confidence_score: 0.0,
                run_id: "run1".into(),
            },
        )
        .await
        .unwrap();
        evidence::insert(
            conn.pool(),
            &Evidence {
                id: "e1".into(),
                relationship_id: "r1".into(),
                run_id: "run1".into(),
                source_worker: EvidenceSource::File,
                initial_score: 0.9,
                found_relationship: true,
                payload: "{}".into(),
            },
        )
        .await
        .unwrap();

        let count = reconcile_run(conn.pool(), "run1", Thresholds::default()).await.unwrap();
        assert_eq!(count, 1);

        let r1 = relationships::get_by_id(conn.pool(), "r1").await.unwrap().unwrap();
        assert_eq!(r1.status, RelationshipStatus::Validated);

        let r2 = relationships::get_by_id(conn.pool(), "r2_no_evidence").await.unwrap().unwrap();
        assert_eq!(r2.status, RelationshipStatus::Pending);
    }
}
