//! Directory and global resolution workers (spec §4.6): re-review
//! already-proposed relationships at a wider scope and record a second
//! (possibly contradicting) opinion as Evidence.

use crate::prompt::{compose_aggregation_prompt, AGGREGATION_SYSTEM_PROMPT};
use crate::sanitize::sanitize;
use llm::PromptRunner;
use pipeline_core::model::{AggregationResult, CandidateRelationship, Evidence, EvidenceSource, OutboxEventType};
use pipeline_store::repositories::{evidence as evidence_repo, outbox, pois, relationships};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Scope a resolution worker reviews: one directory's relationships, or
/// every relationship in the run (the global pass).
pub enum AggregationScope {
    Directory(String),
    Global,
}

pub struct AggregationWorker {
    pool: SqlitePool,
    runner: Arc<dyn PromptRunner>,
    source: EvidenceSource,
    event_type: OutboxEventType,
}

impl AggregationWorker {
    pub fn directory(pool: SqlitePool, runner: Arc<dyn PromptRunner>) -> Self {
        Self { pool, runner, source: EvidenceSource::Directory, event_type: OutboxEventType::DirectoryAnalysisFinding }
    }

    pub fn global(pool: SqlitePool, runner: Arc<dyn PromptRunner>) -> Self {
        Self { pool, runner, source: EvidenceSource::Global, event_type: OutboxEventType::RelationshipAnalysisFinding }
    }

    /// Review every relationship in `scope` for `run_id`, writing one
    /// Evidence row (and one outbox event) per reviewed relationship
    /// that the model actually returned a verdict for.
    pub async fn run(&self, run_id: &str, scope: AggregationScope) -> Result<usize, String> {
        let candidates = match &scope {
            AggregationScope::Directory(dir) => relationships::list_by_directory(&self.pool, run_id, dir)
                .await
                .map_err(|e| format!("database error: {e}"))?,
            AggregationScope::Global => {
                relationships::list_by_run(&self.pool, run_id).await.map_err(|e| format!("database error: {e}"))?
            }
        };
        if candidates.is_empty() {
            return Ok(0);
        }

        let annotated = self.annotate_with_names(&candidates).await?;
        let prompt = compose_aggregation_prompt(&annotated);
        let raw_response = self
            .runner
            .run(AGGREGATION_SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| format!("llm transport error (connection): {e}"))?;

        let sanitized = sanitize(&raw_response);
        let result: AggregationResult = serde_json::from_str(&sanitized)
            .map_err(|e| format!("schema violation: response is not valid findings JSON: {e}"))?;

        let known_ids: std::collections::HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let mut written = 0;
        for finding in &result.findings {
            if !known_ids.contains(finding.relationship_id.as_str()) {
                warn!(relationship_id = %finding.relationship_id, "aggregation worker returned an unknown relationship id, skipping");
                continue;
            }
            let probability = finding.probability.map(|p| p.clamp(0.0, 1.0)).unwrap_or(0.5);
            let evidence = Evidence {
                id: Uuid::new_v4().to_string(),
                relationship_id: finding.relationship_id.clone(),
                run_id: run_id.to_string(),
                source_worker: self.source,
                initial_score: probability,
                found_relationship: finding.agrees,
                payload: finding.explanation.clone().unwrap_or_default(),
            };

            let mut tx = self.pool.begin().await.map_err(|e| format!("database error: {e}"))?;
            evidence_repo::insert(&mut *tx, &evidence).await.map_err(|e| format!("database error: {e}"))?;
            let payload = serde_json::json!({
                "relationship_id": finding.relationship_id,
                "agrees": finding.agrees,
            })
            .to_string();
            outbox::insert(&mut *tx, self.event_type, &payload).await.map_err(|e| format!("database error: {e}"))?;
            tx.commit().await.map_err(|e| format!("database error: {e}"))?;
            written += 1;
        }
        Ok(written)
    }

    async fn annotate_with_names(
        &self,
        candidates: &[CandidateRelationship],
    ) -> Result<Vec<(CandidateRelationship, String, String)>, String> {
        let mut annotated = Vec::with_capacity(candidates.len());
        for rel in candidates {
            let source_name = pois::get_by_checksum(&self.pool, &rel.source_poi_id)
                .await
                .map_err(|e| format!("database error: {e}"))?
                .map(|p| p.name)
                .unwrap_or_else(|| rel.source_poi_id.clone());
            let target_name = pois::get_by_checksum(&self.pool, &rel.target_poi_id)
                .await
                .map_err(|e| format!("database error: {e}"))?
                .map(|p| p.name)
                .unwrap_or_else(|| rel.target_poi_id.clone());
            annotated.push((rel.clone(), source_name, target_name));
        }
        Ok(annotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pipeline_core::model::{File, FileStatus, Poi, PoiType, RelationshipStatus, RelationshipType};
    use pipeline_store::connection::DatabaseConnection;
    use pipeline_store::repositories::{files, pois as pois_repo, relationships as rel_repo};

    struct StubRunner(String);

    #[async_trait]
    impl PromptRunner for StubRunner {
        async fn run(&self, _system_prompt: &str, _user_prompt: &str) -> llm::Result<String> {
            Ok(self.0.clone())
        }
    }

    async fn seed() -> DatabaseConnection {
        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();

        files::upsert(
            conn.pool(),
            &File {
                id: "f1".into(),
                path: "src/a.rs".into(),
                checksum: "c".into(),
                language: None,
                status: FileStatus::Completed,
                special_type: None,
                last_processed: None,
            },
        )
        .await
        .unwrap();
        for (checksum, name) in [("p1", "a"), ("p2", "b")] {
            pois_repo::upsert_by_checksum(
                conn.pool(),
                &Poi {
                    id: Uuid::new_v4().to_string(),
                    file_id: "f1".into(),
                    poi_type: PoiType::Function,
                    name: name.into(),
                    start_line: 1,
                    end_line: 1,
                    is_exported: false,
                    checksum: checksum.into(),
                },
            )
            .await
            .unwrap();
        }
        rel_repo::insert(
            conn.pool(),
            &CandidateRelationship {
                id: "r1".into(),
                source_poi_id: "p1".into(),
                target_poi_id: "p2".into(),
                relationship_type: RelationshipType::Calls,
                status: RelationshipStatus::Pending,
                confidence_score: 0.6,
                run_id: "run1".into(),
            },
        )
        .await
        .unwrap();
        conn
    }

    #[tokio::test]
    async fn directory_worker_records_contradicting_evidence() {
        let conn = seed().await;
        let response = serde_json::json!({
            "findings": [{"relationship_id": "r1", "agrees": false, "probability": 0.2, "explanation": "no call found"}],
        })
        .to_string();
        let worker = AggregationWorker::directory(conn.pool().clone(), Arc::new(StubRunner(response)));
        let written = worker.run("run1", AggregationScope::Directory("src".into())).await.unwrap();
        assert_eq!(written, 1);

        let evidence = pipeline_store::repositories::evidence::list_for_relationship(conn.pool(), "r1").await.unwrap();
        assert_eq!(evidence.len(), 1);
        assert!(!evidence[0].found_relationship);
        assert_eq!(evidence[0].source_worker, EvidenceSource::Directory);
    }

    #[tokio::test]
    async fn empty_scope_is_a_noop() {
        let conn = seed().await;
        let worker = AggregationWorker::global(conn.pool().clone(), Arc::new(StubRunner("{}".into())));
        let written = worker.run("no-such-run", AggregationScope::Global).await.unwrap();
        assert_eq!(written, 0);
    }
}
