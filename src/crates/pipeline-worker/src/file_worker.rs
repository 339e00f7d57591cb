//! The `analyze-file` job handler (spec §4.4): prompt, sanitize,
//! validate, then one transactional write per batch.

use crate::prompt::{compose_file_analysis_prompt, FILE_ANALYSIS_SYSTEM_PROMPT};
use crate::sanitize::sanitize;
use llm::PromptRunner;
use pipeline_core::model::{
    AnalysisFinding, BatchFile, CandidateRelationship, Evidence, EvidenceSource, File, FileStatus, Poi,
    RelationshipStatus, RelationshipType,
};
use pipeline_store::transaction::{record_file_analysis, FileAnalysisRecord};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Default confidence when the model omits `probability` — uncalibrated
/// per spec §4.4 step 5, logged so operators can see how often it fires.
const DEFAULT_PROBABILITY: f64 = 0.5;

#[derive(Deserialize)]
struct FileAnalysisJobPayload {
    #[allow(dead_code)]
    #[serde(rename = "batchId")]
    batch_id: String,
    #[serde(rename = "runId")]
    run_id: String,
    files: Vec<BatchFile>,
}

pub struct FileAnalysisWorker {
    pool: SqlitePool,
    runner: Arc<dyn PromptRunner>,
}

impl FileAnalysisWorker {
    pub fn new(pool: SqlitePool, runner: Arc<dyn PromptRunner>) -> Self {
        Self { pool, runner }
    }

    /// Handle one `file-analysis-queue` job payload. Returns `Err` with
    /// a message the queue manager classifies for retry-vs-DLQ routing:
    /// transport failures read as transient, schema violations as
    /// deterministic (see `pipeline_core::error::classify_message`).
    pub async fn handle(&self, payload: String) -> Result<(), String> {
        let job: FileAnalysisJobPayload =
            serde_json::from_str(&payload).map_err(|e| format!("malformed job payload: {e}"))?;

        let prompt = compose_file_analysis_prompt(&job.files);
        let raw_response = self
            .runner
            .run(FILE_ANALYSIS_SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| format!("llm transport error (connection): {e}"))?;

        let sanitized = sanitize(&raw_response);
        let finding: AnalysisFinding = serde_json::from_str(&sanitized)
            .map_err(|e| format!("schema violation: response is not valid pois/relationships JSON: {e}"))?;

        for file in &job.files {
            let record = build_record(&job.run_id, file, &finding);
            record_file_analysis(&self.pool, &record)
                .await
                .map_err(|e| format!("database error: {e}"))?;
        }
        Ok(())
    }
}

fn build_record(run_id: &str, file: &BatchFile, finding: &AnalysisFinding) -> FileAnalysisRecord {
    let file_id = Uuid::new_v4().to_string();
    let file_checksum = {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(file.content.as_bytes());
        format!("{:x}", hasher.finalize())
    };

    let mut pois = Vec::new();
    for raw_poi in &finding.pois {
        let Some(poi_type) = pipeline_core::model::PoiType::parse(&raw_poi.poi_type) else {
            warn!(kind = %raw_poi.poi_type, "unknown POI type tag, skipping");
            continue;
        };
        let checksum = Poi::compute_checksum(poi_type, &raw_poi.name, &file.path);
        pois.push(Poi {
            id: Uuid::new_v4().to_string(),
            file_id: file_id.clone(),
            poi_type,
            name: raw_poi.name.clone(),
            start_line: raw_poi.start_line,
            end_line: raw_poi.end_line,
            is_exported: raw_poi.is_exported,
            checksum,
        });
    }

    let mut relationships = Vec::new();
    for raw_rel in &finding.relationships {
        let Some(relationship_type) = RelationshipType::parse(&raw_rel.relationship_type) else {
            warn!(kind = %raw_rel.relationship_type, "unknown relationship type tag, skipping");
            continue;
        };
        let probability = raw_rel.probability.map(|p| p.clamp(0.0, 1.0)).unwrap_or_else(|| {
            warn!(source = %raw_rel.source, target = %raw_rel.target, "missing probability, defaulting to uncalibrated 0.5");
            DEFAULT_PROBABILITY
        });
        // Source/target checksums assume both POIs live in this same
        // file; cross-file edges are resolved by the directory/global
        // workers once both sides exist in the store.
        let source_checksum = find_poi_checksum(finding, &raw_rel.source, &file.path);
        let target_checksum = find_poi_checksum(finding, &raw_rel.target, &file.path);
        let (Some(source_checksum), Some(target_checksum)) = (source_checksum, target_checksum) else {
            warn!(source = %raw_rel.source, target = %raw_rel.target, "relationship references an unknown POI name, skipping");
            continue;
        };

        let relationship = CandidateRelationship {
            id: Uuid::new_v4().to_string(),
            source_poi_id: source_checksum,
            target_poi_id: target_checksum,
            relationship_type,
            status: RelationshipStatus::Pending,
            confidence_score: probability,
            run_id: run_id.to_string(),
        };
        let evidence = Evidence {
            id: Uuid::new_v4().to_string(),
            relationship_id: relationship.id.clone(),
            run_id: run_id.to_string(),
            source_worker: EvidenceSource::File,
            initial_score: probability,
            found_relationship: true,
            payload: raw_rel.explanation.clone().unwrap_or_default(),
        };
        relationships.push((relationship, evidence));
    }

    FileAnalysisRecord {
        run_id: run_id.to_string(),
        file: File {
            id: file_id,
            path: file.path.clone(),
            checksum: file_checksum,
            language: None,
            status: FileStatus::Completed,
            special_type: None,
            last_processed: Some(chrono::Utc::now()),
        },
        pois,
        relationships,
    }
}

fn find_poi_checksum(finding: &AnalysisFinding, name: &str, file_path: &str) -> Option<String> {
    finding.pois.iter().find(|p| p.name == name).and_then(|p| {
        pipeline_core::model::PoiType::parse(&p.poi_type).map(|t| Poi::compute_checksum(t, name, file_path))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pipeline_store::connection::DatabaseConnection;

    struct StubRunner(String);

    #[async_trait]
    impl PromptRunner for StubRunner {
        async fn run(&self, _system_prompt: &str, _user_prompt: &str) -> llm::Result<String> {
            Ok(self.0.clone())
        }
    }

    async fn setup() -> DatabaseConnection {
        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        conn
    }

    fn payload() -> String {
        serde_json::json!({
            "batchId": "b1",
            "runId": "run1",
            "files": [{"path": "src/lib.rs", "content": "fn a() {} fn b() {}", "tokens": 5}],
        })
        .to_string()
    }

    #[tokio::test]
    async fn well_formed_response_commits_pois_and_relationships() {
        let conn = setup().await;
        let response = serde_json::json!({
            "pois": [
                {"type": "Function", "name": "a", "start_line": 1, "end_line": 1, "is_exported": true},
                {"type": "Function", "name": "b", "start_line": 2, "end_line": 2, "is_exported": false},
            ],
            "relationships": [
                {"source": "a", "target": "b", "type": "CALLS", "explanation": "a calls b", "probability": 0.9},
            ],
        })
        .to_string();

        let worker = FileAnalysisWorker::new(conn.pool().clone(), Arc::new(StubRunner(response)));
        worker.handle(payload()).await.unwrap();

        let pending = pipeline_store::repositories::outbox::list_pending(conn.pool(), 10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn fenced_and_truncated_response_still_parses() {
        let conn = setup().await;
        let response = "```json\n{\"pois\": [{\"type\": \"Function\", \"name\": \"a\",}], \"relationships\": []}"
            .to_string();
        let worker = FileAnalysisWorker::new(conn.pool().clone(), Arc::new(StubRunner(response)));
        worker.handle(payload()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_probability_defaults_to_uncalibrated_half() {
        let conn = setup().await;
        let response = serde_json::json!({
            "pois": [
                {"type": "Function", "name": "a"},
                {"type": "Function", "name": "b"},
            ],
            "relationships": [{"source": "a", "target": "b", "type": "CALLS", "explanation": "x"}],
        })
        .to_string();
        let worker = FileAnalysisWorker::new(conn.pool().clone(), Arc::new(StubRunner(response)));
        worker.handle(payload()).await.unwrap();

        let relationships = pipeline_store::repositories::relationships::list_pending(conn.pool(), "run1")
            .await
            .unwrap();
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].confidence_score, 0.5);
    }

    #[tokio::test]
    async fn missing_top_level_keys_is_a_schema_violation() {
        let conn = setup().await;
        let worker = FileAnalysisWorker::new(conn.pool().clone(), Arc::new(StubRunner("{\"oops\": true}".into())));
        let err = worker.handle(payload()).await.unwrap_err();
        assert!(err.contains("schema violation"));
    }
}
