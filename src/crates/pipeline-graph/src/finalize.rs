//! Graph finalization (spec §4.8): page through `VALIDATED`
//! relationships, merge each page's POIs and edges within one sink
//! transaction, and shrink the page on commit failure down to a
//! minimum of 1 before giving up on a relationship.

use crate::sink::GraphSink;
use pipeline_core::model::CandidateRelationship;
use pipeline_store::repositories::{evidence, pois, relationships};
use sqlx::SqlitePool;
use tracing::{info, warn};

const DEFAULT_PAGE_SIZE: i64 = 1_000;

pub struct FinalizationOutcome {
    pub merged: usize,
    /// Relationship ids that could not be merged even at batch size 1.
    pub dead_letter_ids: Vec<String>,
}

pub async fn finalize_run<S: GraphSink>(pool: &SqlitePool, sink: &S, run_id: &str) -> Result<FinalizationOutcome, String> {
    finalize_run_with_page_size(pool, sink, run_id, DEFAULT_PAGE_SIZE).await
}

pub async fn finalize_run_with_page_size<S: GraphSink>(
    pool: &SqlitePool,
    sink: &S,
    run_id: &str,
    page_size: i64,
) -> Result<FinalizationOutcome, String> {
    let mut merged = 0;
    let mut dead_letter_ids = Vec::new();
    let mut after_id: Option<String> = None;

    loop {
        let page = relationships::page_validated(pool, run_id, after_id.as_deref(), page_size)
            .await
            .map_err(|e| format!("database error: {e}"))?;
        if page.is_empty() {
            break;
        }
        after_id = page.last().map(|r| r.id.clone());

        let (page_merged, page_dead) = merge_batch_with_shrink(pool, sink, &page).await?;
        merged += page_merged;
        dead_letter_ids.extend(page_dead);
    }

    info!(run_id, merged, dead_lettered = dead_letter_ids.len(), "graph finalization complete");
    Ok(FinalizationOutcome { merged, dead_letter_ids })
}

/// Try to merge `batch` as one sink transaction; on failure, halve the
/// batch and retry each half, down to a minimum of 1 (at which point a
/// failing relationship is reported as dead-lettered rather than
/// retried forever).
fn merge_batch_with_shrink<'a, S: GraphSink>(
    pool: &'a SqlitePool,
    sink: &'a S,
    batch: &'a [CandidateRelationship],
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(usize, Vec<String>), String>> + Send + 'a>> {
    Box::pin(async move {
        match try_merge_batch(pool, sink, batch).await {
            Ok(()) => Ok((batch.len(), Vec::new())),
            Err(e) if batch.len() == 1 => {
                warn!(relationship_id = %batch[0].id, error = %e, "relationship could not be merged even alone, dead-lettering");
                Ok((0, vec![batch[0].id.clone()]))
            }
            Err(e) => {
                warn!(batch_size = batch.len(), error = %e, "batch commit failed, shrinking and retrying");
                let mid = batch.len() / 2;
                let (left, right) = batch.split_at(mid);
                let (left_merged, mut left_dead) = merge_batch_with_shrink(pool, sink, left).await?;
                let (right_merged, right_dead) = merge_batch_with_shrink(pool, sink, right).await?;
                left_dead.extend(right_dead);
                Ok((left_merged + right_merged, left_dead))
            }
        }
    })
}

async fn try_merge_batch<S: GraphSink>(pool: &SqlitePool, sink: &S, batch: &[CandidateRelationship]) -> Result<(), String> {
    sink.begin().await?;
    for rel in batch {
        let source = pois::get_by_checksum(pool, &rel.source_poi_id)
            .await
            .map_err(|e| format!("database error: {e}"))?
            .ok_or_else(|| format!("source poi {} not found", rel.source_poi_id))?;
        let target = pois::get_by_checksum(pool, &rel.target_poi_id)
            .await
            .map_err(|e| format!("database error: {e}"))?
            .ok_or_else(|| format!("target poi {} not found", rel.target_poi_id))?;
        let source_file = pipeline_store::repositories::files::get_by_id(pool, &source.file_id)
            .await
            .map_err(|e| format!("database error: {e}"))?
            .ok_or_else(|| "source file not found".to_string())?;
        let target_file = pipeline_store::repositories::files::get_by_id(pool, &target.file_id)
            .await
            .map_err(|e| format!("database error: {e}"))?
            .ok_or_else(|| "target file not found".to_string())?;

        // The seed evidence row (the file worker's original finding) is
        // the first one written for a relationship; later directory/global
        // evidence only ever records agreement or disagreement, not a
        // replacement explanation.
        let explanation = evidence::list_for_relationship(pool, &rel.id)
            .await
            .map_err(|e| format!("database error: {e}"))?
            .into_iter()
            .next()
            .map(|e| e.payload)
            .unwrap_or_default();

        sink.merge_poi(&source.checksum, &source_file.path, poi_type_str(source.poi_type), &source.name).await?;
        sink.merge_poi(&target.checksum, &target_file.path, poi_type_str(target.poi_type), &target.name).await?;
        sink.merge_relationship(
            &source.checksum,
            &target.checksum,
            rel.relationship_type.as_wire_str(),
            &explanation,
            rel.confidence_score,
        )
        .await?;
    }
    sink.commit().await
}

fn poi_type_str(t: pipeline_core::model::PoiType) -> &'static str {
    use pipeline_core::model::PoiType::*;
    match t {
        File => "File",
        Class => "Class",
        Function => "Function",
        Method => "Method",
        Variable => "Variable",
        Import => "Import",
        Export => "Export",
        Database => "Database",
        Table => "Table",
        View => "View",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullGraphSink;
    use pipeline_core::model::{File, FileStatus, Poi, PoiType, RelationshipStatus, RelationshipType};
    use pipeline_store::connection::DatabaseConnection;
    use pipeline_store::repositories::{files, pois as pois_repo, relationships as rel_repo};

    async fn seed_validated(count: usize) -> DatabaseConnection {
        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        files::upsert(
            conn.pool(),
            &File { id: "f1".into(), path: "a.rs".into(), checksum: "c".into(), language: None, status: FileStatus::Completed, special_type: None, last_processed: None },
        )
        .await
        .unwrap();
        for i in 0..count {
            let s = format!("s{i}");
            let t = format!("t{i}");
            pois_repo::upsert_by_checksum(
                conn.pool(),
                &Poi { id: format!("ps{i}"), file_id: "f1".into(), poi_type: PoiType::Function, name: s.clone(), start_line: 1, end_line: 1, is_exported: false, checksum: s.clone() },
            )
            .await
            .unwrap();
            pois_repo::upsert_by_checksum(
                conn.pool(),
                &Poi { id: format!("pt{i}"), file_id: "f1".into(), poi_type: PoiType::Function, name: t.clone(), start_line: 1, end_line: 1, is_exported: false, checksum: t.clone() },
            )
            .await
            .unwrap();
            rel_repo::insert(
                conn.pool(),
                &CandidateRelationship { id: format!("r{i}"), source_poi_id: s, target_poi_id: t, relationship_type: RelationshipType::Calls, status: RelationshipStatus::Pending, confidence_score: 0.9, run_id: "run1".into() },
            )
            .await
            .unwrap();
            rel_repo::set_status_and_score(conn.pool(), &format!("r{i}"), RelationshipStatus::Validated, 0.9).await.unwrap();
        }
        conn
    }

    #[tokio::test]
    async fn merges_every_validated_relationship() {
        let conn = seed_validated(3).await;
        let sink = NullGraphSink::new();
        let outcome = finalize_run(conn.pool(), &sink, "run1").await.unwrap();
        assert_eq!(outcome.merged, 3);
        assert!(outcome.dead_letter_ids.is_empty());

        let calls = sink.calls().await;
        assert_eq!(calls.iter().filter(|c| c.starts_with("merge_relationship")).count(), 3);
    }

    #[tokio::test]
    async fn merge_carries_the_seed_evidence_explanation() {
        use pipeline_core::model::{Evidence, EvidenceSource};

        let conn = seed_validated(1).await;
        pipeline_store::repositories::evidence::insert(
            conn.pool(),
            &Evidence {
                id: "ev0".into(),
                relationship_id: "r0".into(),
                run_id: "run1".into(),
                source_worker: EvidenceSource::File,
                initial_score: 0.9,
                found_relationship: true,
                payload: "s0 calls t0 directly".into(),
            },
        )
        .await
        .unwrap();

        let sink = NullGraphSink::new();
        let outcome = finalize_run(conn.pool(), &sink, "run1").await.unwrap();
        assert_eq!(outcome.merged, 1);

        let calls = sink.calls().await;
        assert!(calls.iter().any(|c| c.contains("s0 calls t0 directly")));
    }

    #[tokio::test]
    async fn pending_relationships_are_not_finalized() {
        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        let sink = NullGraphSink::new();
        let outcome = finalize_run(conn.pool(), &sink, "run1").await.unwrap();
        assert_eq!(outcome.merged, 0);
    }

    struct FailFirstSink {
        inner: NullGraphSink,
        attempts: tokio::sync::Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl GraphSink for FailFirstSink {
        async fn begin(&self) -> Result<(), String> {
            self.inner.begin().await
        }
        async fn merge_poi(&self, checksum: &str, file_path: &str, poi_type: &str, name: &str) -> Result<(), String> {
            self.inner.merge_poi(checksum, file_path, poi_type, name).await
        }
        async fn merge_relationship(&self, source_checksum: &str, target_checksum: &str, relationship_type: &str, explanation: &str, weight: f64) -> Result<(), String> {
            self.inner.merge_relationship(source_checksum, target_checksum, relationship_type, explanation, weight).await
        }
        async fn commit(&self) -> Result<(), String> {
            let mut attempts = self.attempts.lock().await;
            *attempts += 1;
            if *attempts == 1 {
                return Err("simulated commit failure".to_string());
            }
            self.inner.commit().await
        }
        async fn rollback(&self) -> Result<(), String> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn batch_commit_failure_shrinks_and_retries() {
        let conn = seed_validated(2).await;
        let sink = FailFirstSink { inner: NullGraphSink::new(), attempts: tokio::sync::Mutex::new(0) };
        let outcome = finalize_run_with_page_size(conn.pool(), &sink, "run1", 2).await.unwrap();
        assert_eq!(outcome.merged, 2);
    }
}
