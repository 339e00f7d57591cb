//! Atomic multi-row writes that must land in a single transaction per
//! spec's invariant 2 (every OutboxEvent is written in the same
//! transaction as the state it describes).

use crate::error::map_sqlx;
use pipeline_core::error::Result;
use pipeline_core::model::{CandidateRelationship, Evidence, File, OutboxEventType, Poi};
use sqlx::SqlitePool;

/// Everything the file analysis worker produces from one batch item,
/// to be committed atomically: the File row, its POIs (deduped by
/// checksum), and one CandidateRelationship + seed Evidence pair per
/// proposed relationship.
pub struct FileAnalysisRecord {
    pub run_id: String,
    pub file: File,
    pub pois: Vec<Poi>,
    pub relationships: Vec<(CandidateRelationship, Evidence)>,
}

/// Commits a file analysis result: upserts the file, upserts POIs by
/// checksum, inserts pending relationships with their seed evidence,
/// and writes one `file-analysis-finding` outbox row naming the
/// inserted relationship ids. Returns the outbox row id.
pub async fn record_file_analysis(pool: &SqlitePool, record: &FileAnalysisRecord) -> Result<i64> {
    let mut tx = pool.begin().await.map_err(map_sqlx)?;

    crate::repositories::files::upsert(&mut *tx, &record.file).await?;
    for poi in &record.pois {
        crate::repositories::pois::upsert_by_checksum(&mut *tx, poi).await?;
    }
    for (relationship, evidence) in &record.relationships {
        crate::repositories::relationships::insert(&mut *tx, relationship).await?;
        crate::repositories::evidence::insert(&mut *tx, evidence).await?;
    }

    let relationship_ids: Vec<&str> = record.relationships.iter().map(|(r, _)| r.id.as_str()).collect();
    let payload = serde_json::json!({
        "run_id": record.run_id,
        "file_id": record.file.id,
        "relationship_ids": relationship_ids,
    })
    .to_string();
    let outbox_id = crate::repositories::outbox::insert(&mut *tx, OutboxEventType::FileAnalysisFinding, &payload).await?;

    tx.commit().await.map_err(map_sqlx)?;
    Ok(outbox_id)
}
