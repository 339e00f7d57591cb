//! Entity types shared across pipeline crates: files, points of interest,
//! candidate relationships, evidence, outbox events, runs, and batches.
//!
//! These are plain data types (no storage behavior); `pipeline-store`
//! owns turning them into rows and back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Processing status of a [`File`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

/// Special role a file can play beyond being a regular source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialFileType {
    Manifest,
    Entrypoint,
    Config,
}

/// A source file tracked by the pipeline. Created by the batcher, mutated
/// by the file analysis worker, never deleted (invariant 1 in the data
/// model: rows are replaced on content change, not removed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub path: String,
    pub checksum: String,
    pub language: Option<String>,
    pub status: FileStatus,
    pub special_type: Option<SpecialFileType>,
    pub last_processed: Option<DateTime<Utc>>,
}

/// The kind of code entity a [`Poi`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoiType {
    File,
    Class,
    Function,
    Method,
    Variable,
    Import,
    Export,
    Database,
    Table,
    View,
}

impl PoiType {
    /// Parse a POI kind from LLM output, rejecting unknown tags rather
    /// than silently coercing them (design note: tagged sum type, reject
    /// unknown tags).
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "File" => Self::File,
            "Class" => Self::Class,
            "Function" => Self::Function,
            "Method" => Self::Method,
            "Variable" => Self::Variable,
            "Import" => Self::Import,
            "Export" => Self::Export,
            "Database" => Self::Database,
            "Table" => Self::Table,
            "View" => Self::View,
            _ => return None,
        })
    }
}

/// A named code entity extracted from a file.
///
/// `checksum` is the stable identity: a hash of `(type, name, file path)`
/// so re-analysis of unchanged content never creates a duplicate row
/// (invariant 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poi {
    pub id: String,
    pub file_id: String,
    pub poi_type: PoiType,
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub is_exported: bool,
    pub checksum: String,
}

impl Poi {
    /// Compute the stable identity checksum for a POI.
    pub fn compute_checksum(poi_type: PoiType, name: &str, file_path: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", poi_type));
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(file_path.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// The kind of edge proposed between two POIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    Calls,
    Imports,
    InheritsFrom,
    Implements,
    Uses,
    Exports,
    HasMethod,
}

impl RelationshipType {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "CALLS" => Self::Calls,
            "IMPORTS" => Self::Imports,
            "INHERITS_FROM" => Self::InheritsFrom,
            "IMPLEMENTS" => Self::Implements,
            "USES" => Self::Uses,
            "EXPORTS" => Self::Exports,
            "HAS_METHOD" => Self::HasMethod,
            _ => return None,
        })
    }

    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Calls => "CALLS",
            Self::Imports => "IMPORTS",
            Self::InheritsFrom => "INHERITS_FROM",
            Self::Implements => "IMPLEMENTS",
            Self::Uses => "USES",
            Self::Exports => "EXPORTS",
            Self::HasMethod => "HAS_METHOD",
        }
    }
}

/// Reconciliation status of a [`CandidateRelationship`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipStatus {
    Pending,
    Validated,
    Discarded,
    Conflicted,
}

/// A proposed edge between two POIs, awaiting confidence reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRelationship {
    pub id: String,
    pub source_poi_id: String,
    pub target_poi_id: String,
    pub relationship_type: RelationshipType,
    pub status: RelationshipStatus,
    pub confidence_score: f64,
    pub run_id: String,
}

/// Which stage of the pipeline produced a piece of [`Evidence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceSource {
    File,
    Directory,
    Global,
}

/// A single worker's opinion about a candidate relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub relationship_id: String,
    pub run_id: String,
    pub source_worker: EvidenceSource,
    pub initial_score: f64,
    pub found_relationship: bool,
    pub payload: String,
}

/// Delivery status of an [`OutboxEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

/// The kind of side-effect recorded in the outbox, used to route the
/// payload to a downstream queue (or nowhere, for sink-consumed events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxEventType {
    FileAnalysisFinding,
    DirectoryAnalysisFinding,
    RelationshipAnalysisFinding,
}

impl OutboxEventType {
    /// The downstream queue this event type is republished into, or
    /// `None` if it is consumed by a separate trigger rather than a
    /// queue (directory/global findings are consumed by the parent/child
    /// barrier, not a queue poll).
    pub fn target_queue(&self) -> Option<&'static str> {
        match self {
            Self::FileAnalysisFinding => Some("relationship-resolution-queue"),
            Self::DirectoryAnalysisFinding => None,
            Self::RelationshipAnalysisFinding => None,
        }
    }
}

/// A pending side-effect, written in the same transaction as the state
/// change that requires it (invariant 2: at-least-once delivery floor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_type: OutboxEventType,
    pub payload: String,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
}

/// One end-to-end invocation of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_discovered: u64,
    pub files_completed: u64,
    pub files_errored: u64,
    pub error: Option<String>,
}

impl Run {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            files_discovered: 0,
            files_completed: 0,
            files_errored: 0,
            error: None,
        }
    }
}

/// A single file's content as packed into a [`Batch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFile {
    pub path: String,
    pub content: String,
    pub tokens: usize,
}

/// A set of files packed together under a shared token budget for one
/// LLM call. Transient: only exists as a queue job payload, never
/// persisted as its own table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub run_id: String,
    pub files: Vec<BatchFile>,
    pub token_count: usize,
}

impl Batch {
    pub fn new(batch_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            run_id: run_id.into(),
            files: Vec::new(),
            token_count: 0,
        }
    }

    pub fn push(&mut self, file: BatchFile) {
        self.token_count += file.tokens;
        self.files.push(file);
    }
}

/// Parsed shape of a raw LLM finding before it is stored, keyed by the
/// names the prompt contract asks the model to use (`source`, `target`,
/// `type`, `explanation`, `probability`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawRelationshipFinding {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub explanation: Option<String>,
    pub probability: Option<f64>,
}

/// Parsed shape of a raw POI from LLM output.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPoi {
    #[serde(rename = "type")]
    pub poi_type: String,
    pub name: String,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub is_exported: bool,
}

/// Top-level shape the LLM prompt contract requires: exactly `pois` and
/// `relationships` arrays, nothing else.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisFinding {
    pub pois: Vec<RawPoi>,
    pub relationships: Vec<RawRelationshipFinding>,
}

/// One directory/global worker verdict on an already-proposed
/// relationship: confirms or contradicts the file-level finding.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAggregationFinding {
    pub relationship_id: String,
    pub agrees: bool,
    #[serde(default)]
    pub probability: Option<f64>,
    pub explanation: Option<String>,
}

/// Top-level shape the directory/global resolution prompt contract
/// requires: a flat list of per-relationship verdicts.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationResult {
    pub findings: Vec<RawAggregationFinding>,
}

/// Free-form metadata carried alongside jobs and runs; kept as a typed
/// alias so call sites read clearly.
pub type Metadata = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poi_checksum_stable_across_runs() {
        let a = Poi::compute_checksum(PoiType::Function, "parse", "src/lib.rs");
        let b = Poi::compute_checksum(PoiType::Function, "parse", "src/lib.rs");
        assert_eq!(a, b);
    }

    #[test]
    fn poi_checksum_differs_by_identity() {
        let a = Poi::compute_checksum(PoiType::Function, "parse", "src/lib.rs");
        let b = Poi::compute_checksum(PoiType::Function, "parse", "src/main.rs");
        assert_ne!(a, b);
    }

    #[test]
    fn relationship_type_roundtrips_wire_strings() {
        for rt in [
            RelationshipType::Calls,
            RelationshipType::Imports,
            RelationshipType::InheritsFrom,
            RelationshipType::Implements,
            RelationshipType::Uses,
            RelationshipType::Exports,
            RelationshipType::HasMethod,
        ] {
            let wire = rt.as_wire_str();
            assert_eq!(RelationshipType::parse(wire), Some(rt));
        }
    }

    #[test]
    fn rejects_unknown_poi_tag() {
        assert!(PoiType::parse("Enum").is_none());
    }

    #[test]
    fn outbox_event_routes_to_expected_queue() {
        assert_eq!(
            OutboxEventType::FileAnalysisFinding.target_queue(),
            Some("relationship-resolution-queue")
        );
        assert_eq!(OutboxEventType::DirectoryAnalysisFinding.target_queue(), None);
    }
}
