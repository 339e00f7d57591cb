//! Durable relational store backing the analysis pipeline: files,
//! POIs, candidate relationships, evidence, outbox, and runs. Single
//! writer per process via a connection pool capped at one connection;
//! schema managed by additive `sqlx::migrate!` migrations.

pub mod connection;
pub mod error;
pub mod repositories;
pub mod transaction;

pub use connection::{DatabaseConnection, DatabasePool};
pub use transaction::{record_file_analysis, FileAnalysisRecord};
