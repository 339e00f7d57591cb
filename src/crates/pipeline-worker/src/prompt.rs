//! Prompt composition for the three analysis workers. Only the file
//! worker's contract is normative (spec §6); directory/global prompts
//! follow the same file-block convention for consistency.

use pipeline_core::model::{BatchFile, CandidateRelationship};

pub const FILE_ANALYSIS_SYSTEM_PROMPT: &str = "You are a static analysis assistant. \
Given one or more source files, identify points of interest (classes, functions, \
methods, variables, imports, exports, database tables/views) and relationships \
between them. Respond with JSON only: a top-level object with exactly two arrays, \
\"pois\" and \"relationships\", and nothing else — no prose, no markdown fences. \
Each relationship must include source, target, type, explanation, and a \
probability between 0 and 1.";

pub fn compose_file_analysis_prompt(files: &[BatchFile]) -> String {
    let mut prompt = String::new();
    for file in files {
        prompt.push_str("--- FILE START ---\n");
        prompt.push_str(&format!("Path: {}\n", file.path));
        prompt.push_str(&file.content);
        prompt.push('\n');
        prompt.push_str("--- FILE END ---\n");
    }
    prompt
}

pub const AGGREGATION_SYSTEM_PROMPT: &str = "You are reviewing relationships already \
proposed by an earlier analysis pass. For each one, state whether you agree it holds. \
Respond with JSON only: {\"findings\": [{\"relationship_id\": ..., \"agrees\": bool, \
\"probability\": number, \"explanation\": string}]} and nothing else.";

/// One line per relationship under review, enough context for an LLM
/// to confirm or contradict without re-reading source.
pub fn compose_aggregation_prompt(relationships: &[(CandidateRelationship, String, String)]) -> String {
    let mut prompt = String::from("Review the following proposed relationships:\n");
    for (rel, source_name, target_name) in relationships {
        prompt.push_str(&format!(
            "- id={} type={} source={} target={} current_confidence={:.2}\n",
            rel.id,
            rel.relationship_type.as_wire_str(),
            source_name,
            target_name,
            rel.confidence_score,
        ));
    }
    prompt
}
