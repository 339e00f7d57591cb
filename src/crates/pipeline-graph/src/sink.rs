//! The graph-sink external collaborator boundary (spec §4.8, §6). Kept
//! deliberately narrow: idempotent `MERGE` primitives plus a
//! transaction envelope, the same untrusted-collaborator shape as
//! `llm::PromptRunner`.

use async_trait::async_trait;

/// Everything the finalization worker needs from the downstream graph
/// store. All three `merge_*`/node calls must be idempotent: calling
/// them twice with the same keys must not create duplicate nodes or
/// edges (spec's "Idempotence of ingestion" testable property).
#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn begin(&self) -> Result<(), String>;

    /// `MERGE` a POI node keyed by `(checksum, file_path)`.
    async fn merge_poi(&self, checksum: &str, file_path: &str, poi_type: &str, name: &str) -> Result<(), String>;

    /// `MERGE` a relationship keyed by `(source_checksum, relationship_type, target_checksum)`.
    async fn merge_relationship(
        &self,
        source_checksum: &str,
        target_checksum: &str,
        relationship_type: &str,
        explanation: &str,
        weight: f64,
    ) -> Result<(), String>;

    async fn commit(&self) -> Result<(), String>;

    async fn rollback(&self) -> Result<(), String>;
}

/// Records every call it receives instead of talking to a real store;
/// the test double used throughout this crate's and `pipeline-cli`'s
/// tests in place of a live graph database.
#[derive(Default)]
pub struct NullGraphSink {
    calls: tokio::sync::Mutex<Vec<String>>,
}

impl NullGraphSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl GraphSink for NullGraphSink {
    async fn begin(&self) -> Result<(), String> {
        self.calls.lock().await.push("begin".to_string());
        Ok(())
    }

    async fn merge_poi(&self, checksum: &str, file_path: &str, poi_type: &str, name: &str) -> Result<(), String> {
        self.calls.lock().await.push(format!("merge_poi({checksum},{file_path},{poi_type},{name})"));
        Ok(())
    }

    async fn merge_relationship(
        &self,
        source_checksum: &str,
        target_checksum: &str,
        relationship_type: &str,
        explanation: &str,
        weight: f64,
    ) -> Result<(), String> {
        self.calls.lock().await.push(format!(
            "merge_relationship({source_checksum},{target_checksum},{relationship_type},{explanation},{weight})"
        ));
        Ok(())
    }

    async fn commit(&self) -> Result<(), String> {
        self.calls.lock().await.push("commit".to_string());
        Ok(())
    }

    async fn rollback(&self) -> Result<(), String> {
        self.calls.lock().await.push("rollback".to_string());
        Ok(())
    }
}

/// Reference transport for a live Neo4j instance, behind the `neo4j`
/// feature (disabled by default — see DESIGN.md for why a full driver
/// is out of scope here). Talks to Neo4j's HTTP transactional Cypher
/// endpoint rather than pulling in a Bolt client, batching statements
/// and flushing them on `commit`.
#[cfg(feature = "neo4j")]
pub mod neo4j {
    use super::GraphSink;
    use async_trait::async_trait;
    use serde::Serialize;
    use tokio::sync::Mutex;

    #[derive(Serialize)]
    struct Statement {
        statement: String,
        parameters: serde_json::Map<String, serde_json::Value>,
    }

    pub struct Neo4jGraphSink {
        base_url: String,
        auth: (String, String),
        client: reqwest::Client,
        pending: Mutex<Vec<Statement>>,
    }

    impl Neo4jGraphSink {
        pub fn new(base_url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
            Self {
                base_url: base_url.into(),
                auth: (user.into(), password.into()),
                client: reqwest::Client::new(),
                pending: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GraphSink for Neo4jGraphSink {
        async fn begin(&self) -> Result<(), String> {
            self.pending.lock().await.clear();
            Ok(())
        }

        async fn merge_poi(&self, checksum: &str, file_path: &str, poi_type: &str, name: &str) -> Result<(), String> {
            let mut parameters = serde_json::Map::new();
            parameters.insert("checksum".into(), checksum.into());
            parameters.insert("filePath".into(), file_path.into());
            parameters.insert("poiType".into(), poi_type.into());
            parameters.insert("name".into(), name.into());
            self.pending.lock().await.push(Statement {
                statement: "MERGE (p:Poi {checksum: $checksum, filePath: $filePath}) SET p.poiType = $poiType, p.name = $name".into(),
                parameters,
            });
            Ok(())
        }

        async fn merge_relationship(
            &self,
            source_checksum: &str,
            target_checksum: &str,
            relationship_type: &str,
            explanation: &str,
            weight: f64,
        ) -> Result<(), String> {
            let mut parameters = serde_json::Map::new();
            parameters.insert("source".into(), source_checksum.into());
            parameters.insert("target".into(), target_checksum.into());
            parameters.insert("explanation".into(), explanation.into());
            parameters.insert("weight".into(), weight.into());
            self.pending.lock().await.push(Statement {
                statement: format!(
                    "MATCH (s:Poi {{checksum: $source}}), (t:Poi {{checksum: $target}}) \
                     MERGE (s)-[r:{relationship_type}]->(t) SET r.explanation = $explanation, r.weight = $weight"
                ),
                parameters,
            });
            Ok(())
        }

        async fn commit(&self) -> Result<(), String> {
            let statements = std::mem::take(&mut *self.pending.lock().await);
            let body = serde_json::json!({ "statements": statements });
            self.client
                .post(format!("{}/db/neo4j/tx/commit", self.base_url))
                .basic_auth(&self.auth.0, Some(&self.auth.1))
                .json(&body)
                .send()
                .await
                .map_err(|e| format!("neo4j transport error (connection): {e}"))?;
            Ok(())
        }

        async fn rollback(&self) -> Result<(), String> {
            self.pending.lock().await.clear();
            Ok(())
        }
    }
}
