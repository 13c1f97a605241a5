//! Vector index backing smart routing
//!
//! Maintains an embedding of `description + name + input-schema summary`
//! for every enabled tool across every connected upstream, stored behind
//! the [`VectorBackend`] seam. Rebuilt on every catalog change; queried by
//! the dispatcher's `search_tools` meta-tool with an optional server
//! allowlist derived from the group scope.

use crate::config::SettingsStore;
use crate::constants;
use crate::protocol::ToolInfo;
use crate::upstream::{UpstreamEvent, UpstreamRegistry};
use crate::{McpHubError, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between repeated embedding-outage warnings
const EMBEDDING_WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Embedding dimension of the local hashing provider
const HASH_EMBEDDING_DIM: usize = 256;

/// Produces embeddings for tool descriptions and queries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// OpenAI-compatible embeddings endpoint (`POST {base}/embeddings`).
pub struct OpenAiEmbedding {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiEmbedding {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut request = self.http.post(&url).json(&json!({
            "model": self.model,
            "input": texts,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpHubError::internal(format!("embedding request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpHubError::internal(format!(
                "embedding provider returned HTTP {}",
                status
            )));
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
        }
        #[derive(serde::Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| McpHubError::internal(format!("embedding response unreadable: {}", e)))?;
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Deterministic local embedding: tokens hashed into a fixed-dimension
/// bag-of-words vector. Used when no external provider is configured and
/// by the test suite; quality is far below a real model but behavior is
/// fully reproducible.
pub struct HashEmbedding;

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

fn hash_embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; HASH_EMBEDDING_DIM];
    for token in text
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hash: u64 = 1469598103934665603;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        vector[(hash % HASH_EMBEDDING_DIM as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// One search hit from the backend
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

/// Similarity-search storage seam.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn upsert(&self, id: String, vector: Vec<f32>, metadata: Value) -> Result<()>;
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        server_filter: Option<&[String]>,
    ) -> Result<Vec<SearchHit>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn ids(&self) -> Vec<String>;
}

/// In-memory cosine-similarity backend.
pub struct InMemoryVectorBackend {
    entries: RwLock<HashMap<String, (Vec<f32>, Value)>>,
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn upsert(&self, id: String, vector: Vec<f32>, metadata: Value) -> Result<()> {
        self.entries.write().insert(id, (vector, metadata));
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        server_filter: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = self
            .entries
            .read()
            .iter()
            .filter(|(_, (_, metadata))| match server_filter {
                Some(allowed) => metadata
                    .get("serverName")
                    .and_then(|v| v.as_str())
                    .map(|server| allowed.iter().any(|a| a == server))
                    .unwrap_or(false),
                None => true,
            })
            .map(|(id, (stored, metadata))| SearchHit {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
                metadata: metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.entries.write().remove(id);
        Ok(())
    }

    async fn ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A qualified tool returned by `search`
#[derive(Debug, Clone)]
pub struct ToolSearchResult {
    pub server_name: String,
    pub tool: ToolInfo,
    pub score: f32,
}

/// Owns the tool-description index and answers top-k queries.
pub struct VectorIndex {
    store: Arc<SettingsStore>,
    registry: Arc<UpstreamRegistry>,
    backend: Arc<dyn VectorBackend>,
    last_warn: Mutex<Option<Instant>>,
}

impl VectorIndex {
    pub fn new(store: Arc<SettingsStore>, registry: Arc<UpstreamRegistry>) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            backend: Arc::new(InMemoryVectorBackend::new()),
            last_warn: Mutex::new(None),
        })
    }

    /// Rebuild on every catalog change.
    pub fn start(self: &Arc<Self>) {
        let index = Arc::downgrade(self);
        let mut events = self.registry.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(UpstreamEvent::CatalogChanged { .. }) => {
                        let Some(index) = index.upgrade() else { break };
                        index.rebuild().await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Whether smart routing is configured on
    pub fn is_enabled(&self) -> bool {
        self.store.settings().system_config.smart_routing.enabled
    }

    fn provider(&self) -> Option<Arc<dyn EmbeddingProvider>> {
        let settings = self.store.settings();
        let smart = &settings.system_config.smart_routing;
        if !smart.enabled {
            return None;
        }
        match &smart.openai_api_base_url {
            Some(base) => Some(Arc::new(OpenAiEmbedding::new(
                base.clone(),
                smart.openai_api_key.clone(),
                smart
                    .openai_api_embedding_model
                    .clone()
                    .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            ))),
            None => Some(Arc::new(HashEmbedding)),
        }
    }

    /// Re-index every enabled tool across connected upstreams: stale ids
    /// deleted, fresh ones upserted.
    pub async fn rebuild(&self) {
        let Some(provider) = self.provider() else {
            return;
        };
        let separator = self
            .store
            .settings()
            .system_config
            .separator()
            .to_string();

        let mut ids = Vec::new();
        let mut texts = Vec::new();
        let mut metadatas = Vec::new();
        for client in self.registry.list() {
            for tool in client.effective_tools() {
                ids.push(crate::model::qualify(&client.name, &tool.name, &separator));
                texts.push(embedding_text(&tool));
                metadatas.push(json!({
                    "serverName": client.name,
                    "toolName": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                }));
            }
        }

        let vectors = match provider.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(error) => {
                self.warn_rate_limited(&error);
                return;
            }
        };
        if vectors.len() != ids.len() {
            tracing::warn!(
                "embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                ids.len()
            );
            return;
        }

        for stale in self.backend.ids().await {
            if !ids.contains(&stale)
                && let Err(error) = self.backend.delete(&stale).await
            {
                tracing::warn!("vector delete failed: {}", error);
            }
        }
        for ((id, vector), metadata) in ids.into_iter().zip(vectors).zip(metadatas) {
            if let Err(error) = self.backend.upsert(id, vector, metadata).await {
                tracing::warn!("vector upsert failed: {}", error);
            }
        }

        tracing::debug!("vector index rebuilt");
    }

    /// Top-k tool search with optional server allowlist.
    ///
    /// Hits below the similarity threshold are dropped unless `k <= 1`, so
    /// single-result searches always return the best match. Provider
    /// outages degrade to an empty result.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        allowlist: Option<Vec<String>>,
    ) -> Vec<ToolSearchResult> {
        let Some(provider) = self.provider() else {
            return Vec::new();
        };

        let vectors = match provider.embed(&[query.to_string()]).await {
            Ok(vectors) => vectors,
            Err(error) => {
                self.warn_rate_limited(&error);
                return Vec::new();
            }
        };
        let Some(query_vector) = vectors.first() else {
            return Vec::new();
        };

        let hits = match self
            .backend
            .search(query_vector, k, allowlist.as_deref())
            .await
        {
            Ok(hits) => hits,
            Err(error) => {
                tracing::warn!("vector backend unavailable: {}", error);
                return Vec::new();
            }
        };

        hits.into_iter()
            .filter(|hit| k <= 1 || hit.score >= constants::SEARCH_SIMILARITY_THRESHOLD)
            .filter_map(|hit| {
                let server_name = hit.metadata.get("serverName")?.as_str()?.to_string();
                let tool = ToolInfo {
                    name: hit.metadata.get("toolName")?.as_str()?.to_string(),
                    description: hit
                        .metadata
                        .get("description")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    input_schema: hit
                        .metadata
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({ "type": "object" })),
                };
                Some(ToolSearchResult {
                    server_name,
                    tool,
                    score: hit.score,
                })
            })
            .collect()
    }

    fn warn_rate_limited(&self, error: &McpHubError) {
        let mut last = self.last_warn.lock();
        let due = last
            .map(|at| at.elapsed() >= EMBEDDING_WARN_INTERVAL)
            .unwrap_or(true);
        if due {
            tracing::warn!("embedding provider unavailable: {}", error);
            *last = Some(Instant::now());
        }
    }
}

/// Text fed to the embedding model: description, name, and a compact
/// summary of the input schema's properties.
fn embedding_text(tool: &ToolInfo) -> String {
    let mut parts = Vec::new();
    if let Some(description) = &tool.description {
        parts.push(description.clone());
    }
    parts.push(tool.name.replace('_', " "));
    if let Some(properties) = tool
        .input_schema
        .get("properties")
        .and_then(|p| p.as_object())
    {
        let summary: Vec<String> = properties
            .iter()
            .map(|(name, schema)| {
                let kind = schema
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("any");
                format!("{}: {}", name, kind)
            })
            .collect();
        parts.push(summary.join(", "));
    }
    parts.join("\n")
}

#[cfg(test)]
mod vector_test {
    include!("vector_test.rs");
}
