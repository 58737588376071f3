//! A batched text→vector client over a remote embedding service, reached
//! through a reqwest-backed struct with a bounded timeout. The embedding
//! model runs as its own HTTP service (`POST /embed_batch`), never
//! in-process.

use crate::config::Config;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `GET /health` response shape.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
    #[allow(dead_code)]
    dimension: usize,
    #[allow(dead_code)]
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbedBatchRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedBatchResponse {
    embeddings: Vec<Vec<f32>>,
    #[allow(dead_code)]
    count: usize,
    #[allow(dead_code)]
    dimension: usize,
    #[allow(dead_code)]
    model: String,
}

/// Batched text→vector client, order-preserving.
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    batch_size: usize,
    timeout: Duration,
    expected_dimension: usize,
}

impl EmbeddingClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.embedding_service_url.clone(),
            batch_size: config.embedding_batch_size,
            timeout: config.embedding_timeout,
            expected_dimension: config.embedding_dimension,
        }
    }

    /// Splits into batches of `batch_size`; a batch failure degrades to
    /// per-item retries; a single-item failure fails the whole call.
    #[tracing::instrument(skip(self, texts), fields(count = texts.len()))]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            match self.embed_batch(batch).await {
                Ok(vectors) => out.extend(vectors),
                Err(e) => {
                    tracing::warn!(error = %e, "embedding batch failed, degrading to per-item retries");
                    for text in batch {
                        let v = self.embed_one(text).await?;
                        out.push(v);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let resp = self
            .http
            .post(format!("{}/embed_batch", self.base_url))
            .timeout(self.timeout)
            .json(&EmbedBatchRequest { texts })
            .send()
            .await
            .map_err(|e| EngineError::TransientExternal(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EngineError::TransientExternal(format!(
                "embedding service returned {}",
                resp.status()
            )));
        }

        let body: EmbedBatchResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientExternal(e.to_string()))?;

        self.check_dimensions(&body.embeddings)?;
        Ok(body.embeddings)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .http
            .post(format!("{}/embed", self.base_url))
            .timeout(self.timeout)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| EngineError::TransientExternal(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EngineError::TransientExternal(format!(
                "embedding service returned {}",
                resp.status()
            )));
        }

        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientExternal(e.to_string()))?;

        self.check_dimensions(std::slice::from_ref(&body.embedding))?;
        Ok(body.embedding)
    }

    /// A dimension mismatch is fatal — it means the deployed model no
    /// longer matches the schema, and the ingestion job must be killed
    /// rather than persist chunks with the wrong vector width.
    fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<()> {
        for v in vectors {
            if v.len() != self.expected_dimension {
                return Err(EngineError::FatalExternal(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.expected_dimension,
                    v.len()
                )));
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn health(&self) -> Result<HealthStatus> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| EngineError::TransientExternal(e.to_string()))?;
        let status: HealthStatus = resp
            .json()
            .await
            .map_err(|e| EngineError::TransientExternal(e.to_string()))?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            embedding_service_url: base_url,
            reranker_service_url: String::new(),
            llm_service_url: String::new(),
            document_parser_url: String::new(),
            vlm_service_url: String::new(),
            llm_model: "test".to_string(),
            llm_api_key: None,
            embedding_dimension: 3,
            hybrid_search_enabled: true,
            reranker_enabled: true,
            use_adjacent_chunks: true,
            use_parent_child_chunks: false,
            chunk_size: 800,
            chunk_overlap: 400,
            reranker_top_k: 20,
            reranker_return_k: 5,
            thumbs_down_auto_analysis: true,
            thumbs_down_confidence_threshold: 0.7,
            llm_use_tools: true,
            llm_timeout: Duration::from_secs(60),
            inactivity_session_timeout_minutes: 30,
            embedding_batch_size: 2,
            embedding_timeout: Duration::from_secs(5),
            embedding_batch_retries: 3,
            rag_timeout: Duration::from_secs(180),
            conversation_history_window: 10,
            quality_satisfaction_threshold: 0.3,
            quality_significance_floor: 3,
            database_max_connections: 5,
        }
    }

    #[tokio::test]
    async fn embed_batches_and_preserves_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed_batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                "count": 2,
                "dimension": 3,
                "model": "test-model"
            })))
            .mount(&server)
            .await;

        let client = EmbeddingClient::new(&test_config(server.uri()));
        let out = client
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed_batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0]],
                "count": 1,
                "dimension": 2,
                "model": "test-model"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": [1.0, 0.0],
                "dimension": 2,
                "model": "test-model"
            })))
            .mount(&server)
            .await;

        let client = EmbeddingClient::new(&test_config(server.uri()));
        let err = client.embed(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, EngineError::FatalExternal(_)));
    }
}
