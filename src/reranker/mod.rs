//! An infallible cross-encoder reranking call: degrades to a no-op on any
//! failure rather than propagating an error, logging the degradation.

use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A single (query, passage) candidate to rerank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankPassage {
    pub chunk_id: Uuid,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [RerankPassage],
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    documents: Vec<RerankPassage>,
    #[allow(dead_code)]
    count: usize,
    #[allow(dead_code)]
    model: String,
    #[allow(dead_code)]
    processing_time: Option<f64>,
}

/// Cross-encoder (query, passage)→score client.
pub struct RerankerClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl RerankerClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.reranker_service_url.clone(),
            timeout: config.llm_timeout,
        }
    }

    /// Rerank `passages` by cross-encoder score against `query`, returning
    /// the top `top_k`. `top_k` is a call parameter, never a service-wide
    /// constant. On any HTTP/parse failure, returns the original `passages`
    /// truncated to `top_k`.
    #[tracing::instrument(skip(self, passages), fields(count = passages.len()))]
    pub async fn rerank(
        &self,
        query: &str,
        passages: Vec<RerankPassage>,
        top_k: usize,
    ) -> Vec<RerankPassage> {
        let fallback = || passages.iter().take(top_k).cloned().collect::<Vec<_>>();

        let result = self
            .http
            .post(format!("{}/rerank", self.base_url))
            .timeout(self.timeout)
            .json(&RerankRequest {
                query,
                documents: &passages,
                top_k,
            })
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "reranker unreachable, degrading to original order");
                return fallback();
            }
        };

        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "reranker returned non-success, degrading");
            return fallback();
        }

        match resp.json::<RerankResponse>().await {
            Ok(body) => body.documents.into_iter().take(top_k).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "reranker response unparseable, degrading");
                fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: String) -> RerankerClient {
        RerankerClient {
            http: reqwest::Client::new(),
            base_url,
            timeout: Duration::from_secs(5),
        }
    }

    fn passages() -> Vec<RerankPassage> {
        vec![
            RerankPassage { chunk_id: Uuid::nil(), content: "a".into() },
            RerankPassage { chunk_id: Uuid::nil(), content: "b".into() },
        ]
    }

    #[tokio::test]
    async fn reranker_timeout_yields_same_candidate_ordering() {
        // No mock mounted at all -> connection refused, exercising the
        // graceful-degradation path (testable property 14).
        let client = client_for("http://127.0.0.1:1".to_string());
        let out = client.rerank("q", passages(), 5).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "a");
    }

    #[tokio::test]
    async fn reranker_failure_falls_back_to_top_k() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rerank"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let out = client.rerank("q", passages(), 1).await;
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn reranker_success_reorders_and_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rerank"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "documents": [{"chunk_id": Uuid::nil(), "content": "b"}],
                "count": 1,
                "model": "test",
                "processing_time": 0.01
            })))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let out = client.rerank("q", passages(), 1).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "b");
    }
}
