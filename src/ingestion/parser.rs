//! Document parser HTTP client, treating OCR/VLM engine selection as
//! opaque strings the parser service interprets. Same reqwest-client shape
//! as `embedding`/`reranker` — no new pattern, just a different request/
//! response payload.

use crate::chunker::ParsedHeading;
use crate::config::Config;
use crate::error::{EngineError, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One image the parser detected, carried opaquely through to the VLM
/// client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedImage {
    pub page_number: i32,
    /// Opaque reference the VLM service resolves; could be a base64 blob
    /// or a service-side asset id.
    pub image_ref: String,
}

/// The structured document the parser hands back: sections, paragraphs,
/// tables, and any images it found.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedStructuredDocument {
    pub title: String,
    pub full_text: String,
    #[serde(default)]
    pub headings: Vec<ParsedHeading>,
    #[serde(default)]
    pub images: Vec<ParsedImage>,
}

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    file_base64: String,
    ocr_engine: &'a str,
    vlm_engine: Option<&'a str>,
}

pub struct DocumentParserClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl DocumentParserClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.document_parser_url.clone(),
            timeout: config.llm_timeout,
        }
    }

    /// Invoke the parser with the chosen OCR/VLM engine names. A parse
    /// failure is `FatalExternal` — there is no safe partial document to
    /// fall back to, so the job fails outright.
    #[tracing::instrument(skip(self, file_bytes), fields(bytes = file_bytes.len()))]
    pub async fn parse(
        &self,
        file_bytes: &[u8],
        ocr_engine: &str,
        vlm_engine: Option<&str>,
    ) -> Result<ParsedStructuredDocument> {
        let file_base64 = base64::engine::general_purpose::STANDARD.encode(file_bytes);

        let resp = self
            .http
            .post(format!("{}/parse", self.base_url))
            .timeout(self.timeout)
            .json(&ParseRequest { file_base64, ocr_engine, vlm_engine })
            .send()
            .await
            .map_err(|e| EngineError::FatalExternal(format!("document parser unreachable: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::FatalExternal(format!(
                "document parser returned {}",
                resp.status()
            )));
        }

        resp.json::<ParsedStructuredDocument>()
            .await
            .map_err(|e| EngineError::FatalExternal(format!("unparseable parser response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: String) -> DocumentParserClient {
        DocumentParserClient {
            http: reqwest::Client::new(),
            base_url,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn parse_success_returns_structured_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/parse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "Guide",
                "full_text": "Contenu.",
                "headings": [],
                "images": []
            })))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let doc = client.parse(b"pdf-bytes", "tesseract", None).await.unwrap();
        assert_eq!(doc.title, "Guide");
    }

    #[tokio::test]
    async fn parse_failure_is_fatal_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/parse"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let err = client.parse(b"x", "tesseract", None).await.unwrap_err();
        assert!(matches!(err, EngineError::FatalExternal(_)));
        assert!(!err.is_retryable());
    }
}
