//! Calls the external vision-language service to obtain a description and
//! OCR text for an extracted image. Same reqwest-client shape as
//! `embedding`, `reranker`, and `parser`.

use super::parser::ParsedImage;
use crate::config::Config;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Description + OCR text for one image.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageDescription {
    pub description: Option<String>,
    pub ocr_text: Option<String>,
}

#[derive(Debug, Serialize)]
struct DescribeRequest<'a> {
    image_ref: &'a str,
    vlm_engine: &'a str,
}

pub struct VlmClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl VlmClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.vlm_service_url.clone(),
            timeout: config.llm_timeout,
        }
    }

    /// One image's description + OCR text. A VLM failure fails the whole
    /// job — unlike the reranker, there is no graceful-degradation path
    /// here.
    #[tracing::instrument(skip(self))]
    pub async fn describe(&self, image: &ParsedImage, vlm_engine: &str) -> Result<ImageDescription> {
        let resp = self
            .http
            .post(format!("{}/describe", self.base_url))
            .timeout(self.timeout)
            .json(&DescribeRequest { image_ref: &image.image_ref, vlm_engine })
            .send()
            .await
            .map_err(|e| EngineError::TransientExternal(format!("VLM service unreachable: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::TransientExternal(format!(
                "VLM service returned {}",
                resp.status()
            )));
        }

        resp.json::<ImageDescription>()
            .await
            .map_err(|e| EngineError::DataValidation(format!("unparseable VLM response: {e}")))
    }
}
