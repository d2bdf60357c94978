//! Model served by an external inference endpoint.
//!
//! Packages with a `model/` directory (CTranslate2 weights in Argos
//! packages) are run by a sidecar process that reads the package from disk.

use super::Model;
use crate::error::TranslateError;
use crate::package::LanguageCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    model_path: &'a str,
    source: &'a str,
    target: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    translated_text: String,
}

pub struct SidecarModel {
    client: reqwest::Client,
    endpoint: String,
    model_path: PathBuf,
    source: LanguageCode,
    target: LanguageCode,
}

impl SidecarModel {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        model_path: PathBuf,
        source: LanguageCode,
        target: LanguageCode,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            model_path,
            source,
            target,
        }
    }
}

#[async_trait]
impl Model for SidecarModel {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        let model_path = self.model_path.to_string_lossy();
        let request = InferenceRequest {
            model_path: &model_path,
            source: self.source.as_str(),
            target: self.target.as_str(),
            text,
        };

        debug!(
            "Sidecar inference {} -> {} ({} chars)",
            self.source,
            self.target,
            text.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                TranslateError::InferenceFailed(format!("inference request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::InferenceFailed(format!(
                "inference endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: InferenceResponse = response.json().await.map_err(|e| {
            TranslateError::InferenceFailed(format!("invalid inference response: {}", e))
        })?;

        Ok(parsed.translated_text)
    }
}
