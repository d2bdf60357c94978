use super::lexicon::{LexiconModel, LEXICON_FILE};
use super::sidecar::SidecarModel;
use super::{Model, ModelLoader};
use crate::cache::read_metadata;
use crate::error::TranslateError;
use crate::package::InstalledPackage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const MODEL_DIR: &str = "model";

/// Loads whatever runnable model an installed package directory contains:
/// a `lexicon.tsv` phrase table, or a `model/` directory served by the
/// configured inference endpoint.
pub struct PackageModelLoader {
    client: reqwest::Client,
    inference_url: Option<String>,
}

impl PackageModelLoader {
    pub fn new(client: reqwest::Client, inference_url: Option<String>) -> Self {
        Self {
            client,
            inference_url,
        }
    }
}

#[async_trait]
impl ModelLoader for PackageModelLoader {
    async fn load(&self, package: &InstalledPackage) -> Result<Arc<dyn Model>, TranslateError> {
        let dir = package.path.clone();

        let metadata = {
            let dir = dir.clone();
            tokio::task::spawn_blocking(move || read_metadata(&dir))
                .await?
                .map_err(|e| TranslateError::ModelLoadFailed(format!("{:#}", e)))?
        };
        if !metadata.matches(&package.package) {
            return Err(TranslateError::ModelLoadFailed(format!(
                "{} holds {} -> {}, expected {}",
                dir.display(),
                metadata.from_code,
                metadata.to_code,
                package.key()
            )));
        }

        let lexicon_path = dir.join(LEXICON_FILE);
        if tokio::fs::metadata(&lexicon_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            let contents = tokio::fs::read_to_string(&lexicon_path).await.map_err(|e| {
                TranslateError::ModelLoadFailed(format!(
                    "failed to read {}: {}",
                    lexicon_path.display(),
                    e
                ))
            })?;
            let model = LexiconModel::parse(&contents)?;
            debug!("Loaded lexicon with {} entries for {}", model.len(), package.id());
            return Ok(Arc::new(model));
        }

        let model_dir = dir.join(MODEL_DIR);
        let has_model_dir = tokio::fs::metadata(&model_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        match (has_model_dir, &self.inference_url) {
            (true, Some(endpoint)) => {
                debug!("Using inference endpoint {} for {}", endpoint, package.id());
                Ok(Arc::new(SidecarModel::new(
                    self.client.clone(),
                    endpoint.clone(),
                    model_dir,
                    package.package.from_code.clone(),
                    package.package.to_code.clone(),
                )))
            }
            (true, None) => Err(TranslateError::ModelLoadFailed(format!(
                "{} needs an inference endpoint (set INFERENCE_URL)",
                package.id()
            ))),
            (false, _) => Err(TranslateError::ModelLoadFailed(format!(
                "{} contains no runnable model",
                dir.display()
            ))),
        }
    }
}
