//! The translation service: everything a request handler needs, wired from
//! a `Config`.

use crate::cache::PackageCache;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::{ServiceError, TranslateError};
use crate::index::{HttpPackageIndex, ManifestIndex, PackageIndex};
use crate::installer::Installer;
use crate::invoker::{Invoker, ModelLoader, PackageModelLoader};
use crate::metrics::{MetricsReport, ServiceMetrics};
use crate::package::{LanguageCode, LanguagePair};
use crate::resolver::Resolver;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct TranslationService {
    coordinator: Coordinator,
    invoker: Invoker,
    resolver: Arc<Resolver>,
    metrics: Arc<ServiceMetrics>,
    request_timeout: Duration,
}

impl TranslationService {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let index: Arc<dyn PackageIndex> = match &config.package_index_file {
            Some(path) => {
                info!("Using package manifest {}", path.display());
                Arc::new(ManifestIndex::from_file(path.clone()))
            }
            None => {
                info!("Using package index {}", config.package_index_url);
                Arc::new(HttpPackageIndex::new(
                    client.clone(),
                    config.package_index_url.clone(),
                ))
            }
        };

        let loader: Arc<dyn ModelLoader> = Arc::new(PackageModelLoader::new(
            client.clone(),
            config.inference_url.clone(),
        ));

        let cache = Arc::new(PackageCache::open(&config.package_dir)?);
        Ok(Self::new(cache, index, loader, client, config))
    }

    /// Assemble the service from its parts. Tests use this to inject an
    /// in-memory index or a fake model loader.
    pub fn new(
        cache: Arc<PackageCache>,
        index: Arc<dyn PackageIndex>,
        loader: Arc<dyn ModelLoader>,
        client: reqwest::Client,
        config: &Config,
    ) -> Self {
        let metrics = Arc::new(ServiceMetrics::new());
        let pivot = Some(LanguageCode::new(config.pivot_language.clone()));
        let resolver = Arc::new(Resolver::new(Arc::clone(&cache), pivot));
        let installer = Arc::new(Installer::new(client, Arc::clone(&cache)));

        let coordinator = Coordinator::new(
            cache,
            Arc::clone(&resolver),
            index,
            installer,
            Arc::clone(&metrics),
        );
        let invoker = Invoker::new(loader, Arc::clone(&metrics));

        Self {
            coordinator,
            invoker,
            resolver,
            metrics,
            request_timeout: config.request_timeout,
        }
    }

    /// Translate `text` from `source` to `target`, installing whatever is
    /// missing first.
    pub async fn translate(
        &self,
        text: Option<&str>,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Result<String, ServiceError> {
        let result = self.translate_checked(text, source, target).await;
        match &result {
            Ok(_) => self.metrics.record_translation(),
            Err(e) => {
                self.metrics.record_translation_failure();
                warn!("Translation failed ({}): {}", e.kind(), e);
            }
        }
        result
    }

    async fn translate_checked(
        &self,
        text: Option<&str>,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Result<String, ServiceError> {
        let text = text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ServiceError::Validation("No text provided".to_string()))?;
        let source = language_field(source, "source")?;
        let target = language_field(target, "target")?;

        // One deadline covers acquisition and translation together.
        let deadline = Instant::now() + self.request_timeout;
        let path = self
            .coordinator
            .ensure_translatable_until(&source, &target, tokio::time::sleep_until(deadline))
            .await?;

        if let Some(pivot) = path.pivot_language() {
            info!("Pivot translation: {} -> {} -> {}", source, pivot, target);
        }

        match tokio::time::timeout_at(deadline, self.invoker.translate(&path, text)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!("Stopped waiting for translation {} -> {}", source, target);
                Err(TranslateError::Cancelled.into())
            }
        }
    }

    /// Pairs translatable right now without any download.
    pub fn languages(&self) -> Vec<LanguagePair> {
        self.resolver.resolvable_pairs()
    }

    pub fn metrics(&self) -> MetricsReport {
        self.metrics.report()
    }

    pub fn loaded_models(&self) -> usize {
        self.invoker.loaded_count()
    }
}

fn language_field(value: Option<&str>, field: &str) -> Result<LanguageCode, ServiceError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(LanguageCode::from)
        .ok_or_else(|| ServiceError::Validation(format!("Missing {} language", field)))
}
