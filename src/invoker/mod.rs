//! Translation invoker: loads models for installed packages and runs them.
//!
//! # Architecture
//!
//! - `Model`: the capability a loaded package provides, `translate(text)`
//! - `ModelLoader`: turns an installed package into a `Model`
//! - `loader`: the built-in loader that picks a variant from package contents
//! - `lexicon`: phrase-table model shipped as `lexicon.tsv`
//! - `sidecar`: model served by an external inference endpoint
//!
//! Loaded models are memoized per package identity. Concurrent requests for
//! a model that is not loaded yet share one load.

mod lexicon;
mod loader;
mod sidecar;

pub use lexicon::LexiconModel;
pub use loader::PackageModelLoader;
pub use sidecar::SidecarModel;

use crate::error::TranslateError;
use crate::metrics::ServiceMetrics;
use crate::package::{InstalledPackage, PackageId};
use crate::resolver::TranslationPath;
use crate::single_flight::{Flight, SingleFlight};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// A ready-to-run one-hop translation capability.
#[async_trait]
pub trait Model: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String, TranslateError>;
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, package: &InstalledPackage) -> Result<Arc<dyn Model>, TranslateError>;
}

type ModelMap = HashMap<PackageId, Arc<dyn Model>>;

pub struct Invoker {
    loader: Arc<dyn ModelLoader>,
    models: Arc<RwLock<ModelMap>>,
    // The flag is set when the model was freshly loaded.
    loading: SingleFlight<PackageId, (Arc<dyn Model>, bool), TranslateError>,
    metrics: Arc<ServiceMetrics>,
}

impl Invoker {
    pub fn new(loader: Arc<dyn ModelLoader>, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            loader,
            models: Arc::new(RwLock::new(HashMap::new())),
            loading: SingleFlight::new(),
            metrics,
        }
    }

    /// Run `text` along `path`. Two-hop paths translate into the pivot
    /// language first; the intermediate text never leaves this function.
    pub async fn translate(
        &self,
        path: &TranslationPath,
        text: &str,
    ) -> Result<String, TranslateError> {
        if path.is_identity() {
            return Ok(text.to_string());
        }

        let mut current = text.to_string();
        for hop in path.hops() {
            let model = self.model(hop).await?;
            current = match model.translate(&current).await {
                Ok(translated) => translated,
                Err(e) => {
                    warn!("Inference failed for {}: {}", hop.id(), e);
                    self.evict(&hop.id());
                    return Err(e);
                }
            };
        }

        Ok(current)
    }

    /// The loaded model for `package`, loading it if needed.
    pub async fn model(
        &self,
        package: &Arc<InstalledPackage>,
    ) -> Result<Arc<dyn Model>, TranslateError> {
        let id = package.id();
        let cached = read(&self.models).get(&id).cloned();
        if let Some(model) = cached {
            self.metrics.record_model_cache_hit();
            return Ok(model);
        }

        self.load(package).await
    }

    /// Load `package` through the shared in-flight slot. The caller has
    /// already missed the model map.
    async fn load(&self, package: &Arc<InstalledPackage>) -> Result<Arc<dyn Model>, TranslateError> {
        let id = package.id();
        let loader = Arc::clone(&self.loader);
        let models = Arc::clone(&self.models);
        let package = Arc::clone(package);
        let (result, flight) = self
            .loading
            .run(id.clone(), move || async move {
                // A load for this package may have published between the
                // caller's map check and now.
                let published = read(&models).get(&package.id()).cloned();
                if let Some(model) = published {
                    return Ok((model, false));
                }

                info!("Loading model for {} from {}", package.id(), package.path.display());
                let model = loader.load(&package).await?;
                // Published before the in-flight slot clears, so a later
                // caller either joins this load or finds the model.
                write(&models).insert(package.id(), Arc::clone(&model));
                Ok((model, true))
            })
            .await;

        match (&result, flight) {
            (Ok((_, true)), Flight::Led) => self.metrics.record_model_load(),
            (Ok(_), _) => self.metrics.record_model_cache_hit(),
            (Err(e), _) => warn!("Failed to load model for {}: {}", id, e),
        }

        result.map(|(model, _)| model)
    }

    /// Drop the loaded model for `id`; the next use reloads it.
    pub fn evict(&self, id: &PackageId) -> bool {
        write(&self.models).remove(id).is_some()
    }

    pub fn is_loaded(&self, id: &PackageId) -> bool {
        read(&self.models).contains_key(id)
    }

    pub fn loaded_count(&self) -> usize {
        read(&self.models).len()
    }
}

fn read(models: &RwLock<ModelMap>) -> std::sync::RwLockReadGuard<'_, ModelMap> {
    models.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(models: &RwLock<ModelMap>) -> std::sync::RwLockWriteGuard<'_, ModelMap> {
    models.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
