//! Package index: the catalog of installable language packages.
//!
//! The catalog is a JSON array in the Argos package index format. It can be
//! fetched over HTTP or read from a manifest bundled on disk.

use crate::error::IndexError;
use crate::package::{DownloadRef, LanguageCode, LanguagePackage, PackageVersion};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// One catalog entry as published by the index.
#[derive(Debug, Deserialize)]
struct CatalogEntry {
    from_code: LanguageCode,
    to_code: LanguageCode,
    #[serde(default)]
    from_name: Option<String>,
    #[serde(default)]
    to_name: Option<String>,
    #[serde(default)]
    package_version: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

impl CatalogEntry {
    fn into_package(self) -> Option<LanguagePackage> {
        let url = self.links.into_iter().find(|l| !l.trim().is_empty())?;

        Some(LanguagePackage {
            from_name: self.from_name.unwrap_or_else(|| self.from_code.to_string()),
            to_name: self.to_name.unwrap_or_else(|| self.to_code.to_string()),
            from_code: self.from_code,
            to_code: self.to_code,
            version: PackageVersion::new(self.package_version.unwrap_or_else(|| "0".to_string())),
            download: Some(DownloadRef {
                url,
                sha256: self.sha256.map(|h| h.to_lowercase()),
                size: self.size,
            }),
        })
    }
}

/// Parse a catalog document. Entries without a download link are skipped.
pub fn parse_catalog(body: &[u8]) -> Result<Vec<LanguagePackage>, IndexError> {
    let entries: Vec<CatalogEntry> = serde_json::from_slice(body)
        .map_err(|e| IndexError(format!("invalid catalog JSON: {}", e)))?;

    let total = entries.len();
    let packages: Vec<_> = entries
        .into_iter()
        .filter_map(CatalogEntry::into_package)
        .collect();

    if packages.len() < total {
        warn!(
            "Skipped {} catalog entries without a download link",
            total - packages.len()
        );
    }

    Ok(packages)
}

/// A sequence of catalog packages that would translate `from` into `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePath {
    pub packages: Vec<LanguagePackage>,
}

impl CandidatePath {
    pub fn hops(&self) -> usize {
        self.packages.len()
    }

    /// Intermediate language for a two-hop candidate.
    pub fn pivot(&self) -> Option<&LanguageCode> {
        match self.packages.as_slice() {
            [first, _] => Some(&first.to_code),
            _ => None,
        }
    }
}

#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Every package the catalog currently offers.
    async fn list_available(&self) -> Result<Vec<LanguagePackage>, IndexError>;

    /// Candidate paths for `from -> to`, best first.
    async fn find_candidates(
        &self,
        from: &LanguageCode,
        to: &LanguageCode,
        preferred_pivot: Option<&LanguageCode>,
    ) -> Result<Vec<CandidatePath>, IndexError> {
        let packages = self.list_available().await?;
        Ok(rank_candidates(&packages, from, to, preferred_pivot))
    }
}

/// Order candidates: direct packages (newest first), then one pivot pair per
/// intermediate language with the preferred pivot first and the rest in
/// lexicographic order. Each pivot leg uses the newest version available.
pub fn rank_candidates(
    packages: &[LanguagePackage],
    from: &LanguageCode,
    to: &LanguageCode,
    preferred_pivot: Option<&LanguageCode>,
) -> Vec<CandidatePath> {
    if from == to {
        return Vec::new();
    }

    let mut direct: Vec<&LanguagePackage> = packages
        .iter()
        .filter(|p| &p.from_code == from && &p.to_code == to)
        .collect();
    direct.sort_by(|a, b| b.version.compare(&a.version));

    let mut candidates: Vec<CandidatePath> = direct
        .into_iter()
        .map(|p| CandidatePath {
            packages: vec![p.clone()],
        })
        .collect();

    let mids: BTreeSet<&LanguageCode> = packages
        .iter()
        .filter(|p| &p.from_code == from && &p.to_code != to && &p.to_code != from)
        .map(|p| &p.to_code)
        .collect();

    let mut pivots: Vec<CandidatePath> = mids
        .into_iter()
        .filter_map(|mid| {
            let first = newest(packages, from, mid)?;
            let second = newest(packages, mid, to)?;
            Some(CandidatePath {
                packages: vec![first.clone(), second.clone()],
            })
        })
        .collect();

    if let Some(preferred) = preferred_pivot {
        // Stable sort keeps the lexicographic order for everything else.
        pivots.sort_by_key(|c| c.pivot() != Some(preferred));
    }

    candidates.extend(pivots);
    candidates
}

fn newest<'a>(
    packages: &'a [LanguagePackage],
    from: &LanguageCode,
    to: &LanguageCode,
) -> Option<&'a LanguagePackage> {
    packages
        .iter()
        .filter(|p| &p.from_code == from && &p.to_code == to)
        .max_by(|a, b| a.version.compare(&b.version))
}

/// Catalog fetched from a remote URL on every lookup.
pub struct HttpPackageIndex {
    client: reqwest::Client,
    url: String,
}

impl HttpPackageIndex {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl PackageIndex for HttpPackageIndex {
    async fn list_available(&self) -> Result<Vec<LanguagePackage>, IndexError> {
        debug!("Fetching package index from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| IndexError(format!("failed to reach {}: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(IndexError(format!(
                "index request to {} returned {}",
                self.url,
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| IndexError(format!("failed to read index body: {}", e)))?;

        parse_catalog(&body)
    }
}

/// Catalog bundled with the deployment, or built in memory.
pub struct ManifestIndex {
    source: ManifestSource,
}

enum ManifestSource {
    File(PathBuf),
    Packages(Vec<LanguagePackage>),
}

impl ManifestIndex {
    /// Read the manifest from `path` on every lookup, so edits are picked up
    /// without a restart.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ManifestSource::File(path.into()),
        }
    }

    pub fn from_packages(packages: Vec<LanguagePackage>) -> Self {
        Self {
            source: ManifestSource::Packages(packages),
        }
    }
}

#[async_trait]
impl PackageIndex for ManifestIndex {
    async fn list_available(&self) -> Result<Vec<LanguagePackage>, IndexError> {
        match &self.source {
            ManifestSource::File(path) => {
                let body = tokio::fs::read(path).await.map_err(|e| {
                    IndexError(format!("failed to read manifest {}: {}", path.display(), e))
                })?;
                parse_catalog(&body)
            }
            ManifestSource::Packages(packages) => Ok(packages.clone()),
        }
    }
}
