//! Installed package cache.
//!
//! The package store directory is the durable record: every subdirectory
//! holding a `metadata.json` is an installed package. The in-memory map is
//! rebuilt from it at startup and is the source of truth afterwards; only the
//! installer writes to it, right after it moves a package into the store.

use crate::package::{
    InstalledPackage, LanguageCode, LanguagePackage, PackageKey, PackageMetadata, METADATA_FILE,
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

/// Directory inside the store used for in-progress downloads and extraction.
pub const STAGING_DIR: &str = ".staging";

/// Outcome of [`PackageCache::record_installed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// The package is now the entry for its direction. Holds the entry it
    /// replaced, if any.
    Current(Option<Arc<InstalledPackage>>),
    /// A newer version was already recorded and stays the entry.
    Superseded(Arc<InstalledPackage>),
}

pub struct PackageCache {
    store_dir: PathBuf,
    installed: RwLock<HashMap<PackageKey, Arc<InstalledPackage>>>,
}

impl PackageCache {
    /// Open the store at `store_dir`, creating it if needed, and scan it.
    pub fn open(store_dir: impl Into<PathBuf>) -> Result<Self> {
        let store_dir = store_dir.into();
        std::fs::create_dir_all(&store_dir)
            .with_context(|| format!("Failed to create package store {}", store_dir.display()))?;

        // Anything left in staging belongs to an install that never finished.
        let staging = store_dir.join(STAGING_DIR);
        if staging.exists() {
            std::fs::remove_dir_all(&staging).with_context(|| {
                format!("Failed to clear staging directory {}", staging.display())
            })?;
        }

        let installed = scan_store(&store_dir)?;
        info!(
            "Loaded {} installed packages from {}",
            installed.len(),
            store_dir.display()
        );

        Ok(Self {
            store_dir,
            installed: RwLock::new(installed),
        })
    }

    /// A cache with no backing scan, for tests that install into `store_dir`.
    pub fn empty(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            installed: RwLock::new(HashMap::new()),
        }
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.store_dir.join(STAGING_DIR)
    }

    pub fn is_installed(&self, from: &LanguageCode, to: &LanguageCode) -> bool {
        self.read()
            .contains_key(&PackageKey::new(from.clone(), to.clone()))
    }

    pub fn get(&self, from: &LanguageCode, to: &LanguageCode) -> Option<Arc<InstalledPackage>> {
        self.read()
            .get(&PackageKey::new(from.clone(), to.clone()))
            .cloned()
    }

    /// Whether `package`, or a newer version for the same direction, is
    /// installed.
    pub fn satisfies(&self, package: &LanguagePackage) -> bool {
        self.read()
            .get(&package.key())
            .map(|installed| !package.version.is_newer_than(&installed.package.version))
            .unwrap_or(false)
    }

    /// Record a package the installer has moved into the store. The entry
    /// for its direction is replaced only by a newer version; recording the
    /// current entry again is a no-op.
    pub fn record_installed(&self, package: InstalledPackage) -> Recorded {
        let key = package.key();
        let mut installed = self.write();

        if let Some(existing) = installed.get(&key) {
            let same = existing.path == package.path;
            if !same && !package.package.version.is_newer_than(&existing.package.version) {
                return Recorded::Superseded(Arc::clone(existing));
            }
        }

        Recorded::Current(installed.insert(key, Arc::new(package)))
    }

    /// Snapshot of every installed package, sorted by direction.
    pub fn installed(&self) -> Vec<Arc<InstalledPackage>> {
        let mut packages: Vec<_> = self.read().values().cloned().collect();
        packages.sort_by(|a, b| a.key().cmp(&b.key()));
        packages
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Entries are swapped whole and never mutated in place, so a poisoned
    // lock still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<PackageKey, Arc<InstalledPackage>>> {
        self.installed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PackageKey, Arc<InstalledPackage>>> {
        self.installed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Read `metadata.json` from an installed package directory.
pub fn read_metadata(package_dir: &Path) -> Result<PackageMetadata> {
    let path = package_dir.join(METADATA_FILE);
    let body = std::fs::read(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&body).with_context(|| format!("Invalid {}", path.display()))
}

fn scan_store(store_dir: &Path) -> Result<HashMap<PackageKey, Arc<InstalledPackage>>> {
    let mut installed: HashMap<PackageKey, Arc<InstalledPackage>> = HashMap::new();

    let entries = std::fs::read_dir(store_dir)
        .with_context(|| format!("Failed to read package store {}", store_dir.display()))?;

    for entry in entries {
        let entry = entry.context("Failed to read package store entry")?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_dir() {
            continue;
        }

        let metadata = match read_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                continue;
            }
        };

        let package = InstalledPackage {
            package: LanguagePackage::from_metadata(metadata),
            path,
        };
        let key = package.key();

        let keep_existing = installed
            .get(&key)
            .map(|existing| !package.package.version.is_newer_than(&existing.package.version))
            .unwrap_or(false);
        if keep_existing {
            continue;
        }
        installed.insert(key, Arc::new(package));
    }

    Ok(installed)
}
