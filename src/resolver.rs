//! Translation path resolution over installed packages.
//!
//! The resolver only looks at the package cache; it never downloads.

use crate::cache::PackageCache;
use crate::package::{InstalledPackage, LanguageCode, LanguagePair};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// An ordered chain of installed packages from `source` to `target`.
///
/// Zero hops is the identity path (`source == target`); one hop is a direct
/// package; two hops go through the pivot language `hops[0].to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationPath {
    source: LanguageCode,
    target: LanguageCode,
    hops: Vec<Arc<InstalledPackage>>,
}

impl TranslationPath {
    pub fn identity(language: LanguageCode) -> Self {
        Self {
            source: language.clone(),
            target: language,
            hops: Vec::new(),
        }
    }

    pub fn direct(package: Arc<InstalledPackage>) -> Self {
        Self {
            source: package.package.from_code.clone(),
            target: package.package.to_code.clone(),
            hops: vec![package],
        }
    }

    /// Two-hop path. Returns `None` unless `first.to == second.from`.
    pub fn pivot(first: Arc<InstalledPackage>, second: Arc<InstalledPackage>) -> Option<Self> {
        if first.package.to_code != second.package.from_code {
            return None;
        }

        Some(Self {
            source: first.package.from_code.clone(),
            target: second.package.to_code.clone(),
            hops: vec![first, second],
        })
    }

    pub fn source(&self) -> &LanguageCode {
        &self.source
    }

    pub fn target(&self) -> &LanguageCode {
        &self.target
    }

    pub fn hops(&self) -> &[Arc<InstalledPackage>] {
        &self.hops
    }

    pub fn is_identity(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn pivot_language(&self) -> Option<&LanguageCode> {
        match self.hops.as_slice() {
            [first, _] => Some(&first.package.to_code),
            _ => None,
        }
    }
}

pub struct Resolver {
    cache: Arc<PackageCache>,
    default_pivot: Option<LanguageCode>,
}

impl Resolver {
    pub fn new(cache: Arc<PackageCache>, default_pivot: Option<LanguageCode>) -> Self {
        Self {
            cache,
            default_pivot,
        }
    }

    pub fn default_pivot(&self) -> Option<&LanguageCode> {
        self.default_pivot.as_ref()
    }

    /// Find a usable path among installed packages.
    ///
    /// Pivot tie-break: the configured default pivot if it works, otherwise
    /// the lexicographically smallest intermediate language.
    pub fn resolve(&self, from: &LanguageCode, to: &LanguageCode) -> Option<TranslationPath> {
        if from == to {
            return Some(TranslationPath::identity(from.clone()));
        }

        if let Some(package) = self.cache.get(from, to) {
            return Some(TranslationPath::direct(package));
        }

        if let Some(pivot) = &self.default_pivot {
            if let Some(path) = self.through(from, pivot, to) {
                debug!("Resolved {} -> {} through default pivot {}", from, to, pivot);
                return Some(path);
            }
        }

        let mids: BTreeSet<LanguageCode> = self
            .cache
            .installed()
            .into_iter()
            .filter(|p| &p.package.from_code == from)
            .map(|p| p.package.to_code.clone())
            .collect();

        mids.iter().find_map(|mid| self.through(from, mid, to))
    }

    fn through(
        &self,
        from: &LanguageCode,
        mid: &LanguageCode,
        to: &LanguageCode,
    ) -> Option<TranslationPath> {
        if mid == from || mid == to {
            return None;
        }
        let first = self.cache.get(from, mid)?;
        let second = self.cache.get(mid, to)?;
        TranslationPath::pivot(first, second)
    }

    /// Every non-identity pair translatable right now, direct or through one
    /// pivot, sorted by `(from, to)`.
    pub fn resolvable_pairs(&self) -> Vec<LanguagePair> {
        let installed = self.cache.installed();

        let mut names: BTreeMap<&LanguageCode, &str> = BTreeMap::new();
        for p in &installed {
            names.entry(&p.package.from_code).or_insert(p.package.from_name.as_str());
            names.entry(&p.package.to_code).or_insert(p.package.to_name.as_str());
        }

        let mut pairs: BTreeSet<(&LanguageCode, &LanguageCode)> = BTreeSet::new();
        for first in &installed {
            pairs.insert((&first.package.from_code, &first.package.to_code));
            for second in &installed {
                if first.package.to_code == second.package.from_code
                    && first.package.from_code != second.package.to_code
                {
                    pairs.insert((&first.package.from_code, &second.package.to_code));
                }
            }
        }

        pairs
            .into_iter()
            .filter(|(from, to)| from != to)
            .map(|(from, to)| LanguagePair {
                from: from.clone(),
                to: to.clone(),
                name: format!(
                    "{} -> {}",
                    names.get(from).copied().unwrap_or(from.as_str()),
                    names.get(to).copied().unwrap_or(to.as_str())
                ),
            })
            .collect()
    }
}
