//! Package data model: language codes, versions, catalog entries and
//! installed packages.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

/// Name of the metadata file every package carries at its root.
pub const METADATA_FILE: &str = "metadata.json";

/// A language identifier such as `"en"` or `"vi"`.
///
/// Equality is exact string match; no case folding or alias handling.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LanguageCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<String> for LanguageCode {
    fn from(code: String) -> Self {
        Self(code)
    }
}

/// A dotted package version (`"1.9"`, `"1.0.2"`).
///
/// Equality is on the raw string; use [`PackageVersion::compare`] for
/// ordering, which treats `"1.0"` and `"1"` as the same release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageVersion(String);

impl PackageVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Component-wise comparison. Numeric components compare numerically,
    /// anything else lexicographically; missing components count as `0`.
    pub fn compare(&self, other: &PackageVersion) -> Ordering {
        let mut left = self.0.split('.');
        let mut right = other.0.split('.');

        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (l, r) => {
                    let l = l.unwrap_or("0");
                    let r = r.unwrap_or("0");
                    let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                        (Ok(a), Ok(b)) => a.cmp(&b),
                        _ => l.cmp(r),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }

    pub fn is_newer_than(&self, other: &PackageVersion) -> bool {
        self.compare(other) == Ordering::Greater
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache key: one installed package per translation direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageKey {
    pub from: LanguageCode,
    pub to: LanguageCode,
}

impl PackageKey {
    pub fn new(from: impl Into<LanguageCode>, to: impl Into<LanguageCode>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// Package identity, used to key in-flight installs and loaded models.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    pub from: LanguageCode,
    pub to: LanguageCode,
    pub version: PackageVersion,
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}@{}", self.from, self.to, self.version)
    }
}

/// Where to fetch a package archive and how to verify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A one-hop translation capability for a single direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePackage {
    pub from_code: LanguageCode,
    pub to_code: LanguageCode,
    pub from_name: String,
    pub to_name: String,
    pub version: PackageVersion,
    /// Present for catalog entries; packages rebuilt from disk have none.
    pub download: Option<DownloadRef>,
}

impl LanguagePackage {
    pub fn key(&self) -> PackageKey {
        PackageKey::new(self.from_code.clone(), self.to_code.clone())
    }

    pub fn id(&self) -> PackageId {
        PackageId {
            from: self.from_code.clone(),
            to: self.to_code.clone(),
            version: self.version.clone(),
        }
    }

    /// Directory name inside the package store. Distinct packages always get
    /// distinct names.
    pub fn dir_name(&self) -> String {
        format!(
            "{}-{}-{}",
            sanitize(self.from_code.as_str()),
            sanitize(self.to_code.as_str()),
            sanitize(self.version.as_str())
        )
    }

    pub fn from_metadata(metadata: PackageMetadata) -> Self {
        let from_name = metadata
            .from_name
            .unwrap_or_else(|| metadata.from_code.to_string());
        let to_name = metadata
            .to_name
            .unwrap_or_else(|| metadata.to_code.to_string());

        Self {
            from_code: metadata.from_code,
            to_code: metadata.to_code,
            from_name,
            to_name,
            version: metadata.package_version,
            download: None,
        }
    }
}

// ASCII alphanumerics and `.` pass through; every other byte becomes `_xx`.
// `_` always starts an escape and `-` never survives, so the joined name
// decodes back to exactly one (from, to, version).
fn sanitize(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
    out
}

/// Contents of a package's `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub from_code: LanguageCode,
    pub to_code: LanguageCode,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub to_name: Option<String>,
    #[serde(default = "default_version")]
    pub package_version: PackageVersion,
}

fn default_version() -> PackageVersion {
    PackageVersion::new("0")
}

impl PackageMetadata {
    pub fn matches(&self, package: &LanguagePackage) -> bool {
        self.from_code == package.from_code && self.to_code == package.to_code
    }
}

/// A package that is present in the package store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub package: LanguagePackage,
    pub path: PathBuf,
}

impl InstalledPackage {
    pub fn key(&self) -> PackageKey {
        self.package.key()
    }

    pub fn id(&self) -> PackageId {
        self.package.id()
    }
}

/// A currently translatable direction, as listed by `GET /languages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguagePair {
    pub from: LanguageCode,
    pub to: LanguageCode,
    pub name: String,
}
