//! Package installer: download, verify, extract, then move into the store.
//!
//! Every attempt works inside its own temporary directory under the store's
//! staging area. The final rename into the store is the only step that makes
//! a package visible, and the cache is updated right after it. Any failure
//! drops the temporary directory, so nothing partial is ever left behind.

use crate::cache::{read_metadata, PackageCache, Recorded};
use crate::error::InstallError;
use crate::package::{DownloadRef, InstalledPackage, LanguagePackage, METADATA_FILE};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use zip::read::ZipArchive;

const ARCHIVE_NAME: &str = "package.zip";
const CONTENTS_DIR: &str = "contents";
const CHUNK_SIZE: usize = 64 * 1024;

pub struct Installer {
    client: reqwest::Client,
    cache: Arc<PackageCache>,
}

impl Installer {
    pub fn new(client: reqwest::Client, cache: Arc<PackageCache>) -> Self {
        Self { client, cache }
    }

    /// Install `package` and record it in the cache.
    ///
    /// Safe to call concurrently for different packages. Callers must not run
    /// two installs of the same package at once. If a newer version for the
    /// same direction gets recorded first, that entry is returned and this
    /// copy is removed from the store.
    pub async fn install(
        &self,
        package: &LanguagePackage,
    ) -> Result<Arc<InstalledPackage>, InstallError> {
        let download = package.download.as_ref().ok_or_else(|| {
            InstallError::DownloadFailed(format!("no download link for {}", package.key()))
        })?;

        info!(
            "Installing language package: {} -> {} ({})",
            package.from_code, package.to_code, package.version
        );

        let staging_root = self.cache.staging_dir();
        tokio::fs::create_dir_all(&staging_root)
            .await
            .map_err(|e| disk_error("create staging directory", &staging_root, e))?;

        let attempt = tempfile::Builder::new()
            .prefix(&format!("{}-", package.dir_name()))
            .tempdir_in(&staging_root)
            .map_err(|e| disk_error("create attempt directory", &staging_root, e))?;

        let archive = attempt.path().join(ARCHIVE_NAME);
        let (size, digest) = self.fetch(&download.url, &archive).await?;
        verify(download, size, &digest)?;
        debug!("Downloaded {} bytes for {} (sha256 {})", size, package.key(), digest);

        let contents = attempt.path().join(CONTENTS_DIR);
        let expected = package.clone();
        let package_root = tokio::task::spawn_blocking(move || {
            extract_package(&archive, &contents, &expected)
        })
        .await??;

        let final_dir = self.cache.store_dir().join(package.dir_name());
        if let Some(current) = self.cache.get(&package.from_code, &package.to_code) {
            if current.path == final_dir {
                debug!("{} is already in the store", current.id());
                return Ok(current);
            }
        }
        if tokio::fs::metadata(&final_dir).await.is_ok() {
            clear_stale_dir(&final_dir, package).await?;
        }
        tokio::fs::rename(&package_root, &final_dir)
            .await
            .map_err(|e| disk_error("move package into store", &final_dir, e))?;

        let installed = InstalledPackage {
            package: package.clone(),
            path: final_dir,
        };
        match self.cache.record_installed(installed.clone()) {
            Recorded::Current(replaced) => {
                if let Some(replaced) = replaced.filter(|r| r.path != installed.path) {
                    remove_superseded(&replaced).await;
                }
            }
            Recorded::Superseded(current) => {
                // A newer version finished first; it stays and this copy goes.
                info!(
                    "Discarding {}: {} is already installed",
                    installed.id(),
                    current.id()
                );
                remove_superseded(&installed).await;
                return Ok(current);
            }
        }

        info!(
            "Installed: {} -> {} ({})",
            package.from_code, package.to_code, package.version
        );
        Ok(Arc::new(installed))
    }

    /// Stream the archive to `dest`, hashing as it arrives.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(u64, String), InstallError> {
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| disk_error("create archive file", dest, e))?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        if let Some(local) = url.strip_prefix("file://") {
            let mut source = tokio::fs::File::open(local).await.map_err(|e| {
                InstallError::DownloadFailed(format!("failed to open {}: {}", local, e))
            })?;
            let mut buffer = vec![0u8; CHUNK_SIZE];
            loop {
                let read = source.read(&mut buffer).await.map_err(|e| {
                    InstallError::DownloadFailed(format!("failed to read {}: {}", local, e))
                })?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
                file.write_all(&buffer[..read])
                    .await
                    .map_err(|e| disk_error("write archive", dest, e))?;
                size += read as u64;
            }
        } else {
            let mut response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| InstallError::DownloadFailed(format!("request {}: {}", url, e)))?;

            if !response.status().is_success() {
                return Err(InstallError::DownloadFailed(format!(
                    "download {} returned {}",
                    url,
                    response.status()
                )));
            }

            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| InstallError::DownloadFailed(format!("read {}: {}", url, e)))?
            {
                hasher.update(&chunk);
                file.write_all(&chunk)
                    .await
                    .map_err(|e| disk_error("write archive", dest, e))?;
                size += chunk.len() as u64;
            }
        }

        file.flush()
            .await
            .map_err(|e| disk_error("flush archive", dest, e))?;

        Ok((size, format!("{:x}", hasher.finalize())))
    }
}

fn verify(download: &DownloadRef, size: u64, digest: &str) -> Result<(), InstallError> {
    if let Some(expected) = download.size {
        if size != expected {
            return Err(InstallError::IntegrityCheckFailed(format!(
                "size mismatch: expected {} bytes, got {}",
                expected, size
            )));
        }
    }

    if let Some(expected) = &download.sha256 {
        if !expected.eq_ignore_ascii_case(digest) {
            return Err(InstallError::IntegrityCheckFailed(format!(
                "checksum mismatch: expected {}, got {}",
                expected, digest
            )));
        }
    }

    Ok(())
}

/// Unpack the archive into `dest` and return the directory holding the
/// package's `metadata.json`, after checking it describes `expected`.
fn extract_package(
    archive_path: &Path,
    dest: &Path,
    expected: &LanguagePackage,
) -> Result<PathBuf, InstallError> {
    let file = File::open(archive_path).map_err(|e| disk_error("open archive", archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| {
        InstallError::IntegrityCheckFailed(format!("not a valid package archive: {}", e))
    })?;

    fs::create_dir_all(dest).map_err(|e| disk_error("create contents directory", dest, e))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| {
            InstallError::IntegrityCheckFailed(format!("unreadable archive entry: {}", e))
        })?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                InstallError::IntegrityCheckFailed(format!(
                    "archive entry escapes package: {}",
                    entry.name()
                ))
            })?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| disk_error("create directory", &target, e))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| disk_error("create directory", parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| disk_error("create file", &target, e))?;
        loop {
            let read = entry.read(&mut buffer).map_err(|e| {
                InstallError::IntegrityCheckFailed(format!("corrupt archive entry: {}", e))
            })?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read])
                .map_err(|e| disk_error("write file", &target, e))?;
        }
    }

    let root = package_root(dest)?;
    let metadata = read_metadata(&root)
        .map_err(|e| InstallError::IntegrityCheckFailed(format!("{:#}", e)))?;

    if !metadata.matches(expected) {
        return Err(InstallError::IntegrityCheckFailed(format!(
            "package metadata is for {} -> {}, expected {}",
            metadata.from_code,
            metadata.to_code,
            expected.key()
        )));
    }

    Ok(root)
}

/// Packages carry `metadata.json` either at the archive root or inside a
/// single top-level directory.
fn package_root(contents: &Path) -> Result<PathBuf, InstallError> {
    if contents.join(METADATA_FILE).is_file() {
        return Ok(contents.to_path_buf());
    }

    let entries: Vec<PathBuf> = fs::read_dir(contents)
        .map_err(|e| disk_error("read contents directory", contents, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();

    match entries.as_slice() {
        [single] if single.join(METADATA_FILE).is_file() => Ok(single.clone()),
        _ => Err(InstallError::IntegrityCheckFailed(format!(
            "archive has no {}",
            METADATA_FILE
        ))),
    }
}

/// Remove a leftover directory at `final_dir`, e.g. one with unreadable
/// metadata from an older deployment. A directory holding another
/// direction's package is never touched.
async fn clear_stale_dir(final_dir: &Path, package: &LanguagePackage) -> Result<(), InstallError> {
    if let Ok(metadata) = read_metadata(final_dir) {
        if !metadata.matches(package) {
            return Err(InstallError::DiskWriteFailed(format!(
                "{} holds {} -> {}, not {}",
                final_dir.display(),
                metadata.from_code,
                metadata.to_code,
                package.key()
            )));
        }
    }

    warn!("Replacing stale package directory {}", final_dir.display());
    tokio::fs::remove_dir_all(final_dir)
        .await
        .map_err(|e| disk_error("remove stale package directory", final_dir, e))
}

async fn remove_superseded(replaced: &InstalledPackage) {
    match tokio::fs::remove_dir_all(&replaced.path).await {
        Ok(()) => info!(
            "Removed superseded package {} from {}",
            replaced.id(),
            replaced.path.display()
        ),
        Err(e) => warn!(
            "Failed to remove superseded package {}: {}",
            replaced.path.display(),
            e
        ),
    }
}

fn disk_error(action: &str, path: &Path, err: std::io::Error) -> InstallError {
    InstallError::DiskWriteFailed(format!("{} {}: {}", action, path.display(), err))
}
