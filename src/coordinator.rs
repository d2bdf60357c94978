//! Acquisition coordinator: makes a language pair translatable on demand.
//!
//! Installs are keyed by package identity. A request that needs a package
//! already being installed waits for that install instead of starting its
//! own; once it finishes (either way) the ticket is gone, so a failure is
//! never replayed to later requests.

use crate::cache::PackageCache;
use crate::error::{AcquisitionError, InstallError};
use crate::index::{CandidatePath, PackageIndex};
use crate::installer::Installer;
use crate::metrics::ServiceMetrics;
use crate::package::{InstalledPackage, LanguageCode, LanguagePackage, PackageId};
use crate::resolver::{Resolver, TranslationPath};
use crate::single_flight::{Flight, SingleFlight};
use futures::future::try_join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Coordinator {
    cache: Arc<PackageCache>,
    resolver: Arc<Resolver>,
    index: Arc<dyn PackageIndex>,
    installer: Arc<Installer>,
    tickets: SingleFlight<PackageId, Arc<InstalledPackage>, InstallError>,
    metrics: Arc<ServiceMetrics>,
}

impl Coordinator {
    pub fn new(
        cache: Arc<PackageCache>,
        resolver: Arc<Resolver>,
        index: Arc<dyn PackageIndex>,
        installer: Arc<Installer>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            cache,
            resolver,
            index,
            installer,
            tickets: SingleFlight::new(),
            metrics,
        }
    }

    /// Return a usable path for `from -> to`, installing missing packages
    /// first. Installed pairs never touch the index.
    pub async fn ensure_translatable(
        &self,
        from: &LanguageCode,
        to: &LanguageCode,
    ) -> Result<TranslationPath, AcquisitionError> {
        if let Some(path) = self.resolver.resolve(from, to) {
            return Ok(path);
        }

        let no_path = || AcquisitionError::NoPathAvailable {
            from: from.clone(),
            to: to.clone(),
        };

        let candidates = self
            .index
            .find_candidates(from, to, self.resolver.default_pivot())
            .await?;
        let candidate = self.choose(candidates).ok_or_else(no_path)?;

        let missing: Vec<LanguagePackage> = candidate
            .packages
            .into_iter()
            .filter(|p| !self.cache.is_installed(&p.from_code, &p.to_code))
            .collect();

        info!(
            "Acquiring {} -> {}: {} package(s) to install",
            from,
            to,
            missing.len()
        );

        try_join_all(missing.into_iter().map(|package| self.acquire(package))).await?;

        self.resolver.resolve(from, to).ok_or_else(no_path)
    }

    /// Like [`Coordinator::ensure_translatable`], but gives up with
    /// `Cancelled` when `cancel` completes first. Installs this call started
    /// keep running for everyone else waiting on them.
    pub async fn ensure_translatable_until<C>(
        &self,
        from: &LanguageCode,
        to: &LanguageCode,
        cancel: C,
    ) -> Result<TranslationPath, AcquisitionError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.ensure_translatable(from, to) => result,
            _ = cancel => {
                warn!("Stopped waiting for {} -> {}", from, to);
                Err(AcquisitionError::Cancelled)
            }
        }
    }

    /// Number of installs currently running.
    pub fn installs_in_flight(&self) -> usize {
        self.tickets.in_flight_count()
    }

    /// Fewest hops first, then fewest downloads; ties keep index order.
    fn choose(&self, candidates: Vec<CandidatePath>) -> Option<CandidatePath> {
        candidates.into_iter().min_by_key(|candidate| {
            let missing = candidate
                .packages
                .iter()
                .filter(|p| !self.cache.is_installed(&p.from_code, &p.to_code))
                .count();
            (candidate.hops(), missing)
        })
    }

    /// Install `package`, or join the install already running for it.
    async fn acquire(
        &self,
        package: LanguagePackage,
    ) -> Result<Arc<InstalledPackage>, InstallError> {
        let id = package.id();
        let cache = Arc::clone(&self.cache);
        let installer = Arc::clone(&self.installer);
        let metrics = Arc::clone(&self.metrics);

        let (result, flight) = self
            .tickets
            .run(id.clone(), move || async move {
                // A ticket for this package may have completed between the
                // caller's cache check and now.
                if cache.satisfies(&package) {
                    if let Some(existing) = cache.get(&package.from_code, &package.to_code) {
                        debug!("{} already installed", existing.id());
                        return Ok(existing);
                    }
                }

                metrics.record_install_started();
                let result = installer.install(&package).await;
                if result.is_err() {
                    metrics.record_install_failed();
                }
                result
            })
            .await;

        match (&result, flight) {
            (_, Flight::Joined) => {
                debug!("Joined in-flight install of {}", id);
                self.metrics.record_install_joined();
            }
            (Err(e), Flight::Led) => warn!("Install of {} failed: {}", id, e),
            (Ok(_), Flight::Led) => {}
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::index::{HttpPackageIndex, ManifestIndex};
    use crate::package::METADATA_FILE;
    use crate::testing::{catalog_package, package_archive, sha256_hex};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    struct Harness {
        coordinator: Arc<Coordinator>,
        cache: Arc<PackageCache>,
        metrics: Arc<ServiceMetrics>,
        _dir: TempDir,
    }

    fn harness(index: Arc<dyn PackageIndex>, pivot: Option<&str>) -> Harness {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(PackageCache::open(dir.path()).unwrap());
        let resolver = Arc::new(Resolver::new(
            Arc::clone(&cache),
            pivot.map(LanguageCode::from),
        ));
        let installer = Arc::new(Installer::new(reqwest::Client::new(), Arc::clone(&cache)));
        let metrics = Arc::new(ServiceMetrics::new());
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&cache),
            resolver,
            index,
            installer,
            Arc::clone(&metrics),
        ));

        Harness {
            coordinator,
            cache,
            metrics,
            _dir: dir,
        }
    }

    /// Serve a package archive, expecting exactly `downloads` fetches.
    async fn serve_package(
        mock_server: &MockServer,
        from: &str,
        to: &str,
        downloads: u64,
        delay: Duration,
    ) -> LanguagePackage {
        let archive = package_archive(from, to, "1.0");
        let route = format!("/{}_{}.zip", from, to);
        let package = catalog_package(
            from,
            to,
            "1.0",
            format!("{}{}", mock_server.uri(), route),
            Some(sha256_hex(&archive)),
            Some(archive.len() as u64),
        );

        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(archive)
                    .set_delay(delay),
            )
            .expect(downloads)
            .mount(mock_server)
            .await;

        package
    }

    fn hops(path: &TranslationPath) -> Vec<String> {
        path.hops()
            .iter()
            .map(|p| p.key().to_string())
            .collect()
    }

    /// Counts catalog lookups.
    struct CountingIndex {
        inner: ManifestIndex,
        lookups: AtomicU32,
    }

    #[async_trait]
    impl PackageIndex for CountingIndex {
        async fn list_available(&self) -> Result<Vec<LanguagePackage>, IndexError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.list_available().await
        }
    }

    /// Serves `catalogs[n]` on the n-th lookup, then repeats the last one.
    struct ChangingIndex {
        catalogs: Vec<Vec<LanguagePackage>>,
        lookups: AtomicU32,
    }

    #[async_trait]
    impl PackageIndex for ChangingIndex {
        async fn list_available(&self) -> Result<Vec<LanguagePackage>, IndexError> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst) as usize;
            Ok(self.catalogs[n.min(self.catalogs.len() - 1)].clone())
        }
    }

    #[tokio::test]
    async fn test_installs_direct_package_on_demand() {
        let mock_server = MockServer::start().await;
        let en_vi = serve_package(&mock_server, "en", "vi", 1, Duration::ZERO).await;
        let h = harness(Arc::new(ManifestIndex::from_packages(vec![en_vi])), Some("en"));

        let path = h
            .coordinator
            .ensure_translatable(&"en".into(), &"vi".into())
            .await
            .unwrap();

        assert_eq!(hops(&path), vec!["en->vi"]);
        assert!(h.cache.is_installed(&"en".into(), &"vi".into()));
        assert_eq!(h.metrics.installs_started(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_install() {
        let mock_server = MockServer::start().await;
        let en_vi = serve_package(&mock_server, "en", "vi", 1, Duration::from_millis(200)).await;
        let h = harness(Arc::new(ManifestIndex::from_packages(vec![en_vi])), Some("en"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&h.coordinator);
                tokio::spawn(async move {
                    coordinator
                        .ensure_translatable(&"en".into(), &"vi".into())
                        .await
                })
            })
            .collect();

        for handle in handles {
            let path = handle.await.unwrap().unwrap();
            assert_eq!(hops(&path), vec!["en->vi"]);
        }

        assert_eq!(h.metrics.installs_started(), 1);
        assert_eq!(h.coordinator.installs_in_flight(), 0);
        // Dropping the mock server verifies the single download.
    }

    #[tokio::test]
    async fn test_installed_pair_skips_index() {
        let mock_server = MockServer::start().await;
        let en_vi = serve_package(&mock_server, "en", "vi", 1, Duration::ZERO).await;
        let index = Arc::new(CountingIndex {
            inner: ManifestIndex::from_packages(vec![en_vi]),
            lookups: AtomicU32::new(0),
        });
        let h = harness(index.clone(), None);

        h.coordinator
            .ensure_translatable(&"en".into(), &"vi".into())
            .await
            .unwrap();
        h.coordinator
            .ensure_translatable(&"en".into(), &"vi".into())
            .await
            .unwrap();

        assert_eq!(index.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(h.metrics.installs_started(), 1);
    }

    #[tokio::test]
    async fn test_identity_needs_nothing() {
        let h = harness(Arc::new(ManifestIndex::from_packages(Vec::new())), None);

        let path = h
            .coordinator
            .ensure_translatable(&"fr".into(), &"fr".into())
            .await
            .unwrap();

        assert!(path.is_identity());
    }

    #[tokio::test]
    async fn test_installs_both_legs_of_pivot() {
        let mock_server = MockServer::start().await;
        let vi_en = serve_package(&mock_server, "vi", "en", 1, Duration::ZERO).await;
        let en_fr = serve_package(&mock_server, "en", "fr", 1, Duration::ZERO).await;
        let h = harness(
            Arc::new(ManifestIndex::from_packages(vec![vi_en, en_fr])),
            Some("en"),
        );

        let path = h
            .coordinator
            .ensure_translatable(&"vi".into(), &"fr".into())
            .await
            .unwrap();

        assert_eq!(hops(&path), vec!["vi->en", "en->fr"]);
        assert_eq!(h.metrics.installs_started(), 2);
    }

    #[tokio::test]
    async fn test_pivot_reuses_installed_leg() {
        let mock_server = MockServer::start().await;
        let vi_en = serve_package(&mock_server, "vi", "en", 1, Duration::ZERO).await;
        let en_fr = serve_package(&mock_server, "en", "fr", 1, Duration::ZERO).await;
        let en_es = serve_package(&mock_server, "en", "es", 1, Duration::ZERO).await;
        let h = harness(
            Arc::new(ManifestIndex::from_packages(vec![vi_en, en_fr, en_es])),
            Some("en"),
        );

        h.coordinator
            .ensure_translatable(&"vi".into(), &"fr".into())
            .await
            .unwrap();
        let path = h
            .coordinator
            .ensure_translatable(&"vi".into(), &"es".into())
            .await
            .unwrap();

        assert_eq!(hops(&path), vec!["vi->en", "en->es"]);
        assert_eq!(h.metrics.installs_started(), 3);
    }

    #[tokio::test]
    async fn test_unknown_pair_is_no_path() {
        let mock_server = MockServer::start().await;
        let en_vi = serve_package(&mock_server, "en", "vi", 0, Duration::ZERO).await;
        let h = harness(Arc::new(ManifestIndex::from_packages(vec![en_vi])), Some("en"));

        let err = h
            .coordinator
            .ensure_translatable(&"xx".into(), &"yy".into())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AcquisitionError::NoPathAvailable {
                from: "xx".into(),
                to: "yy".into()
            }
        );
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_is_not_replayed() {
        let mock_server = MockServer::start().await;
        let archive = package_archive("en", "vi", "1.0");
        let package = catalog_package(
            "en",
            "vi",
            "1.0",
            format!("{}/en_vi.zip", mock_server.uri()),
            Some(sha256_hex(&archive)),
            None,
        );

        Mock::given(method("GET"))
            .and(path("/en_vi.zip"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/en_vi.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&mock_server)
            .await;

        let h = harness(Arc::new(ManifestIndex::from_packages(vec![package])), None);

        let err = h
            .coordinator
            .ensure_translatable(&"en".into(), &"vi".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::Install(InstallError::DownloadFailed(_))
        ));
        assert!(!h.cache.is_installed(&"en".into(), &"vi".into()));
        assert_eq!(h.coordinator.installs_in_flight(), 0);

        h.coordinator
            .ensure_translatable(&"en".into(), &"vi".into())
            .await
            .unwrap();
        assert_eq!(h.metrics.installs_started(), 2);
        assert_eq!(h.metrics.installs_failed(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failure_reaches_every_waiter() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/en_vi.zip"))
            .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&mock_server)
            .await;
        let package = catalog_package(
            "en",
            "vi",
            "1.0",
            format!("{}/en_vi.zip", mock_server.uri()),
            None,
            None,
        );
        let h = harness(Arc::new(ManifestIndex::from_packages(vec![package])), None);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&h.coordinator);
                tokio::spawn(async move {
                    coordinator
                        .ensure_translatable(&"en".into(), &"vi".into())
                        .await
                })
            })
            .collect();

        let mut errors = Vec::new();
        for handle in handles {
            errors.push(handle.await.unwrap().unwrap_err());
        }

        assert!(matches!(
            errors[0],
            AcquisitionError::Install(InstallError::DownloadFailed(_))
        ));
        assert!(errors.iter().all(|e| *e == errors[0]));
        assert_eq!(h.metrics.installs_started(), 1);
        assert_eq!(h.metrics.installs_failed(), 1);
        assert_eq!(h.metrics.install_joins(), 7);
        assert_eq!(h.coordinator.installs_in_flight(), 0);
        assert!(!h.cache.is_installed(&"en".into(), &"vi".into()));
    }

    #[tokio::test]
    async fn test_older_version_finishing_last_keeps_newer_install() {
        let mock_server = MockServer::start().await;
        let v1_archive = package_archive("en", "vi", "1.0");
        let v2_archive = package_archive("en", "vi", "2.0");
        Mock::given(method("GET"))
            .and(path("/en_vi_1.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(v1_archive)
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/en_vi_2.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(v2_archive))
            .mount(&mock_server)
            .await;

        let v1 = catalog_package("en", "vi", "1.0", format!("{}/en_vi_1.zip", mock_server.uri()), None, None);
        let v2 = catalog_package("en", "vi", "2.0", format!("{}/en_vi_2.zip", mock_server.uri()), None, None);
        let index = Arc::new(ChangingIndex {
            catalogs: vec![vec![v1], vec![v2]],
            lookups: AtomicU32::new(0),
        });
        let h = harness(index, None);

        // The first request sees the old catalog and downloads slowly; the
        // second sees the new one and finishes first.
        let first = {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move {
                coordinator
                    .ensure_translatable(&"en".into(), &"vi".into())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = h
            .coordinator
            .ensure_translatable(&"en".into(), &"vi".into())
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();

        let version = |p: &TranslationPath| p.hops()[0].package.version.to_string();
        assert_eq!(version(&second), "2.0");
        assert_eq!(version(&first), "2.0");
        assert!(second.hops()[0].path.join(METADATA_FILE).is_file());

        let current = h.cache.get(&"en".into(), &"vi".into()).unwrap();
        assert_eq!(current.package.version.to_string(), "2.0");
        assert!(!current.path.with_file_name("en-vi-1.0").exists());
    }

    #[tokio::test]
    async fn test_unreachable_index() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;
        let index = HttpPackageIndex::new(
            reqwest::Client::new(),
            format!("{}/index.json", mock_server.uri()),
        );
        let h = harness(Arc::new(index), None);

        let err = h
            .coordinator
            .ensure_translatable(&"en".into(), &"vi".into())
            .await
            .unwrap_err();

        assert!(matches!(err, AcquisitionError::IndexUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_cancel_install() {
        let mock_server = MockServer::start().await;
        let en_vi = serve_package(&mock_server, "en", "vi", 1, Duration::from_millis(300)).await;
        let h = harness(Arc::new(ManifestIndex::from_packages(vec![en_vi])), None);

        let err = h
            .coordinator
            .ensure_translatable_until(
                &"en".into(),
                &"vi".into(),
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, AcquisitionError::Cancelled);

        // The install keeps going and a later request joins or finds it.
        let path = h
            .coordinator
            .ensure_translatable(&"en".into(), &"vi".into())
            .await
            .unwrap();
        assert_eq!(hops(&path), vec!["en->vi"]);
        assert_eq!(h.metrics.installs_started(), 1);
    }
}
