//! GeoIP database access: the lookup abstraction and the MaxMind backend.
//!
//! Matchers only depend on [`CountryLookup`]. With the `geoip` feature the
//! crate also provides `GeoipDb`, a MaxMind reader wrapper, and
//! `GeoipLoader`, which opens a database at most once and can download it
//! when the file is missing (`download` feature).

use std::net::IpAddr;

/// Country lookup used by GeoIP matchers.
pub trait CountryLookup: Send + Sync {
    /// ISO 3166 alpha-2 country code of `ip`, if known.
    fn country_code(&self, ip: IpAddr) -> Option<String>;
}

#[cfg(feature = "geoip")]
mod inner {
    use std::net::IpAddr;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use maxminddb::Reader;
    use parking_lot::Mutex;
    use tracing::{error, info, warn};

    use super::CountryLookup;
    use crate::error::RulesError;

    /// MaxMind database wrapper.
    pub struct GeoipDb {
        reader: Reader<Vec<u8>>,
    }

    impl GeoipDb {
        /// Load from a local `.mmdb` file.
        pub fn from_file(path: &Path) -> Result<Self, RulesError> {
            let reader = Reader::open_readfile(path).map_err(|e| {
                RulesError::GeoIp(format!("failed to open {}: {e}", path.display()))
            })?;
            Ok(Self { reader })
        }

        /// Load from raw bytes.
        pub fn from_bytes(data: Vec<u8>) -> Result<Self, RulesError> {
            let reader = Reader::from_source(data)
                .map_err(|e| RulesError::GeoIp(format!("failed to parse GeoIP database: {e}")))?;
            Ok(Self { reader })
        }

        /// Look up the upper-case ISO country code for an IP address.
        ///
        /// Country records are tried first, then City records, so both
        /// country-level and city-level databases work.
        pub fn country_code(&self, ip: IpAddr) -> Option<String> {
            if let Ok(country) = self.reader.lookup::<maxminddb::geoip2::Country>(ip)
                && let Some(code) = country.country.and_then(|c| c.iso_code)
            {
                return Some(code.to_uppercase());
            }
            if let Ok(city) = self.reader.lookup::<maxminddb::geoip2::City>(ip)
                && let Some(code) = city.country.and_then(|c| c.iso_code)
            {
                return Some(code.to_uppercase());
            }
            None
        }
    }

    impl CountryLookup for GeoipDb {
        fn country_code(&self, ip: IpAddr) -> Option<String> {
            GeoipDb::country_code(self, ip)
        }
    }

    impl std::fmt::Debug for GeoipDb {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("GeoipDb").finish_non_exhaustive()
        }
    }

    /// Where a [`GeoipLoader`] gets its database from.
    pub trait GeoipSource: Send + Sync {
        /// Open a database file on disk.
        fn open(&self, path: &Path) -> Result<Arc<dyn CountryLookup>, RulesError>;

        /// Parse a freshly downloaded database.
        fn parse(&self, data: Vec<u8>) -> Result<Arc<dyn CountryLookup>, RulesError>;

        /// Download the raw database bytes from `url`.
        fn fetch(&self, url: &str) -> Result<Vec<u8>, RulesError>;
    }

    /// MaxMind files on disk, downloaded over HTTP(S) when missing.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct MaxmindSource;

    impl GeoipSource for MaxmindSource {
        fn open(&self, path: &Path) -> Result<Arc<dyn CountryLookup>, RulesError> {
            Ok(Arc::new(GeoipDb::from_file(path)?))
        }

        fn parse(&self, data: Vec<u8>) -> Result<Arc<dyn CountryLookup>, RulesError> {
            Ok(Arc::new(GeoipDb::from_bytes(data)?))
        }

        #[cfg(feature = "download")]
        fn fetch(&self, url: &str) -> Result<Vec<u8>, RulesError> {
            download_mmdb(url)
        }

        #[cfg(not(feature = "download"))]
        fn fetch(&self, url: &str) -> Result<Vec<u8>, RulesError> {
            Err(RulesError::Http(format!(
                "cannot fetch {url}: built without download support"
            )))
        }
    }

    /// Download an mmdb file.
    ///
    /// Runs on its own thread because the blocking client must not be
    /// driven from inside an async runtime.
    #[cfg(feature = "download")]
    fn download_mmdb(url: &str) -> Result<Vec<u8>, RulesError> {
        let url = url.to_string();
        std::thread::spawn(move || {
            let response = reqwest::blocking::get(&url)
                .map_err(|e| RulesError::Http(format!("GET {url}: {e}")))?;
            if !response.status().is_success() {
                return Err(RulesError::Http(format!(
                    "GET {url}: HTTP {}",
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .map_err(|e| RulesError::Http(format!("reading response from {url}: {e}")))?;
            Ok(bytes.to_vec())
        })
        .join()
        .unwrap_or_else(|_| Err(RulesError::Http("download thread panicked".into())))
    }

    /// Write the cache file atomically (write to `.tmp`, then rename).
    fn write_cache(path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("mmdb.tmp");
        std::fs::write(&tmp_path, data)?;
        #[cfg(target_os = "windows")]
        {
            let _ = std::fs::remove_file(path);
        }
        std::fs::rename(&tmp_path, path)
    }

    /// Opens a GeoIP database on first use and hands out the shared
    /// instance afterwards.
    ///
    /// When the file is missing and a download URL is set, the database is
    /// fetched once and cached at `path`. A failed load is not remembered,
    /// so a later call retries.
    pub struct GeoipLoader {
        path: PathBuf,
        url: Option<String>,
        source: Box<dyn GeoipSource>,
        db: Mutex<Option<Arc<dyn CountryLookup>>>,
    }

    impl GeoipLoader {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self::with_source(path, MaxmindSource)
        }

        pub fn with_source(path: impl Into<PathBuf>, source: impl GeoipSource + 'static) -> Self {
            Self {
                path: path.into(),
                url: None,
                source: Box::new(source),
                db: Mutex::new(None),
            }
        }

        /// Download from `url` when the database file does not exist.
        pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
            self.url = Some(url.into()).filter(|u: &String| !u.is_empty());
            self
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn download_url(&self) -> Option<&str> {
            self.url.as_deref()
        }

        /// Return the loaded database, opening or downloading it if needed.
        ///
        /// Concurrent callers wait on the same lock, so the database is
        /// read at most once.
        pub fn load(&self) -> Result<Arc<dyn CountryLookup>, RulesError> {
            let mut slot = self.db.lock();
            if let Some(db) = slot.as_ref() {
                return Ok(Arc::clone(db));
            }
            let db = match &self.url {
                Some(url) if !self.path.exists() => self.download(url)?,
                _ => {
                    let db = self.source.open(&self.path)?;
                    info!(path = %self.path.display(), "loaded GeoIP database");
                    db
                }
            };
            *slot = Some(Arc::clone(&db));
            Ok(db)
        }

        fn download(&self, url: &str) -> Result<Arc<dyn CountryLookup>, RulesError> {
            info!(filename = %self.path.display(), url = %url, "downloading GeoIP database");
            let data = self.source.fetch(url).inspect_err(|e| {
                error!(url = %url, error = %e, "failed to download GeoIP database");
            })?;
            if let Err(e) = write_cache(&self.path, &data) {
                warn!(path = %self.path.display(), error = %e, "failed to write GeoIP cache");
            }
            info!(url = %url, bytes = data.len(), "downloaded GeoIP database");
            self.source.parse(data)
        }

        pub fn is_loaded(&self) -> bool {
            self.db.lock().is_some()
        }
    }

    impl std::fmt::Debug for GeoipLoader {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("GeoipLoader")
                .field("path", &self.path)
                .field("url", &self.url)
                .field("loaded", &self.is_loaded())
                .finish()
        }
    }

    #[cfg(test)]
    mod tests {
        use std::sync::Barrier;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        use super::*;

        #[test]
        fn geoip_db_send_sync() {
            fn assert_send_sync<T: Send + Sync>() {}
            assert_send_sync::<GeoipDb>();
            assert_send_sync::<GeoipLoader>();
        }

        #[test]
        fn from_file_missing() {
            let err = GeoipDb::from_file(Path::new("/nonexistent/hyroute/country.mmdb")).unwrap_err();
            assert!(matches!(err, RulesError::GeoIp(_)));
        }

        #[test]
        fn from_bytes_garbage() {
            GeoipDb::from_bytes(b"not a maxmind database".to_vec()).unwrap_err();
        }

        #[test]
        fn loader_failure_is_not_cached() {
            let loader = GeoipLoader::new("/nonexistent/hyroute/country.mmdb");
            loader.load().err().expect("load should fail");
            assert!(!loader.is_loaded());
            loader.load().err().expect("load should fail");
            assert!(!loader.is_loaded());
        }

        struct FixedCountry(&'static str);

        impl CountryLookup for FixedCountry {
            fn country_code(&self, _ip: IpAddr) -> Option<String> {
                Some(self.0.to_string())
            }
        }

        /// Source that counts calls and serves canned data.
        #[derive(Clone, Default)]
        struct CountingSource {
            opens: Arc<AtomicUsize>,
            parses: Arc<AtomicUsize>,
            fetches: Arc<AtomicUsize>,
            fail_fetch: bool,
        }

        impl GeoipSource for CountingSource {
            fn open(&self, _path: &Path) -> Result<Arc<dyn CountryLookup>, RulesError> {
                self.opens.fetch_add(1, Ordering::SeqCst);
                // Widen the window in which a second opener could sneak in.
                std::thread::sleep(Duration::from_millis(20));
                Ok(Arc::new(FixedCountry("DE")))
            }

            fn parse(&self, data: Vec<u8>) -> Result<Arc<dyn CountryLookup>, RulesError> {
                self.parses.fetch_add(1, Ordering::SeqCst);
                assert_eq!(data, b"mmdb bytes");
                Ok(Arc::new(FixedCountry("NL")))
            }

            fn fetch(&self, url: &str) -> Result<Vec<u8>, RulesError> {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                if self.fail_fetch {
                    return Err(RulesError::Http(format!("GET {url}: HTTP 503")));
                }
                Ok(b"mmdb bytes".to_vec())
            }
        }

        #[test]
        fn concurrent_loads_open_once() {
            let source = CountingSource::default();
            let loader = GeoipLoader::with_source("/srv/geo/country.mmdb", source.clone());
            let barrier = Barrier::new(8);

            let dbs: Vec<_> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..8)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            loader.load().unwrap()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            assert_eq!(source.opens.load(Ordering::SeqCst), 1);
            assert!(dbs.iter().all(|db| Arc::ptr_eq(db, &dbs[0])));
            assert_eq!(dbs[0].country_code("192.0.2.1".parse().unwrap()).as_deref(), Some("DE"));
        }

        #[test]
        fn missing_file_is_downloaded_and_cached() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("geo").join("country.mmdb");
            let source = CountingSource::default();
            let loader = GeoipLoader::with_source(&path, source.clone())
                .with_download_url("https://geo.example/country.mmdb");

            let db = loader.load().unwrap();
            assert_eq!(db.country_code("192.0.2.1".parse().unwrap()).as_deref(), Some("NL"));
            assert_eq!(std::fs::read(&path).unwrap(), b"mmdb bytes");
            assert!(!path.with_extension("mmdb.tmp").exists());

            loader.load().unwrap();
            assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
            assert_eq!(source.parses.load(Ordering::SeqCst), 1);
            assert_eq!(source.opens.load(Ordering::SeqCst), 0);

            // The cached file is used from then on.
            let reloaded = GeoipLoader::with_source(&path, source.clone())
                .with_download_url("https://geo.example/country.mmdb");
            reloaded.load().unwrap();
            assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
            assert_eq!(source.opens.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn failed_download_is_retried() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("country.mmdb");
            let source = CountingSource {
                fail_fetch: true,
                ..CountingSource::default()
            };
            let loader = GeoipLoader::with_source(&path, source.clone())
                .with_download_url("https://geo.example/country.mmdb");

            let err = loader.load().err().expect("load should fail");
            assert!(matches!(err, RulesError::Http(_)), "{err}");
            loader.load().err().expect("load should fail");
            assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
            assert!(!path.exists());
            assert!(!loader.is_loaded());
        }

        #[test]
        fn existing_file_is_not_downloaded() {
            let file = tempfile::NamedTempFile::new().unwrap();
            let source = CountingSource::default();
            let loader = GeoipLoader::with_source(file.path(), source.clone())
                .with_download_url("https://geo.example/country.mmdb");
            loader.load().unwrap();
            assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
            assert_eq!(source.opens.load(Ordering::SeqCst), 1);
        }
    }
}

#[cfg(feature = "geoip")]
pub use inner::*;
