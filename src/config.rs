use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INDEX_URL: &str =
    "https://raw.githubusercontent.com/argosopentech/argospm-index/main/index.json";

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Package store
    pub package_dir: PathBuf,

    // Catalog: a local manifest file wins over the URL
    pub package_index_url: String,
    pub package_index_file: Option<PathBuf>,

    // Routing
    pub pivot_language: String,

    // Timeouts
    pub request_timeout: Duration,
    pub download_timeout: Duration,

    // Inference sidecar for packages that ship a `model/` directory
    pub inference_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT", 5100)?,

            package_dir: std::env::var("PACKAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./packages")),

            package_index_url: std::env::var("PACKAGE_INDEX_URL")
                .unwrap_or_else(|_| DEFAULT_INDEX_URL.to_string()),
            package_index_file: non_empty_var("PACKAGE_INDEX_FILE").map(PathBuf::from),

            pivot_language: non_empty_var("PIVOT_LANGUAGE").unwrap_or_else(|| "en".to_string()),

            request_timeout: Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", 600)?),
            download_timeout: Duration::from_secs(parse_var("DOWNLOAD_TIMEOUT_SECS", 1800)?),

            inference_url: non_empty_var("INFERENCE_URL"),
        })
    }

    /// Defaults for a given package directory, used by tests and embedders.
    pub fn with_package_dir(package_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5100,
            package_dir: package_dir.into(),
            package_index_url: DEFAULT_INDEX_URL.to_string(),
            package_index_file: None,
            pivot_language: "en".to_string(),
            request_timeout: Duration::from_secs(600),
            download_timeout: Duration::from_secs(1800),
            inference_url: None,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(name) {
        Some(value) => value
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", name, value)),
        None => Ok(default),
    }
}
