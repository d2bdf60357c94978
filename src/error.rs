//! Error taxonomy for the acquisition and translation core.
//!
//! Every error is `Clone` so the result of a shared in-flight operation can
//! be handed to each caller that joined it.

use crate::package::LanguageCode;
use thiserror::Error;

/// The package catalog could not be fetched or parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("package index unavailable: {0}")]
pub struct IndexError(pub String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstallError {
    /// Network failure or bad HTTP status. A later request may retry.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// Size/hash mismatch or an unusable archive.
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    #[error("disk write failed: {0}")]
    DiskWriteFailed(String),

    /// The install task panicked or was aborted.
    #[error("install interrupted: {0}")]
    Interrupted(String),
}

impl From<tokio::task::JoinError> for InstallError {
    fn from(err: tokio::task::JoinError) -> Self {
        InstallError::Interrupted(err.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error(transparent)]
    IndexUnavailable(#[from] IndexError),

    #[error("no translation path available: {from} -> {to}")]
    NoPathAvailable { from: LanguageCode, to: LanguageCode },

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("request cancelled while waiting for package installation")]
    Cancelled,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslateError {
    /// The on-disk package is corrupt or not runnable.
    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// The model load task panicked or was aborted.
    #[error("model load interrupted: {0}")]
    Interrupted(String),

    #[error("request cancelled while waiting for translation")]
    Cancelled,
}

impl From<tokio::task::JoinError> for TranslateError {
    fn from(err: tokio::task::JoinError) -> Self {
        TranslateError::Interrupted(err.to_string())
    }
}

/// Everything a translation request can fail with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Translate(#[from] TranslateError),
}

impl ServiceError {
    /// Stable snake_case name reported to clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::Acquisition(err) => match err {
                AcquisitionError::IndexUnavailable(_) => "index_unavailable",
                AcquisitionError::NoPathAvailable { .. } => "no_path_available",
                AcquisitionError::Install(InstallError::DownloadFailed(_)) => "download_failed",
                AcquisitionError::Install(InstallError::IntegrityCheckFailed(_)) => {
                    "integrity_check_failed"
                }
                AcquisitionError::Install(InstallError::DiskWriteFailed(_)) => "disk_write_failed",
                AcquisitionError::Install(InstallError::Interrupted(_)) => "install_interrupted",
                AcquisitionError::Cancelled => "cancelled",
            },
            ServiceError::Translate(err) => match err {
                TranslateError::ModelLoadFailed(_) => "model_load_failed",
                TranslateError::InferenceFailed(_) => "inference_failed",
                TranslateError::Interrupted(_) => "model_load_interrupted",
                TranslateError::Cancelled => "translate_cancelled",
            },
        }
    }
}
