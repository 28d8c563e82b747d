use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that end processing of a single queue entry (or a single
/// container unit). None of these stop the worker loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("package {path} is unreadable: {reason}")]
    PackageUnreadable { path: String, reason: String },

    #[error("manifest is malformed: {0}")]
    ManifestMalformed(String),

    #[error("failed to select install target {device}: {source}")]
    DeviceTargetFailed {
        device: String,
        #[source]
        source: GatewayError,
    },

    #[error("failed to begin install of {path}: {source}")]
    InstallBeginFailed {
        path: String,
        #[source]
        source: GatewayError,
    },

    #[error("staging area {} could not be prepared: {source}", path.display())]
    StagingFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    pub fn unreadable(path: &str, reason: impl ToString) -> Self {
        Self::PackageUnreadable {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Rejections surfaced synchronously to the caller of `enqueue`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("install queue is full ({capacity} entries)")]
    QueueFull { capacity: usize },

    #[error("{0} is already queued or installing")]
    DuplicateEntry(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl GatewayError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}
