// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Manifest decode error: {0}")]
    ManifestError(#[from] serde_yaml::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid queue key: {0}")]
    InvalidKey(String),

    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    #[error("Invalid Helm release: {0}")]
    InvalidRelease(String),

    #[error("Unsupported kind: {0}")]
    UnsupportedKind(String),

    #[error("Helm operation failed: {0}")]
    HelmError(String),

    #[error("Notification rejected: {0}")]
    NotifyError(String),

    #[error("Handler panicked: {0}")]
    HandlerPanic(String),
}

impl ControllerError {
    /// Whether the Kubernetes API answered 404 for this request.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::KubeError(kube::Error::Api(err)) if err.code == 404)
    }

    /// Whether an optimistic-concurrency update lost against another writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::KubeError(kube::Error::Api(err)) if err.code == 409)
    }

    /// Errors that no amount of retrying can fix. The queue forgets these right away.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ControllerError::InvalidKey(_)
                | ControllerError::InvalidAnnotation(_)
                | ControllerError::InvalidRelease(_)
                | ControllerError::UnsupportedKind(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
