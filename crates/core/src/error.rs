use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a request to the job-execution service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    /// Worth repeating later: network failure, rate limit, server error.
    Transient,
    /// Repeating the same request will fail the same way.
    Permanent,
    /// The requested run or artifact does not exist.
    NotFound,
}

/// Error returned by a [`JobService`](crate::service::JobService) call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { kind: ServiceErrorKind::Transient, message: message.into() }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self { kind: ServiceErrorKind::Permanent, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { kind: ServiceErrorKind::NotFound, message: message.into() }
    }

    pub fn is_transient(&self) -> bool { self.kind == ServiceErrorKind::Transient }
}

/// Failure to start a target's workflow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("trigger failed (transient: {transient}): {message}")]
pub struct TriggerError {
    pub transient: bool,
    pub message: String,
}

impl From<ServiceError> for TriggerError {
    fn from(err: ServiceError) -> Self {
        Self { transient: err.is_transient(), message: err.message }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionErrorKind {
    /// The artifact was found but did not match the report schema.
    Malformed,
    /// The run succeeded but produced no usable artifact.
    NotFound,
    /// Downloading the artifact kept failing.
    Transient,
}

/// Failure to turn a successful run into a [`ScanReport`](crate::models::ScanReport).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?}: {detail}")]
pub struct CollectionError {
    pub kind: CollectionErrorKind,
    pub detail: String,
}

impl CollectionError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self { kind: CollectionErrorKind::Malformed, detail: detail.into() }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self { kind: CollectionErrorKind::NotFound, detail: detail.into() }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self { kind: CollectionErrorKind::Transient, detail: detail.into() }
    }
}

/// The per-target accounting of an aggregated report does not add up.
///
/// Always a bug in the aggregator, never caused by remote data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "aggregation invariant violated: total_repos={total_repos}, classified={classified}, \
     by_status={by_status}"
)]
pub struct AggregationInvariantError {
    pub total_repos: usize,
    pub classified: usize,
    pub by_status: usize,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid repository name {0:?}, expected owner/repo")]
    InvalidRepo(String),
    #[error("Repository {0} has an empty workflow or branch")]
    IncompleteTarget(String),
    #[error("Duplicate repository {0}")]
    DuplicateRepo(String),
    #[error("Timeout of {0} minutes is out of range")]
    InvalidTimeout(u64),
}
