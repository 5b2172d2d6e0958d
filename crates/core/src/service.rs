use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{error::ServiceError, models::RemoteStatus};

/// A request to start one target's workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    /// `owner/repo`
    pub repo: String,
    pub workflow: String,
    pub branch: String,
    pub inputs: BTreeMap<String, String>,
    /// Runs created before this instant belong to someone else.
    pub not_before: OffsetDateTime,
}

/// The remote job-execution service, reduced to request/response and polling.
///
/// Implementations own the credential; callers never see it.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Start a run and return its identifier.
    async fn start_job(&self, request: &StartRequest) -> Result<u64, ServiceError>;

    async fn get_run_status(&self, repo: &str, run_id: u64) -> Result<RemoteStatus, ServiceError>;

    /// Fetch the decoded payload of the named artifact of a run.
    async fn get_artifact(
        &self,
        repo: &str,
        run_id: u64,
        artifact_name: &str,
    ) -> Result<Vec<u8>, ServiceError>;
}
