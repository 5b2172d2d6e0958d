pub mod artifact;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use http::StatusCode;
use nimscan_core::{
    JobService, ServiceError, ServiceErrorKind, Settings, StartRequest, models::RemoteStatus,
};
use octocrab::{
    Octocrab,
    models::{RunId, workflows::Run},
    params::actions::ArchiveFormat,
};
use tokio::time::sleep;

use crate::artifact::extract_report;

/// GitHub Actions as a job-execution service.
#[derive(Clone)]
pub struct GitHub {
    pub client: Octocrab,
    discovery_attempts: u32,
}

impl GitHub {
    /// Build a client for `token`, or an anonymous one (dry runs only).
    pub fn new(token: Option<String>, settings: &Settings) -> Result<Self> {
        let builder = Octocrab::builder();
        let client = match token {
            Some(token) => builder.personal_token(token).build(),
            None => builder.build(),
        }
        .context("Failed to create GitHub client")?;
        Ok(Self { client, discovery_attempts: settings.run_discovery_attempts.max(1) })
    }

    /// Find the run created by a dispatch.
    ///
    /// Dispatching returns no run id, so the newest `workflow_dispatch` runs
    /// on the branch are searched for one created at or after the request.
    async fn discover_run(&self, request: &StartRequest) -> Result<u64, ServiceError> {
        let (owner, repo) = split_repo(&request.repo)?;
        let not_before = request.not_before.unix_timestamp();
        for attempt in 1..=self.discovery_attempts {
            sleep(Duration::from_secs(1 << attempt)).await;
            let result = self
                .client
                .workflows(owner, repo)
                .list_runs(&request.workflow)
                .branch(&request.branch)
                .event("workflow_dispatch")
                .per_page(10)
                .send()
                .await;
            let runs = match result {
                Ok(page) => page.items,
                Err(e) => {
                    let e = service_error(e, "Failed to list workflow runs");
                    if !e.is_transient() {
                        return Err(e);
                    }
                    tracing::warn!("{}: {}", request.repo, e);
                    continue;
                }
            };
            if let Some(run) = runs.iter().find(|run| run.created_at.timestamp() >= not_before) {
                return Ok(run.id.into_inner());
            }
            tracing::debug!(
                "{}: dispatched run not visible yet (attempt {}/{})",
                request.repo,
                attempt,
                self.discovery_attempts
            );
        }
        // Dispatching again could start a second run.
        Err(ServiceError::permanent(format!(
            "Dispatched {} but no run appeared after {} attempts",
            request.workflow, self.discovery_attempts
        )))
    }
}

#[async_trait]
impl JobService for GitHub {
    async fn start_job(&self, request: &StartRequest) -> Result<u64, ServiceError> {
        let (owner, repo) = split_repo(&request.repo)?;
        self.client
            .actions()
            .create_workflow_dispatch(owner, repo, &request.workflow, &request.branch)
            .inputs(serde_json::to_value(&request.inputs).unwrap_or_default())
            .send()
            .await
            .map_err(|e| service_error(e, "Failed to dispatch workflow"))?;
        tracing::debug!("{}: dispatched {}@{}", request.repo, request.workflow, request.branch);
        self.discover_run(request).await
    }

    async fn get_run_status(&self, repo: &str, run_id: u64) -> Result<RemoteStatus, ServiceError> {
        let (owner, name) = split_repo(repo)?;
        let run = self
            .client
            .workflows(owner, name)
            .get(RunId(run_id))
            .await
            .map_err(|e| service_error(e, "Failed to fetch workflow run"))?;
        Ok(run_status(&run))
    }

    async fn get_artifact(
        &self,
        repo: &str,
        run_id: u64,
        artifact_name: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        let (owner, name) = split_repo(repo)?;
        let page = self
            .client
            .actions()
            .list_workflow_run_artifacts(owner, name, RunId(run_id))
            .send()
            .await
            .map_err(|e| service_error(e, "Failed to fetch artifacts"))?
            .value
            .unwrap_or_default();
        let artifacts = self
            .client
            .all_pages(page)
            .await
            .map_err(|e| service_error(e, "Failed to fetch artifacts"))?;
        let Some(artifact) =
            artifacts.iter().find(|a| !a.expired && a.name.contains(artifact_name))
        else {
            return Err(ServiceError::not_found(format!("No artifact named {artifact_name}")));
        };
        tracing::debug!("{} (run {}): downloading artifact {}", repo, run_id, artifact.name);
        let bytes = self
            .client
            .actions()
            .download_artifact(owner, name, artifact.id, ArchiveFormat::Zip)
            .await
            .map_err(|e| service_error(e, "Failed to download artifact"))?;
        extract_report(&bytes, artifact_name)
            .map_err(|e| ServiceError::permanent(format!("{}: {:#}", artifact.name, e)))
    }
}

fn split_repo(repo: &str) -> Result<(&str, &str), ServiceError> {
    repo.split_once('/')
        .ok_or_else(|| ServiceError::permanent(format!("Invalid repository name {repo}")))
}

fn run_status(run: &Run) -> RemoteStatus { remote_status(&run.status, run.conclusion.as_deref()) }

fn remote_status(status: &str, conclusion: Option<&str>) -> RemoteStatus {
    match (status, conclusion) {
        ("completed", Some("success")) => RemoteStatus::CompletedSuccess,
        ("completed", Some("cancelled")) => RemoteStatus::Cancelled,
        ("completed", _) => RemoteStatus::CompletedFailure,
        ("in_progress", _) => RemoteStatus::InProgress,
        _ => RemoteStatus::Queued,
    }
}

fn status_kind(status: StatusCode) -> ServiceErrorKind {
    match status {
        StatusCode::NOT_FOUND => ServiceErrorKind::NotFound,
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => ServiceErrorKind::Transient,
        s if s.is_server_error() => ServiceErrorKind::Transient,
        _ => ServiceErrorKind::Permanent,
    }
}

fn service_error(err: octocrab::Error, context: &str) -> ServiceError {
    let kind = match &err {
        octocrab::Error::GitHub { source, .. } => status_kind(source.status_code),
        octocrab::Error::Serde { .. } | octocrab::Error::Json { .. } => ServiceErrorKind::Permanent,
        _ => ServiceErrorKind::Transient,
    };
    ServiceError { kind, message: format!("{context}: {err}") }
}
