use std::{collections::BTreeMap, time::Duration};

use nimscan_core::{
    JobService, StartRequest, TargetSpec, TriggerError,
    models::{RunHandle, RunId, RunStatus},
    util::repo_slug,
};
use time::OffsetDateTime;
use tokio::time::sleep;

/// Issue one start request for `target`.
///
/// Dry runs produce a QUEUED handle with a synthetic identifier without
/// touching the service.
pub async fn trigger(
    service: &dyn JobService,
    target: &TargetSpec,
    dry_run: bool,
) -> Result<RunHandle, TriggerError> {
    if !target.enabled {
        return Err(TriggerError { transient: false, message: "target is disabled".into() });
    }
    if target.workflow.is_empty() || target.branch.is_empty() {
        return Err(TriggerError {
            transient: false,
            message: "workflow and branch must be set".into(),
        });
    }
    let triggered_at = OffsetDateTime::now_utc();
    if dry_run {
        tracing::info!(
            "[DRY RUN] Would trigger {} on {}@{}",
            target.workflow,
            target.name,
            target.branch
        );
        return Ok(RunHandle {
            target: target.clone(),
            run_id: Some(RunId::DryRun(format!("dry-run-{}", repo_slug(&target.name)))),
            triggered_at,
            status: RunStatus::Queued,
            completed_at: None,
            error: None,
        });
    }

    let mut inputs = BTreeMap::new();
    if !target.exclude_dirs.is_empty() {
        inputs.insert("exclude_dirs".to_string(), target.exclude_dirs.join(","));
    }
    let request = StartRequest {
        repo: target.name.clone(),
        workflow: target.workflow.clone(),
        branch: target.branch.clone(),
        inputs,
        not_before: triggered_at,
    };
    let run_id = service.start_job(&request).await?;
    tracing::info!(
        "Triggered {} on {}@{} (run {})",
        target.workflow,
        target.name,
        target.branch,
        run_id
    );
    Ok(RunHandle {
        target: target.clone(),
        run_id: Some(RunId::Remote(run_id)),
        triggered_at,
        status: RunStatus::Queued,
        completed_at: None,
        error: None,
    })
}

/// Trigger `target`, retrying transient failures `retries` times with
/// exponential backoff starting at `backoff`.
///
/// Never fails: a target that cannot be started gets a TRIGGER_ERROR handle.
pub async fn trigger_with_retry(
    service: &dyn JobService,
    target: &TargetSpec,
    dry_run: bool,
    retries: u32,
    backoff: Duration,
) -> RunHandle {
    let mut attempt = 0;
    loop {
        match trigger(service, target, dry_run).await {
            Ok(handle) => return handle,
            Err(e) if e.transient && attempt < retries => {
                let delay = backoff * (1 << attempt);
                attempt += 1;
                tracing::warn!(
                    "Failed to trigger {}, retrying in {}s (attempt {}/{}): {}",
                    target.name,
                    delay.as_secs(),
                    attempt,
                    retries,
                    e.message
                );
                sleep(delay).await;
            }
            Err(e) => {
                tracing::error!("Failed to trigger {}: {}", target.name, e);
                return RunHandle {
                    target: target.clone(),
                    run_id: None,
                    triggered_at: OffsetDateTime::now_utc(),
                    status: RunStatus::TriggerError,
                    completed_at: None,
                    error: Some(e.to_string()),
                };
            }
        }
    }
}
