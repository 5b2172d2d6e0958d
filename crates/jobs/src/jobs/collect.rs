use std::{collections::BTreeMap, time::Duration};

use nimscan_core::{
    CollectionError, JobService, ServiceError, ServiceErrorKind,
    models::{
        ActionsUsage, CollectionOutcome, MissingReason, RunHandle, RunStatus, ScanReport,
        SupportType,
    },
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::time::sleep;

const DOWNLOAD_RETRIES: u32 = 2;
const DOWNLOAD_BACKOFF: Duration = Duration::from_secs(2);

/// Retrieve and decode the scan report of a finished run.
///
/// Runs that did not succeed yield `MissingArtifact` without any request.
/// `artifact_names` are tried in order; the first one that exists wins.
pub async fn collect(
    service: &dyn JobService,
    handle: &RunHandle,
    artifact_names: &[String],
) -> CollectionOutcome {
    if handle.is_dry_run() {
        return CollectionOutcome::MissingArtifact { reason: MissingReason::DryRun };
    }
    if handle.status != RunStatus::Succeeded {
        return CollectionOutcome::MissingArtifact { reason: MissingReason::Status(handle.status) };
    }
    let repo = &handle.target.name;
    let Some(run_id) = handle.remote_id() else {
        return CollectionOutcome::CollectionError(CollectionError::not_found(
            "succeeded run has no run id",
        ));
    };

    for name in artifact_names {
        match download(service, repo, run_id, name).await {
            Ok(payload) => {
                tracing::info!("{} (run {}): collected {}", repo, run_id, name);
                let collected_at = handle.completed_at.unwrap_or(handle.triggered_at);
                return match decode_report(repo, &payload, collected_at) {
                    Ok(report) => CollectionOutcome::Report(report),
                    Err(e) => {
                        tracing::error!("{} (run {}): invalid {}: {}", repo, run_id, name, e);
                        CollectionOutcome::CollectionError(e)
                    }
                };
            }
            Err(e) if e.kind == ServiceErrorKind::NotFound => {
                tracing::debug!("{} (run {}): no {} artifact", repo, run_id, name);
            }
            Err(e) => {
                tracing::error!("{} (run {}): failed to download {}: {}", repo, run_id, name, e);
                return CollectionOutcome::CollectionError(match e.kind {
                    ServiceErrorKind::Transient => CollectionError::transient(e.message),
                    _ => CollectionError::malformed(e.message),
                });
            }
        }
    }
    tracing::warn!("{} (run {}): no report artifact found", repo, run_id);
    CollectionOutcome::CollectionError(CollectionError::not_found(format!(
        "none of the artifacts {} were found",
        artifact_names.join(", ")
    )))
}

async fn download(
    service: &dyn JobService,
    repo: &str,
    run_id: u64,
    name: &str,
) -> Result<Vec<u8>, ServiceError> {
    let mut attempt = 0;
    loop {
        match service.get_artifact(repo, run_id, name).await {
            Err(e) if e.is_transient() && attempt < DOWNLOAD_RETRIES => {
                let delay = DOWNLOAD_BACKOFF * (1 << attempt);
                attempt += 1;
                tracing::warn!(
                    "{} (run {}): download of {} failed, retrying in {}s: {}",
                    repo,
                    run_id,
                    name,
                    delay.as_secs(),
                    e
                );
                sleep(delay).await;
            }
            result => return result,
        }
    }
}

/// Schema-check a report payload.
///
/// `support_type` and `actions_usage` must be valid values when present.
/// When absent they are derived from the flags of a `summary` object; with
/// neither, the payload is rejected. Everything else is kept as metrics.
pub fn decode_report(
    target: &str,
    payload: &[u8],
    collected_at: OffsetDateTime,
) -> Result<ScanReport, CollectionError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| CollectionError::malformed(format!("invalid JSON: {e}")))?;
    let Value::Object(mut object) = value else {
        return Err(CollectionError::malformed("report is not a JSON object"));
    };
    let summary = match object.get("summary") {
        None => None,
        Some(Value::Object(summary)) => Some(summary.clone()),
        Some(_) => return Err(CollectionError::malformed("summary is not an object")),
    };

    let support_type = match take_field::<SupportType>(&mut object, "support_type")? {
        Some(value) => value,
        None => {
            let (local, hosted) = flags(
                summary.as_ref(),
                "support_type",
                "supports_local_nim",
                "supports_hosted_nim",
            )?;
            SupportType::from_flags(local, hosted)
        }
    };
    let actions_usage = match take_field::<ActionsUsage>(&mut object, "actions_usage")? {
        Some(value) => value,
        None => {
            let (local, hosted) = flags(
                summary.as_ref(),
                "actions_usage",
                "uses_local_nim_in_actions",
                "uses_hosted_nim_in_actions",
            )?;
            ActionsUsage::from_flags(local, hosted)
        }
    };

    Ok(ScanReport {
        target: target.to_string(),
        support_type,
        actions_usage,
        metrics: object.into_iter().collect::<BTreeMap<_, _>>(),
        collected_at,
    })
}

fn take_field<T: DeserializeOwned>(
    object: &mut Map<String, Value>,
    key: &str,
) -> Result<Option<T>, CollectionError> {
    match object.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|_| CollectionError::malformed(format!("invalid {key} value {value}"))),
    }
}

/// Legacy `(local, hosted)` flags standing in for `field`.
///
/// At least one of the two flags must be present; a missing one is false.
fn flags(
    summary: Option<&Map<String, Value>>,
    field: &str,
    local_key: &str,
    hosted_key: &str,
) -> Result<(bool, bool), CollectionError> {
    let missing = || CollectionError::malformed(format!("missing required field {field}"));
    let summary = summary.ok_or_else(missing)?;
    match (flag(summary, local_key)?, flag(summary, hosted_key)?) {
        (None, None) => Err(missing()),
        (local, hosted) => Ok((local.unwrap_or(false), hosted.unwrap_or(false))),
    }
}

fn flag(summary: &Map<String, Value>, key: &str) -> Result<Option<bool>, CollectionError> {
    match summary.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(value) => {
            Err(CollectionError::malformed(format!("summary.{key} is not a bool: {value}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use nimscan_core::{CollectionErrorKind, models::RunId};
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::mock::{MockService, target};

    fn names() -> Vec<String> {
        vec!["nim-scan-report".into(), "docker-image-report".into()]
    }

    fn succeeded(run_id: u64) -> RunHandle {
        let now = OffsetDateTime::now_utc();
        RunHandle {
            target: target("acme/alpha"),
            run_id: Some(RunId::Remote(run_id)),
            triggered_at: now,
            status: RunStatus::Succeeded,
            completed_at: Some(now),
            error: None,
        }
    }

    fn payload(value: Value) -> Vec<u8> { serde_json::to_vec(&value).unwrap() }

    #[tokio::test(start_paused = true)]
    async fn test_not_succeeded_is_missing() {
        let mock = MockService::default();
        for status in [
            RunStatus::Queued,
            RunStatus::InProgress,
            RunStatus::Failed,
            RunStatus::TimedOut,
            RunStatus::TriggerError,
        ] {
            let mut handle = succeeded(1);
            handle.status = status;
            assert_eq!(
                collect(&mock, &handle, &names()).await,
                CollectionOutcome::MissingArtifact { reason: MissingReason::Status(status) }
            );
        }
        let mut dry = succeeded(1);
        dry.run_id = Some(RunId::DryRun("dry-run-acme-alpha".into()));
        assert_eq!(
            collect(&mock, &dry, &names()).await,
            CollectionOutcome::MissingArtifact { reason: MissingReason::DryRun }
        );
        assert_eq!(mock.artifact_calls(), 0);
        assert_eq!(mock.status_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_is_idempotent() {
        let mock = MockService::default();
        mock.on_artifact(1, "nim-scan-report", [Ok(payload(json!({
            "support_type": "both",
            "actions_usage": "both_in_actions",
            "classification": "FULL",
            "metadata": { "repo_name": "acme/alpha" },
        })))]);
        let handle = succeeded(1);
        let first = collect(&mock, &handle, &names()).await;
        let second = collect(&mock, &handle, &names()).await;
        let CollectionOutcome::Report(report) = &first else { panic!("{first:?}") };
        assert_eq!(report.classification(), "BOTH_SUPPORT_BOTH_ACTIONS");
        assert_eq!(report.metrics["classification"], "FULL");
        assert!(!report.metrics.contains_key("support_type"));
        assert_eq!(serde_json::to_vec(&first).unwrap(), serde_json::to_vec(&second).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_artifact() {
        let mock = MockService::default();
        mock.on_artifact(1, "docker-image-report", [Ok(payload(json!({
            "support_type": "local_only",
            "actions_usage": "none_in_actions",
        })))]);
        let outcome = collect(&mock, &succeeded(1), &names()).await;
        let CollectionOutcome::Report(report) = outcome else { panic!("{outcome:?}") };
        assert_eq!(report.classification(), "LOCAL_ONLY_SUPPORT_NONE_ACTIONS");
        assert_eq!(mock.artifact_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_artifact() {
        let mock = MockService::default();
        let outcome = collect(&mock, &succeeded(1), &names()).await;
        let CollectionOutcome::CollectionError(e) = outcome else { panic!("{outcome:?}") };
        assert_eq!(e.kind, CollectionErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_download() {
        let mock = MockService::default();
        mock.on_artifact(1, "nim-scan-report", [
            Err(ServiceError::transient("502")),
            Err(ServiceError::transient("502")),
            Ok(payload(json!({ "support_type": "none", "actions_usage": "none_in_actions" }))),
        ]);
        let start = Instant::now();
        let outcome = collect(&mock, &succeeded(1), &names()).await;
        assert!(matches!(outcome, CollectionOutcome::Report(_)), "{outcome:?}");
        assert!(start.elapsed() >= Duration::from_secs(6));

        let mock = MockService::default();
        mock.on_artifact(2, "nim-scan-report", [Err(ServiceError::transient("502"))]);
        let outcome = collect(&mock, &succeeded(2), &names()).await;
        let CollectionOutcome::CollectionError(e) = outcome else { panic!("{outcome:?}") };
        assert_eq!(e.kind, CollectionErrorKind::Transient);
        assert_eq!(mock.artifact_calls(), 3);
    }

    #[test]
    fn test_decode_missing_actions_usage() {
        let now = OffsetDateTime::now_utc();
        let err = decode_report("acme/alpha", &payload(json!({ "support_type": "both" })), now)
            .unwrap_err();
        assert_eq!(err.kind, CollectionErrorKind::Malformed);
        assert!(err.detail.contains("actions_usage"), "{}", err.detail);
    }

    #[test]
    fn test_decode_rejects_bad_values() {
        let now = OffsetDateTime::now_utc();
        let cases = [
            b"not json".to_vec(),
            payload(json!([1, 2, 3])),
            payload(json!({ "support_type": "sometimes", "actions_usage": "none_in_actions" })),
            payload(json!({ "support_type": "both", "actions_usage": 3 })),
            payload(json!({ "summary": "yes" })),
            payload(json!({ "summary": { "supports_local_nim": "true" } })),
        ];
        for case in cases {
            let err = decode_report("acme/alpha", &case, now).unwrap_err();
            assert_eq!(err.kind, CollectionErrorKind::Malformed, "{}", err.detail);
        }
    }

    #[test]
    fn test_decode_summary_flags() {
        let now = OffsetDateTime::now_utc();
        let report = decode_report(
            "acme/alpha",
            &payload(json!({
                "summary": {
                    "supports_local_nim": true,
                    "supports_hosted_nim": false,
                    "uses_hosted_nim_in_actions": true,
                },
            })),
            now,
        )
        .unwrap();
        assert_eq!(report.support_type, SupportType::LocalOnly);
        assert_eq!(report.actions_usage, ActionsUsage::HostedInActions);
        assert!(report.metrics.contains_key("summary"));

        // Explicit fields win over summary flags.
        let report = decode_report(
            "acme/alpha",
            &payload(json!({
                "support_type": "hosted_only",
                "summary": { "supports_local_nim": true, "uses_local_nim_in_actions": false },
            })),
            now,
        )
        .unwrap();
        assert_eq!(report.support_type, SupportType::HostedOnly);
        assert_eq!(report.actions_usage, ActionsUsage::NoneInActions);
    }

    #[test]
    fn test_decode_summary_without_flags() {
        let now = OffsetDateTime::now_utc();
        let cases = [
            (json!({ "support_type": "both", "summary": {} }), "actions_usage"),
            (
                json!({ "support_type": "both", "summary": { "supports_local_nim": true } }),
                "actions_usage",
            ),
            (json!({ "actions_usage": "none_in_actions", "summary": {} }), "support_type"),
            (
                json!({ "actions_usage": "none_in_actions", "summary": { "other": true } }),
                "support_type",
            ),
        ];
        for (value, field) in cases {
            let err = decode_report("acme/alpha", &payload(value), now).unwrap_err();
            assert_eq!(err.kind, CollectionErrorKind::Malformed);
            assert_eq!(err.detail, format!("missing required field {field}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_artifact() {
        let mock = MockService::default();
        mock.on_artifact(1, "nim-scan-report", [Ok(payload(json!({ "support_type": "both" })))]);
        let outcome = collect(&mock, &succeeded(1), &names()).await;
        let CollectionOutcome::CollectionError(e) = outcome else { panic!("{outcome:?}") };
        assert_eq!(e.kind, CollectionErrorKind::Malformed);
    }
}
