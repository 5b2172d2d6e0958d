use nimscan_core::{
    AggregationInvariantError,
    models::{
        AggregatedReport, CollectedTarget, CollectionOutcome, MissingReason, OutcomeKind,
        RepositoryDetail, ReportMetadata, ReportSummary,
    },
};
use time::OffsetDateTime;

/// Fold per-target outcomes into one report.
///
/// Summary counts only depend on the multiset of outcomes; the detail list
/// keeps the input order. Targets without a valid report are counted under
/// `by_status` and never reach the classification counters.
pub fn aggregate(
    results: &[CollectedTarget],
    aggregation_time: OffsetDateTime,
) -> Result<AggregatedReport, AggregationInvariantError> {
    let mut summary = ReportSummary::default();
    let mut repositories = Vec::with_capacity(results.len());
    for CollectedTarget { target, outcome } in results {
        let kind = outcome.kind();
        let mut detail = RepositoryDetail {
            name: target.name.clone(),
            workflow: target.workflow.clone(),
            branch: target.branch.clone(),
            outcome: kind,
            classification: None,
            support_type: None,
            actions_usage: None,
            detail: None,
            metrics: Default::default(),
        };
        match outcome {
            CollectionOutcome::Report(report) => {
                let key = report.classification();
                *summary.by_support_type.entry(report.support_type).or_default() += 1;
                *summary.by_actions_usage.entry(report.actions_usage).or_default() += 1;
                *summary.by_classification.entry(key.to_string()).or_default() += 1;
                detail.classification = Some(key.to_string());
                detail.support_type = Some(report.support_type);
                detail.actions_usage = Some(report.actions_usage);
                detail.metrics = report.metrics.clone();
            }
            CollectionOutcome::MissingArtifact { reason } => {
                *summary.by_status.entry(kind).or_default() += 1;
                detail.detail = Some(match reason {
                    MissingReason::DryRun => "dry run".to_string(),
                    MissingReason::Status(status) => format!("run status {status}"),
                });
            }
            CollectionOutcome::CollectionError(e) => {
                *summary.by_status.entry(kind).or_default() += 1;
                detail.detail = Some(e.to_string());
            }
        }
        repositories.push(detail);
    }

    let classified = repositories.iter().filter(|r| r.outcome == OutcomeKind::Classified).count();
    let report = AggregatedReport {
        metadata: ReportMetadata {
            aggregation_time,
            total_repos: results.len(),
            successful_scans: classified,
        },
        summary,
        repositories,
    };
    check_invariants(&report)?;
    tracing::info!(
        "Aggregated {} repositories: {} classified, {} without report",
        report.metadata.total_repos,
        classified,
        report.metadata.total_repos - classified
    );
    Ok(report)
}

fn check_invariants(report: &AggregatedReport) -> Result<(), AggregationInvariantError> {
    let summary = &report.summary;
    let classified: usize = summary.by_classification.values().sum();
    let by_status: usize = summary.by_status.values().sum();
    let consistent = report.metadata.total_repos == classified + by_status
        && report.metadata.successful_scans == classified
        && summary.by_support_type.values().sum::<usize>() == classified
        && summary.by_actions_usage.values().sum::<usize>() == classified
        && !summary.by_status.contains_key(&OutcomeKind::Classified);
    if consistent {
        Ok(())
    } else {
        Err(AggregationInvariantError {
            total_repos: report.metadata.total_repos,
            classified,
            by_status,
        })
    }
}
