use std::{collections::BTreeMap, fmt::Write};

use nimscan_core::models::{AggregatedReport, RepositoryDetail};
use time::format_description::well_known::Rfc3339;

/// Render the aggregated report as markdown.
///
/// Sections follow the report structure; repositories keep their order.
pub fn render(report: &AggregatedReport) -> String {
    let mut out = String::new();
    let generated = report.metadata.aggregation_time.format(&Rfc3339).unwrap_or_default();
    let summary = &report.summary;
    let _ = writeln!(out, "# NIM Scan Report\n");
    let _ = writeln!(out, "Generated: {generated}\n");
    let _ = writeln!(out, "- Total repositories: {}", report.metadata.total_repos);
    let _ = writeln!(out, "- Successful scans: {}\n", report.metadata.successful_scans);

    let support_types = counts(&summary.by_support_type, |k| k.as_str());
    table(&mut out, "By Support Type", "Support Type", support_types);
    let actions_usage = counts(&summary.by_actions_usage, |k| k.as_str());
    table(&mut out, "By Actions Usage", "Actions Usage", actions_usage);
    let classifications = counts(&summary.by_classification, String::as_str);
    table(&mut out, "By Classification", "Classification", classifications);
    table(&mut out, "By Status", "Status", counts(&summary.by_status, |k| k.as_str()));

    let _ = writeln!(out, "## Repository Details\n");
    for repo in &report.repositories {
        repository(&mut out, repo);
    }
    out
}

fn counts<K>(map: &BTreeMap<K, usize>, label: impl Fn(&K) -> &str) -> Vec<(&str, usize)> {
    map.iter().map(|(k, &count)| (label(k), count)).collect()
}

fn table(out: &mut String, title: &str, column: &str, rows: Vec<(&str, usize)>) {
    let _ = writeln!(out, "## {title}\n");
    if rows.is_empty() {
        let _ = writeln!(out, "_None_\n");
        return;
    }
    let _ = writeln!(out, "| {column} | Count |");
    let _ = writeln!(out, "|---|---:|");
    for (key, count) in rows {
        let _ = writeln!(out, "| {key} | {count} |");
    }
    out.push('\n');
}

fn repository(out: &mut String, repo: &RepositoryDetail) {
    let _ = writeln!(out, "### {}\n", repo.name);
    let _ = writeln!(out, "- Workflow: `{}` on `{}`", repo.workflow, repo.branch);
    let _ = writeln!(out, "- Outcome: {}", repo.outcome);
    if let Some(classification) = &repo.classification {
        let _ = writeln!(out, "- Classification: {classification}");
    }
    if let Some(support_type) = repo.support_type {
        let _ = writeln!(out, "- Support type: {}", support_type.as_str());
    }
    if let Some(actions_usage) = repo.actions_usage {
        let _ = writeln!(out, "- Actions usage: {}", actions_usage.as_str());
    }
    if let Some(detail) = &repo.detail {
        let _ = writeln!(out, "- Detail: {detail}");
    }
    out.push('\n');
}
