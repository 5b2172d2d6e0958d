use anyhow::{Context, Result};
use argp::FromArgs;
use nimscan_core::models::{AggregatedReport, CollectionResults};
use nimscan_jobs::aggregate;
use time::OffsetDateTime;
use typed_path::{Utf8NativePath, Utf8NativePathBuf};

use crate::{
    markdown,
    util::{native_path, read_json, write_json, write_text},
};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Aggregate collected reports into one classification report.
#[argp(subcommand, name = "aggregate")]
pub struct Args {
    #[argp(
        option,
        short = 'i',
        from_str_fn(native_path),
        default = "Utf8NativePathBuf::from(\"reports/collection-results.json\")"
    )]
    /// collection results written by `collect`
    results: Utf8NativePathBuf,
    #[argp(
        option,
        short = 'o',
        from_str_fn(native_path),
        default = "Utf8NativePathBuf::from(\"aggregated-report.json\")"
    )]
    /// write the aggregated report to this file
    output: Utf8NativePathBuf,
    #[argp(option, from_str_fn(native_path))]
    /// also write a markdown summary to this file
    markdown_output: Option<Utf8NativePathBuf>,
}

pub async fn run(args: Args) -> Result<()> {
    let collection: CollectionResults = read_json(&args.results)?;
    let report = aggregate(&collection.results, OffsetDateTime::now_utc())
        .context("Failed to aggregate reports")?;
    write_report(&report, &args.output, args.markdown_output.as_deref())
}

pub fn write_report(
    report: &AggregatedReport,
    output: &Utf8NativePath,
    markdown_output: Option<&Utf8NativePath>,
) -> Result<()> {
    write_json(output, report)?;
    tracing::info!("Wrote {}", output);
    if let Some(path) = markdown_output {
        write_text(path, &markdown::render(report))?;
        tracing::info!("Wrote {}", path);
    }
    for (kind, count) in &report.summary.by_status {
        tracing::info!("  {}: {}", kind, count);
    }
    for (classification, count) in &report.summary.by_classification {
        tracing::info!("  {}: {}", classification, count);
    }
    Ok(())
}
