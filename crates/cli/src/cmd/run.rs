use anyhow::{Context, Result};
use argp::FromArgs;
use nimscan_core::config::check_timeout;
use nimscan_jobs::aggregate;
use time::OffsetDateTime;
use typed_path::Utf8NativePathBuf;

use crate::{
    cmd::{
        DEFAULT_CONFIG, aggregate::write_report, collect, engine, load_config, select_targets,
    },
    util::{native_path, write_json},
};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Trigger, wait, collect and aggregate in one go.
#[argp(subcommand, name = "run")]
pub struct Args {
    #[argp(
        option,
        short = 'c',
        from_str_fn(native_path),
        default = "Utf8NativePathBuf::from(DEFAULT_CONFIG)"
    )]
    /// repository configuration file
    config: Utf8NativePathBuf,
    #[argp(
        option,
        short = 'o',
        from_str_fn(native_path),
        default = "Utf8NativePathBuf::from(\"reports\")"
    )]
    /// directory for the ledger, collected reports and aggregated report
    output_dir: Utf8NativePathBuf,
    #[argp(switch)]
    /// log what would be triggered without calling GitHub
    dry_run: bool,
    #[argp(switch)]
    /// aggregate immediately without waiting for runs to finish
    skip_wait: bool,
    #[argp(option)]
    /// comma-separated owner/repo list replacing the configured repositories
    specific_repos: Option<String>,
    #[argp(option)]
    /// timeout in minutes, applied to every run
    timeout: Option<u64>,
    #[argp(option)]
    /// seconds between status polls
    poll_interval: Option<u64>,
    #[argp(option, from_str_fn(native_path))]
    /// also write a markdown summary to this file
    markdown_output: Option<Utf8NativePathBuf>,
}

pub async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(poll_interval) = args.poll_interval {
        config.settings.poll_interval_seconds = poll_interval;
    }
    let timeout = args.timeout.map(check_timeout).transpose()?;
    let targets = select_targets(&config, args.specific_repos.as_deref())?;
    let engine = engine(config.settings, targets.len(), args.dry_run)?;

    let mut ledger = engine.trigger(&targets, args.dry_run).await;
    write_json(&args.output_dir.join("triggered-runs.json"), &ledger)?;
    if let Some(timeout) = timeout {
        collect::override_timeout(&mut ledger, timeout);
    }
    let (ledger, results) = collect::wait_and_collect(&engine, ledger, args.skip_wait).await;
    collect::write_results(&args.output_dir, &ledger, &results)?;

    let report =
        aggregate(&results, OffsetDateTime::now_utc()).context("Failed to aggregate reports")?;
    write_report(
        &report,
        &args.output_dir.join("aggregated-report.json"),
        args.markdown_output.as_deref(),
    )
}
