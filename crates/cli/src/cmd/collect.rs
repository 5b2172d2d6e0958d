use std::path::Path;

use anyhow::Result;
use argp::FromArgs;
use nimscan_core::{
    Settings,
    config::check_timeout,
    models::{CollectedTarget, CollectionOutcome, CollectionResults, RunLedger},
    util::repo_slug,
};
use nimscan_jobs::Engine;
use time::OffsetDateTime;
use typed_path::{Utf8NativePath, Utf8NativePathBuf};

use crate::{
    cmd::{DEFAULT_CONFIG, engine, load_config},
    util::{native_path, read_json, write_json},
};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Wait for triggered runs and collect their scan reports.
#[argp(subcommand, name = "collect")]
pub struct Args {
    #[argp(
        option,
        short = 'c',
        from_str_fn(native_path),
        default = "Utf8NativePathBuf::from(DEFAULT_CONFIG)"
    )]
    /// repository configuration file (settings only; defaults apply if missing)
    config: Utf8NativePathBuf,
    #[argp(
        option,
        short = 'r',
        from_str_fn(native_path),
        default = "Utf8NativePathBuf::from(\"triggered-runs.json\")"
    )]
    /// run ledger written by `trigger`
    runs_file: Utf8NativePathBuf,
    #[argp(
        option,
        short = 'o',
        from_str_fn(native_path),
        default = "Utf8NativePathBuf::from(\"reports\")"
    )]
    /// directory for collected reports
    output_dir: Utf8NativePathBuf,
    #[argp(option)]
    /// timeout in minutes, applied to every run
    timeout: Option<u64>,
    #[argp(option)]
    /// seconds between status polls
    poll_interval: Option<u64>,
    #[argp(switch)]
    /// collect immediately without waiting for runs to finish
    skip_wait: bool,
}

pub async fn run(args: Args) -> Result<()> {
    let mut settings = if Path::new(args.config.as_str()).exists() {
        load_config(&args.config)?.settings
    } else {
        tracing::warn!("{} not found, using default settings", args.config);
        Settings::default()
    };
    if let Some(poll_interval) = args.poll_interval {
        settings.poll_interval_seconds = poll_interval;
    }
    let mut ledger: RunLedger = read_json(&args.runs_file)?;
    tracing::info!("Loaded {} runs from {}", ledger.runs.len(), args.runs_file);
    if let Some(timeout) = args.timeout {
        override_timeout(&mut ledger, check_timeout(timeout)?);
    }

    let engine = engine(settings, ledger.runs.len(), ledger.dry_run)?;
    let (ledger, results) = wait_and_collect(&engine, ledger, args.skip_wait).await;
    write_results(&args.output_dir, &ledger, &results)?;
    Ok(())
}

/// `minutes` must already have passed [`check_timeout`].
pub fn override_timeout(ledger: &mut RunLedger, minutes: u64) {
    for handle in &mut ledger.runs {
        handle.target.timeout_minutes = Some(minutes);
    }
}

pub async fn wait_and_collect(
    engine: &Engine,
    ledger: RunLedger,
    skip_wait: bool,
) -> (RunLedger, Vec<CollectedTarget>) {
    let ledger = if skip_wait {
        tracing::info!("Skipping wait, runs are left queued");
        ledger
    } else {
        engine.wait(ledger).await
    };
    let results = engine.collect(&ledger).await;
    (ledger, results)
}

/// Write each collected report, the final ledger and every target's outcome
/// under `output_dir`.
pub fn write_results(
    output_dir: &Utf8NativePath,
    ledger: &RunLedger,
    results: &[CollectedTarget],
) -> Result<()> {
    for result in results {
        if let CollectionOutcome::Report(report) = &result.outcome {
            let path = output_dir.join(repo_slug(&result.target.name)).join("nim-scan-report.json");
            write_json(&path, report)?;
        }
    }
    write_json(&output_dir.join("runs.json"), ledger)?;
    let path = output_dir.join("collection-results.json");
    let collection =
        CollectionResults { collection_time: OffsetDateTime::now_utc(), results: results.to_vec() };
    write_json(&path, &collection)?;
    tracing::info!("Wrote {}", path);
    Ok(())
}
