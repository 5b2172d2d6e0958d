use anyhow::Result;
use argp::FromArgs;
use typed_path::Utf8NativePathBuf;

use crate::{
    cmd::{DEFAULT_CONFIG, engine, load_config, select_targets},
    util::{native_path, write_json},
};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Trigger the scan workflow in every configured repository.
#[argp(subcommand, name = "trigger")]
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
        default = "Utf8NativePathBuf::from(\"triggered-runs.json\")"
    )]
    /// write the run ledger to this file
    output: Utf8NativePathBuf,
    #[argp(switch)]
    /// log what would be triggered without calling GitHub
    dry_run: bool,
    #[argp(option)]
    /// comma-separated owner/repo list replacing the configured repositories
    specific_repos: Option<String>,
}

pub async fn run(args: Args) -> Result<()> {
    let config = load_config(&args.config)?;
    let targets = select_targets(&config, args.specific_repos.as_deref())?;
    let engine = engine(config.settings, targets.len(), args.dry_run)?;
    let ledger = engine.trigger(&targets, args.dry_run).await;
    write_json(&args.output, &ledger)?;
    tracing::info!("Wrote {}", args.output);
    Ok(())
}
