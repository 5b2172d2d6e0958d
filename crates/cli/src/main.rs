mod cmd;
mod markdown;
mod util;

use argp::FromArgs;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Trigger NIM scan workflows across repositories and aggregate their reports.
struct TopLevel {
    #[argp(subcommand)]
    command: SubCommand,
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
#[argp(subcommand)]
enum SubCommand {
    Trigger(cmd::trigger::Args),
    Collect(cmd::collect::Args),
    Aggregate(cmd::aggregate::Args),
    Run(cmd::run::Args),
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(env_filter))
        .init();

    let args: TopLevel = argp::parse_args_or_exit(argp::DEFAULT);
    let result = match args.command {
        SubCommand::Trigger(args) => cmd::trigger::run(args).await,
        SubCommand::Collect(args) => cmd::collect::run(args).await,
        SubCommand::Aggregate(args) => cmd::aggregate::run(args).await,
        SubCommand::Run(args) => cmd::run::run(args).await,
    };
    if let Err(e) = result {
        tracing::error!("{:?}", e);
        std::process::exit(1);
    }
}
