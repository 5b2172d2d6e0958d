pub mod aggregate;
pub mod collect;
pub mod run;
pub mod trigger;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result, bail};
use nimscan_core::{Config, Settings, TargetSpec};
use nimscan_github::GitHub;
use nimscan_jobs::Engine;
use typed_path::Utf8NativePath;

pub const DEFAULT_CONFIG: &str = "config/repos.yaml";

pub fn load_config(path: &Utf8NativePath) -> Result<Config> {
    Config::load(Path::new(path.as_str())).with_context(|| format!("Failed to load {}", path))
}

/// Configured targets, or ad-hoc ones when `specific_repos` is given.
pub fn select_targets(config: &Config, specific_repos: Option<&str>) -> Result<Vec<TargetSpec>> {
    let targets = match specific_repos {
        Some(names) => config.ad_hoc_targets(names)?,
        None => config.targets()?,
    };
    if targets.is_empty() {
        bail!("No enabled repositories to scan");
    }
    Ok(targets)
}

/// `GITHUB_TOKEN`, falling back to `BP_GITHUB_TOKEN`.
fn token() -> Option<String> {
    ["GITHUB_TOKEN", "BP_GITHUB_TOKEN"]
        .into_iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|token| !token.is_empty())
}

pub fn engine(settings: Settings, targets: usize, dry_run: bool) -> Result<Engine> {
    let token = token();
    if token.is_none() && !dry_run {
        bail!("GITHUB_TOKEN or BP_GITHUB_TOKEN must be set");
    }
    let github = GitHub::new(token, &settings)?;
    Ok(Engine::new(Arc::new(github), settings, targets))
}
