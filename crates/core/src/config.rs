use std::{collections::HashSet, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, util::normalize_repo_name};

/// Longest accepted run timeout: five weeks.
pub const MAX_TIMEOUT_MINUTES: u64 = 35 * 24 * 60;

/// Reject timeouts beyond [`MAX_TIMEOUT_MINUTES`].
pub fn check_timeout(minutes: u64) -> Result<u64, ConfigError> {
    if minutes > MAX_TIMEOUT_MINUTES {
        return Err(ConfigError::InvalidTimeout(minutes));
    }
    Ok(minutes)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub default_branch: String,
    pub default_workflow: String,
    pub timeout_minutes: u64,
    pub poll_interval_seconds: u64,
    pub max_concurrency: usize,
    pub requests_per_second: f64,
    pub trigger_retries: u32,
    pub trigger_backoff_seconds: u64,
    pub run_discovery_attempts: u32,
    pub artifact_name: String,
    pub fallback_artifacts: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            default_workflow: "ci.yml".to_string(),
            timeout_minutes: 60,
            poll_interval_seconds: 30,
            max_concurrency: 10,
            requests_per_second: 5.0,
            trigger_retries: 2,
            trigger_backoff_seconds: 2,
            run_discovery_attempts: 5,
            artifact_name: "nim-scan-report".to_string(),
            fallback_artifacts: vec![
                "docker-image-report".to_string(),
                "hosted-nim-report".to_string(),
            ],
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_interval_seconds) }

    /// Timeout applied to `target`, honoring its override.
    pub fn timeout_for(&self, target: &TargetSpec) -> Duration {
        let minutes = target.timeout_minutes.unwrap_or(self.timeout_minutes);
        Duration::from_secs(minutes.saturating_mul(60))
    }

    /// Artifact names to look for, most preferred first.
    pub fn artifact_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.artifact_name.as_str())
            .chain(self.fallback_artifacts.iter().map(String::as_str))
    }
}

/// Excluded paths, written either as a comma list or a YAML list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExcludeDirs {
    List(Vec<String>),
    Joined(String),
}

impl Default for ExcludeDirs {
    fn default() -> Self { Self::List(Vec::new()) }
}

impl ExcludeDirs {
    pub fn to_vec(&self) -> Vec<String> {
        let items: Box<dyn Iterator<Item = &str>> = match self {
            Self::List(items) => Box::new(items.iter().map(String::as_str)),
            Self::Joined(joined) => Box::new(joined.split(',')),
        };
        items.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepoConfig {
    pub name: String,
    pub workflow_file: Option<String>,
    pub branch: Option<String>,
    #[serde(default)]
    pub exclude_dirs: ExcludeDirs,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub timeout_minutes: Option<u64>,
}

fn default_enabled() -> bool { true }

/// A scannable repository, fully resolved against the global settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TargetSpec {
    /// `owner/repo`
    pub name: String,
    pub workflow: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_dirs: Vec<String>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
}

impl TargetSpec {
    pub fn owner_repo(&self) -> (&str, &str) {
        self.name.split_once('/').unwrap_or(("", self.name.as_str()))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(data)?;
        check_timeout(config.settings.timeout_minutes)?;
        for repo in &config.repos {
            if let Some(minutes) = repo.timeout_minutes {
                check_timeout(minutes)?;
            }
        }
        Ok(config)
    }

    /// Enabled configured targets, in file order.
    pub fn targets(&self) -> Result<Vec<TargetSpec>, ConfigError> {
        let mut targets = Vec::new();
        for repo in &self.repos {
            if !repo.enabled {
                tracing::debug!("Skipping disabled repository {}", repo.name);
                continue;
            }
            targets.push(self.resolve(
                &repo.name,
                repo.workflow_file.as_deref(),
                repo.branch.as_deref(),
                repo.exclude_dirs.to_vec(),
                repo.timeout_minutes,
            )?);
        }
        check_unique(&targets)?;
        Ok(targets)
    }

    /// Ad-hoc targets from a comma-separated list, replacing the configured ones.
    pub fn ad_hoc_targets(&self, names: &str) -> Result<Vec<TargetSpec>, ConfigError> {
        let targets = names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| self.resolve(name, None, None, Vec::new(), None))
            .collect::<Result<Vec<_>, _>>()?;
        check_unique(&targets)?;
        Ok(targets)
    }

    fn resolve(
        &self,
        name: &str,
        workflow: Option<&str>,
        branch: Option<&str>,
        exclude_dirs: Vec<String>,
        timeout_minutes: Option<u64>,
    ) -> Result<TargetSpec, ConfigError> {
        let name = normalize_repo_name(name).ok_or_else(|| ConfigError::InvalidRepo(name.into()))?;
        let target = TargetSpec {
            workflow: workflow.unwrap_or(&self.settings.default_workflow).trim().to_string(),
            branch: branch.unwrap_or(&self.settings.default_branch).trim().to_string(),
            exclude_dirs,
            enabled: true,
            timeout_minutes,
            name,
        };
        if target.workflow.is_empty() || target.branch.is_empty() {
            return Err(ConfigError::IncompleteTarget(target.name));
        }
        Ok(target)
    }
}

fn check_unique(targets: &[TargetSpec]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for target in targets {
        if !seen.insert(target.name.as_str()) {
            return Err(ConfigError::DuplicateRepo(target.name.clone()));
        }
    }
    Ok(())
}
