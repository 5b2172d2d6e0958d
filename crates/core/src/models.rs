use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{config::TargetSpec, error::CollectionError};

/// Local view of a triggered run's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
    TriggerError,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut | Self::TriggerError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::InProgress => "IN_PROGRESS",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::TriggerError => "TRIGGER_ERROR",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Status of a run as reported by the job-execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Queued,
    InProgress,
    CompletedSuccess,
    CompletedFailure,
    Cancelled,
}

impl RemoteStatus {
    pub fn run_status(self) -> RunStatus {
        match self {
            Self::Queued => RunStatus::Queued,
            Self::InProgress => RunStatus::InProgress,
            Self::CompletedSuccess => RunStatus::Succeeded,
            Self::CompletedFailure | Self::Cancelled => RunStatus::Failed,
        }
    }
}

/// Identifier of a triggered run.
///
/// Dry runs carry a synthetic identifier that never reaches the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunId {
    Remote(u64),
    DryRun(String),
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(id) => write!(f, "{id}"),
            Self::DryRun(id) => f.write_str(id),
        }
    }
}

/// One triggered job, correlated with the target it was triggered for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub target: TargetSpec,
    /// Absent when the trigger failed.
    pub run_id: Option<RunId>,
    #[serde(with = "time::serde::rfc3339")]
    pub triggered_at: OffsetDateTime,
    pub status: RunStatus,
    /// When the waiter recorded a terminal status.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunHandle {
    pub fn is_dry_run(&self) -> bool { matches!(self.run_id, Some(RunId::DryRun(_))) }

    pub fn remote_id(&self) -> Option<u64> {
        match self.run_id {
            Some(RunId::Remote(id)) => Some(id),
            _ => None,
        }
    }
}

/// The run ledger: every triggered target's handle, in configuration order.
///
/// Each phase takes the previous phase's ledger and returns a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLedger {
    #[serde(with = "time::serde::rfc3339")]
    pub trigger_time: OffsetDateTime,
    pub dry_run: bool,
    pub runs: Vec<RunHandle>,
}

impl RunLedger {
    pub fn get(&self, name: &str) -> Option<&RunHandle> {
        self.runs.iter().find(|h| h.target.name == name)
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|h| h.status == status).count()
    }
}

/// Which NIM deployment styles a repository supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportType {
    LocalOnly,
    HostedOnly,
    Both,
    None,
}

impl SupportType {
    pub const ALL: [Self; 4] = [Self::LocalOnly, Self::HostedOnly, Self::Both, Self::None];

    pub fn from_flags(local: bool, hosted: bool) -> Self {
        match (local, hosted) {
            (true, true) => Self::Both,
            (true, false) => Self::LocalOnly,
            (false, true) => Self::HostedOnly,
            (false, false) => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalOnly => "local_only",
            Self::HostedOnly => "hosted_only",
            Self::Both => "both",
            Self::None => "none",
        }
    }
}

/// Which NIM deployment styles a repository exercises in its CI workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionsUsage {
    LocalInActions,
    HostedInActions,
    BothInActions,
    NoneInActions,
}

impl ActionsUsage {
    pub const ALL: [Self; 4] =
        [Self::LocalInActions, Self::HostedInActions, Self::BothInActions, Self::NoneInActions];

    pub fn from_flags(local: bool, hosted: bool) -> Self {
        match (local, hosted) {
            (true, true) => Self::BothInActions,
            (true, false) => Self::LocalInActions,
            (false, true) => Self::HostedInActions,
            (false, false) => Self::NoneInActions,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalInActions => "local_in_actions",
            Self::HostedInActions => "hosted_in_actions",
            Self::BothInActions => "both_in_actions",
            Self::NoneInActions => "none_in_actions",
        }
    }
}

// Rows follow SupportType::ALL, columns follow ActionsUsage::ALL.
const CLASSIFICATIONS: [[&str; 4]; 4] = [
    [
        "LOCAL_ONLY_SUPPORT_LOCAL_ACTIONS",
        "LOCAL_ONLY_SUPPORT_HOSTED_ACTIONS",
        "LOCAL_ONLY_SUPPORT_BOTH_ACTIONS",
        "LOCAL_ONLY_SUPPORT_NONE_ACTIONS",
    ],
    [
        "HOSTED_ONLY_SUPPORT_LOCAL_ACTIONS",
        "HOSTED_ONLY_SUPPORT_HOSTED_ACTIONS",
        "HOSTED_ONLY_SUPPORT_BOTH_ACTIONS",
        "HOSTED_ONLY_SUPPORT_NONE_ACTIONS",
    ],
    [
        "BOTH_SUPPORT_LOCAL_ACTIONS",
        "BOTH_SUPPORT_HOSTED_ACTIONS",
        "BOTH_SUPPORT_BOTH_ACTIONS",
        "BOTH_SUPPORT_NONE_ACTIONS",
    ],
    [
        "NONE_SUPPORT_LOCAL_ACTIONS",
        "NONE_SUPPORT_HOSTED_ACTIONS",
        "NONE_SUPPORT_BOTH_ACTIONS",
        "NONE_SUPPORT_NONE_ACTIONS",
    ],
];

/// Combined classification key for a (support type, actions usage) pair.
pub fn classification(support_type: SupportType, actions_usage: ActionsUsage) -> &'static str {
    CLASSIFICATIONS[support_type as usize][actions_usage as usize]
}

/// A decoded, schema-checked per-target scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub target: String,
    pub support_type: SupportType,
    pub actions_usage: ActionsUsage,
    /// Payload fields carried through without interpretation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub collected_at: OffsetDateTime,
}

impl ScanReport {
    pub fn classification(&self) -> &'static str {
        classification(self.support_type, self.actions_usage)
    }
}

/// Why a target has no artifact to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// The run never reached SUCCEEDED.
    Status(RunStatus),
    /// Dry runs never produce artifacts.
    DryRun,
}

/// Result of the collection phase for a single target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CollectionOutcome {
    Report(ScanReport),
    MissingArtifact { reason: MissingReason },
    CollectionError(CollectionError),
}

impl CollectionOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Report(_) => OutcomeKind::Classified,
            Self::MissingArtifact { reason: MissingReason::DryRun } => OutcomeKind::DryRun,
            Self::MissingArtifact { reason: MissingReason::Status(RunStatus::TimedOut) } => {
                OutcomeKind::TimedOut
            }
            Self::MissingArtifact { reason: MissingReason::Status(RunStatus::TriggerError) } => {
                OutcomeKind::TriggerError
            }
            Self::MissingArtifact { .. } => OutcomeKind::MissingArtifact,
            Self::CollectionError(_) => OutcomeKind::CollectionError,
        }
    }
}

/// The user-visible category every target ends up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Classified,
    MissingArtifact,
    CollectionError,
    TriggerError,
    TimedOut,
    DryRun,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classified => "classified",
            Self::MissingArtifact => "missing-artifact",
            Self::CollectionError => "collection-error",
            Self::TriggerError => "trigger-error",
            Self::TimedOut => "timed-out",
            Self::DryRun => "dry-run",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A target paired with its collection outcome, the aggregator's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedTarget {
    pub target: TargetSpec,
    pub outcome: CollectionOutcome,
}

/// Output of the collection phase, persisted between `collect` and `aggregate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionResults {
    #[serde(with = "time::serde::rfc3339")]
    pub collection_time: OffsetDateTime,
    pub results: Vec<CollectedTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedReport {
    pub metadata: ReportMetadata,
    pub summary: ReportSummary,
    pub repositories: Vec<RepositoryDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(with = "time::serde::rfc3339")]
    pub aggregation_time: OffsetDateTime,
    pub total_repos: usize,
    pub successful_scans: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub by_support_type: BTreeMap<SupportType, usize>,
    pub by_actions_usage: BTreeMap<ActionsUsage, usize>,
    pub by_classification: BTreeMap<String, usize>,
    /// Targets without a valid report, keyed by outcome. Never contains `classified`.
    pub by_status: BTreeMap<OutcomeKind, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDetail {
    pub name: String,
    pub workflow: String,
    pub branch: String,
    pub outcome: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_type: Option<SupportType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_usage: Option<ActionsUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_classification_table() {
        let mut seen = HashSet::new();
        for support_type in SupportType::ALL {
            for actions_usage in ActionsUsage::ALL {
                let key = classification(support_type, actions_usage);
                assert_eq!(key, classification(support_type, actions_usage));
                assert!(seen.insert(key), "duplicate key {key}");
            }
        }
        assert_eq!(seen.len(), 16);
        assert_eq!(
            classification(SupportType::Both, ActionsUsage::BothInActions),
            "BOTH_SUPPORT_BOTH_ACTIONS"
        );
        assert_eq!(
            classification(SupportType::LocalOnly, ActionsUsage::NoneInActions),
            "LOCAL_ONLY_SUPPORT_NONE_ACTIONS"
        );
    }

    #[test]
    fn test_from_flags() {
        let cases = [
            ((true, true), SupportType::Both, ActionsUsage::BothInActions),
            ((true, false), SupportType::LocalOnly, ActionsUsage::LocalInActions),
            ((false, true), SupportType::HostedOnly, ActionsUsage::HostedInActions),
            ((false, false), SupportType::None, ActionsUsage::NoneInActions),
        ];
        for ((local, hosted), support_type, actions_usage) in cases {
            assert_eq!(SupportType::from_flags(local, hosted), support_type);
            assert_eq!(ActionsUsage::from_flags(local, hosted), actions_usage);
        }
    }

    #[test]
    fn test_remote_status_mapping() {
        let cases = [
            (RemoteStatus::Queued, RunStatus::Queued),
            (RemoteStatus::InProgress, RunStatus::InProgress),
            (RemoteStatus::CompletedSuccess, RunStatus::Succeeded),
            (RemoteStatus::CompletedFailure, RunStatus::Failed),
            (RemoteStatus::Cancelled, RunStatus::Failed),
        ];
        for (remote, expected) in cases {
            assert_eq!(remote.run_status(), expected);
        }
    }

    #[test]
    fn test_outcome_kind() {
        let missing = |reason| CollectionOutcome::MissingArtifact { reason };
        let cases = [
            (missing(MissingReason::DryRun), OutcomeKind::DryRun),
            (missing(MissingReason::Status(RunStatus::TimedOut)), OutcomeKind::TimedOut),
            (missing(MissingReason::Status(RunStatus::TriggerError)), OutcomeKind::TriggerError),
            (missing(MissingReason::Status(RunStatus::Failed)), OutcomeKind::MissingArtifact),
            (missing(MissingReason::Status(RunStatus::Queued)), OutcomeKind::MissingArtifact),
            (
                CollectionOutcome::CollectionError(CollectionError::malformed("bad")),
                OutcomeKind::CollectionError,
            ),
        ];
        for (outcome, expected) in cases {
            assert_eq!(outcome.kind(), expected);
        }
    }

    #[test]
    fn test_summary_keys_serialize_as_strings() {
        let mut summary = ReportSummary::default();
        summary.by_support_type.insert(SupportType::HostedOnly, 2);
        summary.by_status.insert(OutcomeKind::TimedOut, 1);
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["by_support_type"]["hosted_only"], 2);
        assert_eq!(value["by_status"]["timed-out"], 1);
    }
}
