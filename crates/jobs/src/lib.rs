pub mod aggregate;
pub mod jobs;
#[cfg(test)]
mod mock;
pub mod throttle;

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

pub use aggregate::aggregate;
use nimscan_core::{
    AggregationInvariantError, CollectionError, JobService, Settings, TargetSpec,
    models::{
        AggregatedReport, CollectedTarget, CollectionOutcome, RunHandle, RunLedger, RunStatus,
    },
};
use time::OffsetDateTime;
use tokio::{
    task::{Id, JoinSet},
    time::{Instant, timeout_at},
};

use crate::throttle::Throttle;

/// Slack on top of the longest run timeout, so every waiter gets its first
/// poll in before the wait phase is cut short.
const OUTER_GRACE: Duration = Duration::from_secs(30);

/// `Instant::now() + after`, saturating at roughly thirty years out.
pub(crate) fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .unwrap_or_else(|| now + Duration::from_secs(30 * 365 * 24 * 60 * 60))
}

/// Operator switches that change which phases run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mode {
    /// No network effects; every handle is synthetic.
    pub dry_run: bool,
    /// Go straight from trigger to collection, leaving runs QUEUED.
    pub skip_wait: bool,
}

/// Everything a full run produces.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub ledger: RunLedger,
    pub results: Vec<CollectedTarget>,
    pub report: AggregatedReport,
}

/// Drives the trigger, wait, collect and aggregate phases over a set of targets.
///
/// Each phase takes the previous phase's ledger and returns a new one. All
/// phases share one throttled service, so the concurrency and rate limits
/// hold across every target at once.
#[derive(Clone)]
pub struct Engine {
    service: Arc<dyn JobService>,
    settings: Arc<Settings>,
}

impl Engine {
    /// `targets` is the number of targets the engine will drive; the
    /// concurrency bound is `min(targets, max_concurrency)`.
    pub fn new(service: Arc<dyn JobService>, settings: Settings, targets: usize) -> Self {
        let concurrency = targets.min(settings.max_concurrency).max(1);
        let service: Arc<dyn JobService> =
            Arc::new(Throttle::new(service, concurrency, settings.requests_per_second));
        Self { service, settings: Arc::new(settings) }
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub async fn trigger(&self, targets: &[TargetSpec], dry_run: bool) -> RunLedger {
        let trigger_time = OffsetDateTime::now_utc();
        let retries = self.settings.trigger_retries;
        let backoff = Duration::from_secs(self.settings.trigger_backoff_seconds);
        let runs = fan_out(
            targets,
            |target| {
                let service = self.service.clone();
                let target = target.clone();
                async move {
                    jobs::trigger_with_retry(&*service, &target, dry_run, retries, backoff).await
                }
            },
            None,
            |target, _| RunHandle {
                target: target.clone(),
                run_id: None,
                triggered_at: OffsetDateTime::now_utc(),
                status: RunStatus::TriggerError,
                completed_at: None,
                error: Some("trigger task failed".to_string()),
            },
        )
        .await;
        let ledger = RunLedger { trigger_time, dry_run, runs };
        tracing::info!(
            "Triggered {}/{} workflows ({} failed)",
            ledger.runs.len() - ledger.count(RunStatus::TriggerError),
            ledger.runs.len(),
            ledger.count(RunStatus::TriggerError)
        );
        ledger
    }

    /// Wait for every run to finish.
    ///
    /// Returns once every handle is terminal or the outer deadline has
    /// passed: the longest per-target timeout plus one poll interval and a
    /// fixed grace. Waits still running at that point are abandoned as
    /// TIMED_OUT.
    pub async fn wait(&self, ledger: RunLedger) -> RunLedger {
        let poll_interval = self.settings.poll_interval();
        let outer = ledger
            .runs
            .iter()
            .map(|handle| self.settings.timeout_for(&handle.target))
            .max()
            .unwrap_or_default();
        let deadline =
            deadline_after(outer.saturating_add(poll_interval).saturating_add(OUTER_GRACE));
        let pending = ledger.runs.iter().filter(|h| !h.status.is_terminal()).count();
        tracing::info!(
            "Waiting for {} runs (poll every {}s, up to {} minutes)",
            pending,
            poll_interval.as_secs(),
            outer.as_secs() / 60
        );

        let runs = fan_out(
            &ledger.runs,
            |handle| {
                let service = self.service.clone();
                let handle = handle.clone();
                let timeout = self.settings.timeout_for(&handle.target);
                async move { jobs::wait(&*service, handle, poll_interval, timeout).await }
            },
            Some(deadline),
            |handle, cause| {
                let mut handle = handle.clone();
                handle.status = match cause {
                    Abandoned::Deadline => RunStatus::TimedOut,
                    Abandoned::Panicked => RunStatus::Failed,
                };
                handle.completed_at = Some(OffsetDateTime::now_utc());
                handle
            },
        )
        .await;
        let ledger = RunLedger { runs, ..ledger };
        tracing::info!(
            "Runs finished: {} succeeded, {} failed, {} timed out",
            ledger.count(RunStatus::Succeeded),
            ledger.count(RunStatus::Failed),
            ledger.count(RunStatus::TimedOut)
        );
        ledger
    }

    /// Collect one outcome per handle, in ledger order.
    pub async fn collect(&self, ledger: &RunLedger) -> Vec<CollectedTarget> {
        let names: Arc<[String]> = self.settings.artifact_names().map(str::to_string).collect();
        let outcomes = fan_out(
            &ledger.runs,
            |handle| {
                let service = self.service.clone();
                let handle = handle.clone();
                let names = names.clone();
                async move { jobs::collect(&*service, &handle, &names).await }
            },
            None,
            |_, _| CollectionOutcome::CollectionError(CollectionError::transient(
                "collector task failed",
            )),
        )
        .await;
        let results: Vec<_> = ledger
            .runs
            .iter()
            .zip(outcomes)
            .map(|(handle, outcome)| CollectedTarget { target: handle.target.clone(), outcome })
            .collect();
        let reports =
            results.iter().filter(|r| matches!(r.outcome, CollectionOutcome::Report(_))).count();
        tracing::info!("Collected {}/{} reports", reports, results.len());
        results
    }

    /// Run every phase in one go.
    pub async fn run(
        &self,
        targets: &[TargetSpec],
        mode: Mode,
    ) -> Result<RunOutput, AggregationInvariantError> {
        let mut ledger = self.trigger(targets, mode.dry_run).await;
        if mode.skip_wait {
            tracing::info!("Skipping wait, runs are left queued");
        } else {
            ledger = self.wait(ledger).await;
        }
        let results = self.collect(&ledger).await;
        let report = aggregate(&results, OffsetDateTime::now_utc())?;
        Ok(RunOutput { ledger, results, report })
    }
}

#[derive(Debug, Clone, Copy)]
enum Abandoned {
    Deadline,
    Panicked,
}

/// Run `task` for every item concurrently and gather the outputs in input order.
///
/// Items whose task panicked, or was still running at `deadline`, get
/// `fallback` instead.
async fn fan_out<I, T, F, Fut>(
    items: &[I],
    task: F,
    deadline: Option<Instant>,
    fallback: impl Fn(&I, Abandoned) -> T,
) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(&I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let mut set = JoinSet::new();
    let mut indices = HashMap::<Id, usize>::new();
    for (index, item) in items.iter().enumerate() {
        let handle = set.spawn(task(item));
        indices.insert(handle.id(), index);
    }
    let mut outputs: Vec<Option<T>> = items.iter().map(|_| None).collect();
    loop {
        let next = match deadline {
            Some(deadline) => match timeout_at(deadline, set.join_next_with_id()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!("Outer deadline reached with {} tasks running", set.len());
                    set.abort_all();
                    break;
                }
            },
            None => set.join_next_with_id().await,
        };
        match next {
            Some(Ok((id, output))) => {
                if let Some(&index) = indices.get(&id) {
                    outputs[index] = Some(output);
                }
            }
            Some(Err(e)) => {
                tracing::error!("Task failed: {:?}", e);
                if let Some(&index) = indices.get(&e.id()) {
                    outputs[index] = Some(fallback(&items[index], Abandoned::Panicked));
                }
            }
            None => break,
        }
    }
    outputs
        .into_iter()
        .zip(items)
        .map(|(output, item)| output.unwrap_or_else(|| fallback(item, Abandoned::Deadline)))
        .collect()
}
