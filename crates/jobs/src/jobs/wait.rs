use std::time::Duration;

use nimscan_core::{
    JobService,
    models::{RunHandle, RunStatus},
};
use time::OffsetDateTime;
use tokio::time::{Instant, sleep_until};

use crate::deadline_after;

/// Poll `handle` until it reaches a terminal status or its deadline passes.
///
/// The deadline is `timeout` after the handle's trigger time. The run is
/// always polled at least once. Once the deadline is reached the handle is
/// TIMED_OUT, and a response still in flight at that point is dropped, even
/// if it would have reported success.
pub async fn wait(
    service: &dyn JobService,
    mut handle: RunHandle,
    poll_interval: Duration,
    timeout: Duration,
) -> RunHandle {
    if handle.is_dry_run() {
        handle.status = RunStatus::Succeeded;
        handle.completed_at = Some(OffsetDateTime::now_utc());
        return handle;
    }
    if handle.status.is_terminal() {
        return handle;
    }
    let Some(run_id) = handle.remote_id() else {
        tracing::warn!("{}: no run id, nothing to wait for", handle.target.name);
        return handle;
    };

    let elapsed: Duration =
        (OffsetDateTime::now_utc() - handle.triggered_at).try_into().unwrap_or_default();
    let deadline = deadline_after(timeout.saturating_sub(elapsed));
    let repo = handle.target.name.clone();
    let mut polls = 0u32;
    loop {
        if polls > 0 && Instant::now() >= deadline {
            break;
        }
        polls += 1;
        let response = tokio::select! {
            biased;
            response = service.get_run_status(&repo, run_id) => Some(response),
            _ = sleep_until(deadline) => None,
        };
        if Instant::now() >= deadline {
            if let Some(Ok(remote)) = response {
                tracing::debug!("{} (run {}): discarding late status {:?}", repo, run_id, remote);
            }
            break;
        }
        match response {
            Some(Ok(remote)) => {
                let status = remote.run_status();
                if status != handle.status {
                    tracing::debug!("{} (run {}): {} -> {}", repo, run_id, handle.status, status);
                    handle.status = status;
                }
                if status.is_terminal() {
                    handle.completed_at = Some(OffsetDateTime::now_utc());
                    tracing::info!("{} (run {}): completed ({})", repo, run_id, status);
                    return handle;
                }
            }
            Some(Err(e)) => {
                tracing::warn!("{} (run {}): failed to poll status: {}", repo, run_id, e);
            }
            None => break,
        }
        sleep_until((Instant::now() + poll_interval).min(deadline)).await;
    }

    tracing::warn!(
        "{} (run {}): timed out after {} minutes ({} polls)",
        repo,
        run_id,
        timeout.as_secs() / 60,
        polls
    );
    handle.status = RunStatus::TimedOut;
    handle.completed_at = Some(OffsetDateTime::now_utc());
    handle
}
