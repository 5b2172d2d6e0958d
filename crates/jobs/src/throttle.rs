use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use nimscan_core::{JobService, ServiceError, StartRequest, models::RemoteStatus};
use tokio::{
    sync::{Mutex, Semaphore, SemaphorePermit},
    time::{Instant, sleep_until},
};

/// Shares one job service between every trigger, waiter and collector task.
///
/// At most `max_concurrency` requests are in flight at once, and request
/// starts are spaced so the rate stays at or below `requests_per_second`.
pub struct Throttle {
    inner: Arc<dyn JobService>,
    permits: Semaphore,
    min_gap: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(
        inner: Arc<dyn JobService>,
        max_concurrency: usize,
        requests_per_second: f64,
    ) -> Self {
        let min_gap = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            inner,
            permits: Semaphore::new(max_concurrency.max(1)),
            min_gap,
            next_slot: Mutex::new(None),
        }
    }

    async fn admit(&self) -> Result<SemaphorePermit<'_>, ServiceError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ServiceError::permanent("Request throttle closed"))?;
        if !self.min_gap.is_zero() {
            let now = Instant::now();
            let slot = {
                let mut next_slot = self.next_slot.lock().await;
                let slot = next_slot.map_or(now, |next| next.max(now));
                *next_slot = Some(slot + self.min_gap);
                slot
            };
            if slot > now {
                sleep_until(slot).await;
            }
        }
        Ok(permit)
    }
}

#[async_trait]
impl JobService for Throttle {
    async fn start_job(&self, request: &StartRequest) -> Result<u64, ServiceError> {
        let _permit = self.admit().await?;
        self.inner.start_job(request).await
    }

    async fn get_run_status(&self, repo: &str, run_id: u64) -> Result<RemoteStatus, ServiceError> {
        let _permit = self.admit().await?;
        self.inner.get_run_status(repo, run_id).await
    }

    async fn get_artifact(
        &self,
        repo: &str,
        run_id: u64,
        artifact_name: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        let _permit = self.admit().await?;
        self.inner.get_artifact(repo, run_id, artifact_name).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::{task::JoinSet, time::Instant};

    use super::*;
    use crate::mock::MockService;

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spaced() {
        let mock = Arc::new(MockService::default());
        for run_id in 0..4 {
            mock.on_status(run_id, [Ok(RemoteStatus::Queued)]);
        }
        let throttle = Arc::new(Throttle::new(mock.clone(), 10, 2.0));
        let start = Instant::now();
        let mut set = JoinSet::new();
        for run_id in 0..4 {
            let throttle = throttle.clone();
            set.spawn(async move { throttle.get_run_status("acme/alpha", run_id).await });
        }
        while let Some(result) = set.join_next().await {
            assert_eq!(result.unwrap(), Ok(RemoteStatus::Queued));
        }
        // Four request starts at 2/s: 0s, 0.5s, 1s, 1.5s.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1600), "{elapsed:?}");
        assert_eq!(mock.status_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let mock = Arc::new(MockService::default());
        for run_id in 0..3 {
            mock.on_status(run_id, [Ok(RemoteStatus::InProgress)]);
            mock.delay_status(run_id, Duration::from_secs(10));
        }
        let throttle = Arc::new(Throttle::new(mock.clone(), 1, 0.0));
        let start = Instant::now();
        let mut set = JoinSet::new();
        for run_id in 0..3 {
            let throttle = throttle.clone();
            set.spawn(async move { throttle.get_run_status("acme/alpha", run_id).await });
        }
        while set.join_next().await.is_some() {}
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(31), "{elapsed:?}");
        assert_eq!(mock.max_in_flight(), 1);
    }
}
