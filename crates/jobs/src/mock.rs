//! Scripted in-memory job service for engine tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use nimscan_core::{JobService, ServiceError, StartRequest, TargetSpec, models::RemoteStatus};

#[derive(Default)]
pub struct MockService {
    state: Mutex<MockState>,
    start_calls: AtomicUsize,
    status_calls: AtomicUsize,
    artifact_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Default)]
struct MockState {
    starts: HashMap<String, VecDeque<Result<u64, ServiceError>>>,
    statuses: HashMap<u64, VecDeque<Result<RemoteStatus, ServiceError>>>,
    status_delays: HashMap<u64, Duration>,
    artifacts: HashMap<(u64, String), VecDeque<Result<Vec<u8>, ServiceError>>>,
    requests: Vec<StartRequest>,
}

/// Pops the next scripted response, repeating the last one forever.
fn next<T: Clone>(queue: Option<&mut VecDeque<T>>) -> Option<T> {
    let queue = queue?;
    if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() }
}

impl MockService {
    pub fn on_start(
        &self,
        repo: &str,
        results: impl IntoIterator<Item = Result<u64, ServiceError>>,
    ) {
        self.state.lock().unwrap().starts.insert(repo.to_string(), results.into_iter().collect());
    }

    pub fn on_status(
        &self,
        run_id: u64,
        results: impl IntoIterator<Item = Result<RemoteStatus, ServiceError>>,
    ) {
        self.state.lock().unwrap().statuses.insert(run_id, results.into_iter().collect());
    }

    pub fn delay_status(&self, run_id: u64, delay: Duration) {
        self.state.lock().unwrap().status_delays.insert(run_id, delay);
    }

    pub fn on_artifact(
        &self,
        run_id: u64,
        name: &str,
        results: impl IntoIterator<Item = Result<Vec<u8>, ServiceError>>,
    ) {
        self.state
            .lock()
            .unwrap()
            .artifacts
            .insert((run_id, name.to_string()), results.into_iter().collect());
    }

    pub fn start_calls(&self) -> usize { self.start_calls.load(Ordering::SeqCst) }

    pub fn status_calls(&self) -> usize { self.status_calls.load(Ordering::SeqCst) }

    pub fn artifact_calls(&self) -> usize { self.artifact_calls.load(Ordering::SeqCst) }

    pub fn max_in_flight(&self) -> usize { self.max_in_flight.load(Ordering::SeqCst) }

    pub fn requests(&self) -> Vec<StartRequest> { self.state.lock().unwrap().requests.clone() }

    fn enter(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
    }

    fn exit(&self) { self.in_flight.fetch_sub(1, Ordering::SeqCst); }
}

#[async_trait]
impl JobService for MockService {
    async fn start_job(&self, request: &StartRequest) -> Result<u64, ServiceError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        next(state.starts.get_mut(&request.repo))
            .unwrap_or_else(|| Err(ServiceError::permanent("unexpected start")))
    }

    async fn get_run_status(&self, _repo: &str, run_id: u64) -> Result<RemoteStatus, ServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.enter();
        let (delay, result) = {
            let mut state = self.state.lock().unwrap();
            let delay = state.status_delays.get(&run_id).copied();
            let result = next(state.statuses.get_mut(&run_id))
                .unwrap_or_else(|| Err(ServiceError::not_found("unknown run")));
            (delay, result)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.exit();
        result
    }

    async fn get_artifact(
        &self,
        _repo: &str,
        run_id: u64,
        artifact_name: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        self.artifact_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        next(state.artifacts.get_mut(&(run_id, artifact_name.to_string())))
            .unwrap_or_else(|| Err(ServiceError::not_found("no such artifact")))
    }
}

pub fn target(name: &str) -> TargetSpec {
    TargetSpec {
        name: name.to_string(),
        workflow: "nim-scan.yml".to_string(),
        branch: "main".to_string(),
        exclude_dirs: Vec::new(),
        enabled: true,
        timeout_minutes: None,
    }
}
