// Job registry: injected, mutex-guarded map of job id -> job, with a bounded
// broadcast channel per job for live event subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::models::{
    ExecutionEvent, Job, JobEvent, JobKind, JobResult, JobStatus, State,
};

/// Default per-job live event buffer; slow subscribers lose the oldest events.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

struct JobEntry {
    job: Job,
    tx: broadcast::Sender<JobEvent>,
}

#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Mutex<HashMap<String, JobEntry>>>,
    capacity: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl JobRegistry {
    pub fn new(event_buffer_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            capacity: event_buffer_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new running job and return its id.
    pub fn create(&self, kind: JobKind) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, _) = broadcast::channel(self.capacity);
        let job = Job {
            id: id.clone(),
            kind,
            status: JobStatus::Running,
            started_at: crate::now_ms(),
            finished_at: None,
            pre_state: None,
            post_state: None,
            events: Vec::new(),
            result: None,
            error: None,
        };
        self.lock().insert(id.clone(), JobEntry { job, tx });
        tracing::debug!(job_id = %id, kind = kind.as_str(), "job created");
        id
    }

    /// Append to the job's log and fan out to live subscribers. Unknown ids are ignored.
    pub fn record_event(&self, id: &str, event: ExecutionEvent) {
        let mut map = self.lock();
        let Some(entry) = map.get_mut(id) else {
            tracing::warn!(job_id = %id, "event for unknown job dropped");
            return;
        };
        let ev = JobEvent {
            seq: entry.job.events.len() as u64,
            at: crate::now_ms(),
            event,
        };
        entry.job.events.push(ev.clone());
        // No receivers is fine.
        let _ = entry.tx.send(ev);
    }

    pub fn set_pre_state(&self, id: &str, state: State) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.job.pre_state = Some(state);
        }
    }

    pub fn set_post_state(&self, id: &str, state: State) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.job.post_state = Some(state);
        }
    }

    pub fn complete(&self, id: &str, result: JobResult, post_state: Option<State>) {
        self.finish(id, JobStatus::Completed, |job| {
            job.result = Some(result);
            job.post_state = post_state;
        });
    }

    pub fn fail(&self, id: &str, error: String) {
        self.finish(id, JobStatus::Failed, |job| job.error = Some(error));
    }

    pub fn abort(&self, id: &str, reason: String) {
        self.finish(id, JobStatus::Aborted, |job| job.error = Some(reason));
    }

    pub fn deny(&self, id: &str, reason: String) {
        self.finish(id, JobStatus::Denied, |job| job.error = Some(reason));
    }

    fn finish(&self, id: &str, status: JobStatus, apply: impl FnOnce(&mut Job)) {
        let mut map = self.lock();
        let Some(entry) = map.get_mut(id) else {
            return;
        };
        if entry.job.status.is_terminal() {
            tracing::warn!(job_id = %id, "job already finished; ignoring {:?}", status);
            return;
        }
        apply(&mut entry.job);
        entry.job.status = status;
        entry.job.finished_at = Some(crate::now_ms());
        tracing::info!(job_id = %id, status = ?status, "job finished");
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock().get(id).map(|e| e.job.clone())
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs
    }

    /// Drop finished jobs older than `max_age`; running jobs always stay. Returns the count.
    pub fn evict_finished(&self, max_age: Duration) -> usize {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = crate::now_ms().saturating_sub(max_age_ms);
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, e| e.job.finished_at.is_none_or(|at| at > cutoff));
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Events logged so far plus a receiver for the rest, taken under one lock so nothing
    /// falls between the two.
    pub fn subscribe(&self, id: &str) -> Option<(Vec<JobEvent>, broadcast::Receiver<JobEvent>)> {
        let map = self.lock();
        let entry = map.get(id)?;
        Some((entry.job.events.clone(), entry.tx.subscribe()))
    }
}
