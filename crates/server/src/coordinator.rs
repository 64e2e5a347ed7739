//! Job coordination: single-flight deduplication, concurrency limits,
//! cooperative cancellation, and the stall watchdog.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use stemwell_core::config::JobConfig;
use stemwell_core::{Fingerprint, JobId, JobState, StemSet};
use stemwell_engine::SeparationEngine;
use stemwell_store::StemStore;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::progress::SessionRegistry;

/// Outcome of a submit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Artifacts were already cached; the job is terminal immediately.
    CacheHit(JobId),
    /// A new separation run was started for this fingerprint.
    Started(JobId),
    /// An in-flight run for the same fingerprint was joined.
    Joined(JobId),
}

impl Submission {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::CacheHit(id) | Self::Started(id) | Self::Joined(id) => *id,
        }
    }
}

/// An in-flight separation run for one fingerprint.
struct Flight {
    job_id: JobId,
    cancel: AtomicBool,
}

/// Tracked state for one job, live or terminal.
struct JobEntry {
    fingerprint: Fingerprint,
    state: Mutex<JobState>,
    artifacts: Mutex<Option<StemSet>>,
    error: Mutex<Option<String>>,
    started_at: OffsetDateTime,
    last_activity: Mutex<Instant>,
}

impl JobEntry {
    fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            state: Mutex::new(JobState::Pending),
            artifacts: Mutex::new(None),
            error: Mutex::new(None),
            started_at: OffsetDateTime::now_utc(),
            last_activity: Mutex::new(Instant::now()),
        }
    }
}

/// Snapshot of one job for the status endpoint.
pub struct JobSnapshot {
    pub job_id: JobId,
    pub state: JobState,
    pub artifacts: Option<StemSet>,
    pub error: Option<String>,
    pub started_at: OffsetDateTime,
}

/// Orchestrates separation jobs over the store and the engine.
///
/// At most one run is in flight per fingerprint: concurrent submissions of
/// identical content join the existing run and observe the same job ID.
/// Cancellation is cooperative; a run past its last checkpoint finishes
/// and its output is discarded rather than published.
pub struct Coordinator {
    store: StemStore,
    engine: Arc<dyn SeparationEngine>,
    sessions: Arc<SessionRegistry>,
    config: JobConfig,
    permits: Arc<Semaphore>,
    flights: Mutex<HashMap<Fingerprint, Arc<Flight>>>,
    jobs: Mutex<HashMap<JobId, Arc<JobEntry>>>,
}

impl Coordinator {
    pub fn new(
        store: StemStore,
        engine: Arc<dyn SeparationEngine>,
        sessions: Arc<SessionRegistry>,
        config: JobConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            store,
            engine,
            sessions,
            config,
            permits,
            flights: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Submit content for separation.
    ///
    /// `input` is a spooled upload owned by the coordinator from here on;
    /// it is removed once the run ends or on the cache-hit fast path.
    pub async fn submit(self: &Arc<Self>, fingerprint: Fingerprint, input: PathBuf) -> ApiResult<Submission> {
        // Fast path: published artifacts already exist.
        if let Some(artifacts) = self.store.lookup(fingerprint).await? {
            let _ = tokio::fs::remove_file(&input).await;
            let job_id = JobId::new();
            let entry = Arc::new(JobEntry::new(fingerprint));
            *entry.state.lock().await = JobState::Completed;
            *entry.artifacts.lock().await = Some(artifacts.clone());
            self.jobs.lock().await.insert(job_id, entry);

            let session = self.sessions.register(job_id).await;
            session.send_progress(100.0, "Loaded from cache");
            session.send_complete(artifacts);
            info!(%job_id, %fingerprint, "cache hit");
            return Ok(Submission::CacheHit(job_id));
        }

        // Single flight per fingerprint. The flight map is the join point;
        // whoever inserts first owns the run.
        let flight = {
            let mut flights = self.flights.lock().await;
            if let Some(existing) = flights.get(&fingerprint) {
                let job_id = existing.job_id;
                let _ = tokio::fs::remove_file(&input).await;
                info!(%job_id, %fingerprint, "joined in-flight job");
                return Ok(Submission::Joined(job_id));
            }

            let permit = self
                .permits
                .clone()
                .try_acquire_owned()
                .map_err(|_| ApiError::ResourceExhausted)?;

            let flight = Arc::new(Flight {
                job_id: JobId::new(),
                cancel: AtomicBool::new(false),
            });
            flights.insert(fingerprint, flight.clone());

            let entry = Arc::new(JobEntry::new(fingerprint));
            self.jobs.lock().await.insert(flight.job_id, entry.clone());
            self.sessions.register(flight.job_id).await;

            let this = self.clone();
            let run_flight = flight.clone();
            tokio::spawn(async move {
                this.run(fingerprint, run_flight, entry, input).await;
                drop(permit);
            });
            flight
        };

        info!(job_id = %flight.job_id, %fingerprint, "job started");
        Ok(Submission::Started(flight.job_id))
    }

    /// Request cancellation of a job.
    ///
    /// Idempotent; cancelling a terminal job is a no-op returning its state.
    pub async fn cancel(&self, job_id: JobId) -> ApiResult<JobState> {
        let entry = self
            .jobs
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("unknown job {job_id}")))?;

        let mut state = entry.state.lock().await;
        if state.is_terminal() {
            return Ok(*state);
        }

        let flights = self.flights.lock().await;
        if let Some(flight) = flights.get(&entry.fingerprint) {
            if flight.job_id == job_id {
                flight.cancel.store(true, Ordering::SeqCst);
            }
        }
        *state = JobState::Cancelling;
        info!(%job_id, "cancellation requested");
        Ok(*state)
    }

    /// Status snapshot for one job.
    pub async fn status(&self, job_id: JobId) -> ApiResult<JobSnapshot> {
        let entry = self
            .jobs
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("unknown job {job_id}")))?;

        let snapshot = JobSnapshot {
            job_id,
            state: *entry.state.lock().await,
            artifacts: entry.artifacts.lock().await.clone(),
            error: entry.error.lock().await.clone(),
            started_at: entry.started_at,
        };
        Ok(snapshot)
    }

    /// Number of runs currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.flights.lock().await.len()
    }

    async fn run(self: Arc<Self>, fingerprint: Fingerprint, flight: Arc<Flight>, entry: Arc<JobEntry>, input: PathBuf) {
        let job_id = flight.job_id;
        let session = self.sessions.register(job_id).await;

        *entry.state.lock().await = JobState::Running;
        *entry.last_activity.lock().await = Instant::now();
        session.send_progress(10.0, "Loading audio file...");

        // Checkpoint before committing to the engine.
        if flight.cancel.load(Ordering::SeqCst) {
            self.finish_cancelled(&fingerprint, &flight, &entry, &input).await;
            return;
        }

        let staging = match self.store.begin(fingerprint).await {
            Ok(staging) => staging,
            Err(err) => {
                self.finish_failed(&fingerprint, &flight, &entry, &input, &err.to_string())
                    .await;
                return;
            }
        };

        let engine = self.engine.clone();
        let run_input = input.clone();
        let out_dir = staging.dir().to_path_buf();
        let progress_session = session.clone();
        let activity = entry.clone();
        let result = tokio::task::spawn_blocking(move || {
            let progress = |percent: f32, status: &str| {
                progress_session.send_progress(percent, status);
                if let Ok(mut last) = activity.last_activity.try_lock() {
                    *last = Instant::now();
                }
            };
            engine.separate(&run_input, &out_dir, &progress)
        })
        .await;

        // Checkpoint after the engine returns. A run cancelled mid-flight
        // completes, then its output is discarded unpublished.
        if flight.cancel.load(Ordering::SeqCst) {
            if let Err(err) = self.store.discard(staging).await {
                warn!(%job_id, error = %err, "failed to discard cancelled staging dir");
            }
            self.finish_cancelled(&fingerprint, &flight, &entry, &input).await;
            return;
        }

        match result {
            Ok(Ok(())) => match self.store.publish(staging).await {
                Ok(artifacts) => {
                    self.finish_completed(&fingerprint, &flight, &entry, &input, artifacts)
                        .await;
                }
                Err(err) => {
                    error!(%job_id, %fingerprint, error = %err, "publish failed");
                    self.finish_failed(&fingerprint, &flight, &entry, &input, &err.to_string())
                        .await;
                }
            },
            Ok(Err(err)) => {
                if let Err(discard_err) = self.store.discard(staging).await {
                    warn!(%job_id, error = %discard_err, "failed to discard staging dir");
                }
                error!(%job_id, %fingerprint, error = %err, "separation failed");
                self.finish_failed(&fingerprint, &flight, &entry, &input, &err.to_string())
                    .await;
            }
            Err(join_err) => {
                if let Err(discard_err) = self.store.discard(staging).await {
                    warn!(%job_id, error = %discard_err, "failed to discard staging dir");
                }
                error!(%job_id, %fingerprint, error = %join_err, "separation task panicked");
                self.finish_failed(&fingerprint, &flight, &entry, &input, "separation task panicked")
                    .await;
            }
        }
    }

    /// Remove the flight so resubmission of the same content starts fresh.
    /// Must happen before the terminal message goes out.
    async fn remove_flight(&self, fingerprint: &Fingerprint, flight: &Arc<Flight>) {
        let mut flights = self.flights.lock().await;
        if let Some(current) = flights.get(fingerprint) {
            if Arc::ptr_eq(current, flight) {
                flights.remove(fingerprint);
            }
        }
    }

    async fn finish_completed(
        &self,
        fingerprint: &Fingerprint,
        flight: &Arc<Flight>,
        entry: &Arc<JobEntry>,
        input: &PathBuf,
        artifacts: StemSet,
    ) {
        let _ = tokio::fs::remove_file(input).await;
        self.remove_flight(fingerprint, flight).await;
        *entry.state.lock().await = JobState::Completed;
        *entry.artifacts.lock().await = Some(artifacts.clone());
        if let Some(session) = self.sessions.lookup(flight.job_id).await {
            session.send_progress(100.0, "Complete");
            session.send_complete(artifacts);
        }
        info!(job_id = %flight.job_id, %fingerprint, "job completed");
    }

    async fn finish_failed(
        &self,
        fingerprint: &Fingerprint,
        flight: &Arc<Flight>,
        entry: &Arc<JobEntry>,
        input: &PathBuf,
        reason: &str,
    ) {
        let _ = tokio::fs::remove_file(input).await;
        self.remove_flight(fingerprint, flight).await;
        *entry.state.lock().await = JobState::Failed;
        *entry.error.lock().await = Some(reason.to_string());
        if let Some(session) = self.sessions.lookup(flight.job_id).await {
            session.send_error(reason);
        }
    }

    async fn finish_cancelled(
        &self,
        fingerprint: &Fingerprint,
        flight: &Arc<Flight>,
        entry: &Arc<JobEntry>,
        input: &PathBuf,
    ) {
        let _ = tokio::fs::remove_file(input).await;
        self.remove_flight(fingerprint, flight).await;
        // The watchdog may have already failed this job; keep its reason.
        let already_terminal = {
            let mut state = entry.state.lock().await;
            if state.is_terminal() {
                true
            } else {
                *state = JobState::Failed;
                false
            }
        };
        if !already_terminal {
            *entry.error.lock().await = Some("job cancelled".to_string());
            if let Some(session) = self.sessions.lookup(flight.job_id).await {
                session.send_error("job cancelled");
            }
        }
        info!(job_id = %flight.job_id, %fingerprint, "job cancelled");
    }

    /// One watchdog pass: fail runs with no progress past the stall timeout.
    ///
    /// A wedged run keeps its blocking thread until the engine returns, at
    /// which point the cancel flag routes it to the discard path.
    pub async fn watchdog_pass(&self) -> usize {
        let stall = self.config.stall_timeout();
        let stalled: Vec<(Fingerprint, Arc<Flight>)> = {
            let flights = self.flights.lock().await;
            let jobs = self.jobs.lock().await;
            let mut out = Vec::new();
            for (fp, flight) in flights.iter() {
                if let Some(entry) = jobs.get(&flight.job_id) {
                    let idle = entry.last_activity.lock().await.elapsed();
                    if idle > stall {
                        out.push((*fp, flight.clone()));
                    }
                }
            }
            out
        };

        let count = stalled.len();
        for (fingerprint, flight) in stalled {
            warn!(job_id = %flight.job_id, %fingerprint, "job stalled past timeout, failing");
            flight.cancel.store(true, Ordering::SeqCst);
            let entry = self.jobs.lock().await.get(&flight.job_id).cloned();
            if let Some(entry) = entry {
                self.remove_flight(&fingerprint, &flight).await;
                *entry.state.lock().await = JobState::Failed;
                *entry.error.lock().await = Some("job stalled".to_string());
                if let Some(session) = self.sessions.lookup(flight.job_id).await {
                    session.send_error("job stalled");
                }
            }
        }
        count
    }

    /// Drop terminal job entries older than the session-stale horizon.
    pub async fn sweep_terminal_jobs(&self, max_age: std::time::Duration) -> usize {
        let mut jobs = self.jobs.lock().await;
        let mut removed = Vec::new();
        for (job_id, entry) in jobs.iter() {
            let terminal = entry.state.lock().await.is_terminal();
            let idle = entry.last_activity.lock().await.elapsed();
            if terminal && idle > max_age {
                removed.push(*job_id);
            }
        }
        for job_id in &removed {
            jobs.remove(job_id);
        }
        removed.len()
    }
}
