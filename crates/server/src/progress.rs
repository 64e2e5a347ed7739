//! Per-job progress sessions and the session registry.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stemwell_core::{JobId, Message, StemSet};
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Broadcast buffer depth per session.
const SESSION_CHANNEL_CAPACITY: usize = 256;

/// State captured when a client attaches to a session.
pub struct SessionAttach {
    /// Live message stream.
    pub rx: broadcast::Receiver<Message>,
    /// Terminal message, if one was already recorded.
    pub terminal: Option<Message>,
    /// Last progress point, for resuming clients.
    pub last_progress: Option<(f32, String)>,
}

struct SessionInner {
    last_percent: f32,
    last_status: String,
    terminal: Option<Message>,
    last_activity: Instant,
}

/// A per-job progress session.
///
/// Delivers at most one terminal message, ever; progress percentages are
/// clamped so values delivered within one session are non-decreasing. The
/// session is independent of any one transport connection: a client may
/// drop and reattach, and a terminal-but-undrained session stays readable
/// until it is swept.
pub struct ProgressSession {
    job_id: JobId,
    tx: broadcast::Sender<Message>,
    inner: StdMutex<SessionInner>,
}

impl ProgressSession {
    fn new(job_id: JobId) -> Self {
        let (tx, _) = broadcast::channel(SESSION_CHANNEL_CAPACITY);
        Self {
            job_id,
            tx,
            inner: StdMutex::new(SessionInner {
                last_percent: 0.0,
                last_status: String::new(),
                terminal: None,
                last_activity: Instant::now(),
            }),
        }
    }

    /// The job this session belongs to.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Send a progress update. Percentages never regress; anything after
    /// the terminal message is dropped.
    ///
    /// Callable from blocking worker threads.
    pub fn send_progress(&self, percent: f32, status: &str) {
        let message = {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            if inner.terminal.is_some() {
                return;
            }
            let percent = percent.max(inner.last_percent);
            inner.last_percent = percent;
            inner.last_status = status.to_string();
            inner.last_activity = Instant::now();
            Message::Progress {
                percent,
                status: status.to_string(),
            }
        };
        // No receivers is fine: the snapshot serves reattaching clients.
        let _ = self.tx.send(message);
    }

    /// Record and deliver the terminal success message.
    ///
    /// Returns false if a terminal message was already recorded.
    pub fn send_complete(&self, artifacts: StemSet) -> bool {
        self.send_terminal(Message::Complete { artifacts })
    }

    /// Record and deliver the terminal error message.
    ///
    /// Returns false if a terminal message was already recorded.
    pub fn send_error(&self, reason: &str) -> bool {
        self.send_terminal(Message::Error {
            reason: reason.to_string(),
        })
    }

    fn send_terminal(&self, message: Message) -> bool {
        {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            if inner.terminal.is_some() {
                return false;
            }
            inner.terminal = Some(message.clone());
            inner.last_activity = Instant::now();
        }
        let _ = self.tx.send(message);
        true
    }

    /// Record transport activity (e.g., a client ping).
    pub fn touch(&self) {
        self.inner.lock().expect("session lock poisoned").last_activity = Instant::now();
    }

    /// How long since the last activity on this session.
    pub fn idle_for(&self) -> Duration {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .last_activity
            .elapsed()
    }

    /// The recorded terminal message, if any.
    pub fn terminal(&self) -> Option<Message> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .terminal
            .clone()
    }

    /// Attach to the session: a live receiver plus the current snapshot.
    pub fn attach(&self) -> SessionAttach {
        let rx = self.tx.subscribe();
        let inner = self.inner.lock().expect("session lock poisoned");
        let last_progress = if inner.last_percent > 0.0 {
            Some((inner.last_percent, inner.last_status.clone()))
        } else {
            None
        };
        SessionAttach {
            rx,
            terminal: inner.terminal.clone(),
            last_progress,
        }
    }
}

/// Registry of live progress sessions, keyed by job ID.
///
/// Sessions are mutated only through explicit register/lookup/unregister
/// calls; the map is owned here and nowhere else.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<JobId, Arc<ProgressSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session for a job, returning the existing one if present.
    pub async fn register(&self, job_id: JobId) -> Arc<ProgressSession> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(job_id)
            .or_insert_with(|| Arc::new(ProgressSession::new(job_id)))
            .clone();
        debug!(%job_id, total = sessions.len(), "session registered");
        session
    }

    /// Look up the session for a job.
    pub async fn lookup(&self, job_id: JobId) -> Option<Arc<ProgressSession>> {
        self.sessions.lock().await.get(&job_id).cloned()
    }

    /// Remove a session.
    pub async fn unregister(&self, job_id: JobId) {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(&job_id).is_some() {
            debug!(%job_id, remaining = sessions.len(), "session unregistered");
        }
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Remove sessions idle beyond `max_idle`, returning how many.
    pub async fn sweep_stale(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|job_id, session| {
            let stale = session.idle_for() > max_idle;
            if stale {
                info!(%job_id, "cleaning up stale session");
            }
            !stale
        });
        before - sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stemwell_core::StemKind;

    fn sample_set() -> StemSet {
        StemSet::build(|k| format!("/stems/x/{}", k.file_name()))
    }

    #[tokio::test]
    async fn progress_is_monotonic() {
        let session = ProgressSession::new(JobId::new());
        let mut attach = session.attach();
        assert!(attach.last_progress.is_none());

        session.send_progress(20.0, "separating");
        session.send_progress(10.0, "regressed"); // clamped, not regressed
        session.send_progress(80.0, "saving");

        let mut seen = Vec::new();
        while let Ok(msg) = attach.rx.try_recv() {
            if let Message::Progress { percent, .. } = msg {
                seen.push(percent);
            }
        }
        assert_eq!(seen, vec![20.0, 20.0, 80.0]);
    }

    #[tokio::test]
    async fn at_most_one_terminal_message() {
        let session = ProgressSession::new(JobId::new());
        let mut attach = session.attach();

        assert!(session.send_complete(sample_set()));
        assert!(!session.send_error("too late"));
        session.send_progress(99.0, "ignored after terminal");

        let first = attach.rx.try_recv().unwrap();
        assert!(first.is_terminal());
        assert!(attach.rx.try_recv().is_err(), "nothing after terminal");
    }

    #[tokio::test]
    async fn attach_replays_terminal_for_late_client() {
        let session = ProgressSession::new(JobId::new());
        session.send_progress(50.0, "halfway");
        session.send_error("engine failed");

        let attach = session.attach();
        match attach.terminal {
            Some(Message::Error { reason }) => assert_eq!(reason, "engine failed"),
            other => panic!("expected terminal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn attach_resumes_from_last_progress() {
        let session = ProgressSession::new(JobId::new());
        session.send_progress(20.0, "separating");

        let attach = session.attach();
        assert_eq!(attach.last_progress, Some((20.0, "separating".to_string())));
        assert!(attach.terminal.is_none());
    }

    #[tokio::test]
    async fn registry_register_lookup_unregister() {
        let registry = SessionRegistry::new();
        let job_id = JobId::new();

        let session = registry.register(job_id).await;
        let same = registry.register(job_id).await;
        assert!(Arc::ptr_eq(&session, &same));
        assert!(registry.lookup(job_id).await.is_some());

        registry.unregister(job_id).await;
        assert!(registry.lookup(job_id).await.is_none());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn registry_sweeps_stale_sessions() {
        let registry = SessionRegistry::new();
        let keep = registry.register(JobId::new()).await;
        registry.register(JobId::new()).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        keep.touch();

        let removed = registry.sweep_stale(Duration::from_millis(20)).await;
        assert_eq!(removed, 1);
        assert_eq!(registry.len().await, 1);
    }
}
