//! Append-only audit trail.
//!
//! Every payload that enters the verification pipeline produces exactly one
//! [`TrafficLogEntry`]; every integrity violation additionally produces a
//! [`SecurityIncident`]. Where those end up is somebody else's problem: the
//! [`AuditStore`] and [`IncidentStore`] traits are opaque write targets.
//!
//! ## Best effort, by contract
//!
//! The verdict returned to a caller never depends on audit durability.
//! [`AuditSink::record`] updates the in-memory counters and recent window
//! synchronously, then queues persistence for a single writer task (or runs
//! it inline when there is no Tokio runtime). One writer drains the queue in
//! order, so the stores see records in verdict order. The queue is bounded:
//! when it is full the record is dropped and counted as a failure. A failed
//! write is logged, counted and reported to the optional failure hook, and
//! that is the end of it.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::{AUDIT_FAILURE_ESCALATION, AUDIT_QUEUE_CAPACITY};
use crate::error::AuditError;
use crate::message::{Direction, VerificationStatus};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One verification attempt, whatever its outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficLogEntry {
    pub direction: Direction,
    pub transaction_id: String,
    pub payload_hash: String,
    pub status: VerificationStatus,
    #[serde(rename = "sourceIP", skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A tamper event, for the security-incident sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIncident {
    pub id: Uuid,
    pub transaction_id: String,
    #[serde(rename = "sourceIP", skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    pub reason: String,
    pub payload_hash: String,
    pub detected_at: DateTime<Utc>,
}

impl SecurityIncident {
    pub fn new(
        transaction_id: impl Into<String>,
        source_ip: Option<IpAddr>,
        reason: impl Into<String>,
        payload_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: transaction_id.into(),
            source_ip,
            reason: reason.into(),
            payload_hash: payload_hash.into(),
            detected_at: Utc::now(),
        }
    }
}

/// Aggregate verdict counts since the sink was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub verified: u64,
    pub tampered: u64,
    pub rejected: u64,
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// Append-only destination for traffic entries.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &TrafficLogEntry) -> Result<(), AuditError>;
}

/// Destination for security incidents.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn report(&self, incident: &SecurityIncident) -> Result<(), AuditError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Vec-backed store. Handy for tests and for embedding the bridge without
/// any persistence at all.
#[derive(Debug)]
pub struct MemoryStore<T> {
    records: Mutex<Vec<T>>,
}

impl<T: Clone> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<T> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for MemoryStore<TrafficLogEntry> {
    async fn append(&self, entry: &TrafficLogEntry) -> Result<(), AuditError> {
        self.records.lock().push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl IncidentStore for MemoryStore<SecurityIncident> {
    async fn report(&self, incident: &SecurityIncident) -> Result<(), AuditError> {
        self.records.lock().push(incident.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON-lines file store
// ---------------------------------------------------------------------------

/// Appends one JSON object per line to a file. Never rewrites or truncates.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append_line<R: Serialize>(&self, record: &R) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let path = self.path.clone();
        let lock = Arc::clone(&self.write_lock);
        let write = move || -> Result<(), AuditError> {
            use std::io::Write;
            let _guard = lock.lock();
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(&line)?;
            Ok(())
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            tokio::task::spawn_blocking(write)
                .await
                .map_err(|e| AuditError::Unavailable(format!("writer task failed: {}", e)))?
        } else {
            write()
        }
    }
}

#[async_trait]
impl AuditStore for JsonLinesStore {
    async fn append(&self, entry: &TrafficLogEntry) -> Result<(), AuditError> {
        self.append_line(entry).await
    }
}

#[async_trait]
impl IncidentStore for JsonLinesStore {
    async fn report(&self, incident: &SecurityIncident) -> Result<(), AuditError> {
        self.append_line(incident).await
    }
}

// ---------------------------------------------------------------------------
// AuditSink
// ---------------------------------------------------------------------------

/// Called on every persistence failure. Wire this to a metric.
pub type FailureHook = Arc<dyn Fn(&AuditError) + Send + Sync>;

/// Failure bookkeeping shared with background persistence tasks.
struct FailureTracker {
    consecutive: AtomicU64,
    total: AtomicU64,
    hook: Option<FailureHook>,
}

impl FailureTracker {
    fn observe(&self, what: &'static str, result: Result<(), AuditError>) {
        match result {
            Ok(()) => self.consecutive.store(0, Ordering::Relaxed),
            Err(e) => {
                let streak = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
                self.total.fetch_add(1, Ordering::Relaxed);
                if streak >= AUDIT_FAILURE_ESCALATION {
                    error!(what, streak, error = %e, "audit persistence keeps failing");
                } else {
                    warn!(what, error = %e, "audit persistence failed");
                }
                if let Some(hook) = &self.hook {
                    hook(&e);
                }
            }
        }
    }
}

/// A record waiting for the writer task.
enum PersistJob {
    Traffic(TrafficLogEntry),
    Incident(SecurityIncident),
}

impl PersistJob {
    fn kind(&self) -> &'static str {
        match self {
            PersistJob::Traffic(_) => "traffic",
            PersistJob::Incident(_) => "incident",
        }
    }
}

/// The stores plus failure bookkeeping, as handed to the writer.
struct Persistence {
    traffic_store: Option<Arc<dyn AuditStore>>,
    incident_store: Option<Arc<dyn IncidentStore>>,
    failures: Arc<FailureTracker>,
}

impl Persistence {
    async fn run(&self, job: PersistJob) {
        match job {
            PersistJob::Traffic(entry) => {
                if let Some(store) = &self.traffic_store {
                    self.failures.observe("traffic", store.append(&entry).await);
                }
            }
            PersistJob::Incident(incident) => {
                if let Some(store) = &self.incident_store {
                    self.failures.observe("incident", store.report(&incident).await);
                }
            }
        }
    }
}

/// Front door of the audit trail.
pub struct AuditSink {
    traffic_store: Option<Arc<dyn AuditStore>>,
    incident_store: Option<Arc<dyn IncidentStore>>,
    recent: Mutex<VecDeque<TrafficLogEntry>>,
    recent_window: usize,
    verified: AtomicU64,
    rejected: AtomicU64,
    tampered: AtomicU64,
    failures: Arc<FailureTracker>,
    queue_capacity: usize,
    writer: OnceLock<mpsc::Sender<PersistJob>>,
    pending: Arc<AtomicUsize>,
}

impl AuditSink {
    /// A sink that only keeps counters and the recent window in memory.
    pub fn in_memory(recent_window: usize) -> Self {
        Self {
            traffic_store: None,
            incident_store: None,
            recent: Mutex::new(VecDeque::with_capacity(recent_window)),
            recent_window,
            verified: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            tampered: AtomicU64::new(0),
            failures: Arc::new(FailureTracker {
                consecutive: AtomicU64::new(0),
                total: AtomicU64::new(0),
                hook: None,
            }),
            queue_capacity: AUDIT_QUEUE_CAPACITY,
            writer: OnceLock::new(),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Persists traffic entries to `store`.
    pub fn with_traffic_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.traffic_store = Some(store);
        self
    }

    /// Persists security incidents to `store`.
    pub fn with_incident_store(mut self, store: Arc<dyn IncidentStore>) -> Self {
        self.incident_store = Some(store);
        self
    }

    /// Bounds the number of records waiting for the writer. Minimum 1.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Installs a callback invoked on every persistence failure.
    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.failures = Arc::new(FailureTracker {
            consecutive: AtomicU64::new(0),
            total: AtomicU64::new(0),
            hook: Some(hook),
        });
        self
    }

    /// Records one verification attempt. Never fails, never waits on I/O
    /// when called from inside a Tokio runtime.
    pub fn record(&self, entry: TrafficLogEntry) {
        let counter = match entry.status {
            VerificationStatus::Verified => &self.verified,
            VerificationStatus::Rejected => &self.rejected,
            VerificationStatus::Tampered => &self.tampered,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if self.recent_window > 0 {
            let mut recent = self.recent.lock();
            if recent.len() == self.recent_window {
                recent.pop_front();
            }
            recent.push_back(entry.clone());
        }

        if self.traffic_store.is_some() {
            self.dispatch(PersistJob::Traffic(entry));
        }
    }

    /// Reports a tamper event to the incident store.
    pub fn report_incident(&self, incident: SecurityIncident) {
        if self.incident_store.is_some() {
            self.dispatch(PersistJob::Incident(incident));
        }
    }

    fn persistence(&self) -> Persistence {
        Persistence {
            traffic_store: self.traffic_store.clone(),
            incident_store: self.incident_store.clone(),
            failures: Arc::clone(&self.failures),
        }
    }

    /// The writer queue, started on first use inside a runtime.
    fn writer(&self) -> Option<&mpsc::Sender<PersistJob>> {
        if let Some(tx) = self.writer.get() {
            return Some(tx);
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        Some(self.writer.get_or_init(|| {
            let (tx, mut rx) = mpsc::channel::<PersistJob>(self.queue_capacity);
            let persistence = self.persistence();
            let pending = Arc::clone(&self.pending);
            handle.spawn(async move {
                while let Some(job) = rx.recv().await {
                    persistence.run(job).await;
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
                debug!("audit writer stopped");
            });
            tx
        }))
    }

    fn dispatch(&self, job: PersistJob) {
        let Some(tx) = self.writer() else {
            futures::executor::block_on(self.persistence().run(job));
            return;
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = tx.try_send(job) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            let (reason, job) = match e {
                mpsc::error::TrySendError::Full(job) => ("audit queue full", job),
                mpsc::error::TrySendError::Closed(job) => ("audit writer stopped", job),
            };
            self.failures
                .observe(job.kind(), Err(AuditError::Unavailable(reason.into())));
        }
    }

    /// Waits until every queued persistence job has been written.
    pub async fn flush(&self) {
        while self.pending.load(Ordering::SeqCst) > 0 {
            tokio::task::yield_now().await;
        }
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts {
            verified: self.verified.load(Ordering::Relaxed),
            tampered: self.tampered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Up to `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<TrafficLogEntry> {
        self.recent.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Total persistence failures since creation.
    pub fn persistence_failures(&self) -> u64 {
        self.failures.total.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("counts", &self.counts())
            .field("recent_window", &self.recent_window)
            .field("persistence_failures", &self.persistence_failures())
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}
