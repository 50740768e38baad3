//! Dispatch engine: ingestion queue, consumer loop and egress fan-out.

use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use relayrpc_core::{
    batch_kind, classify, BatchKind, Checked, Classified, Envelope, ErrorCode, Kind,
};

use crate::config::EngineSection;
use crate::correlation::{Delivery, PendingStore, Reply};
use crate::error::{EngineError, Result};

use super::egress::Egress;
use super::pool::{Job, Worker};
use super::registry::{HandlerResult, MethodHandler, MethodRegistry};

/// Opaque id assigned to every ingested message; distinct from any protocol id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackingId(String);

impl TrackingId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Default for TrackingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct Inbound {
    tracking_id: TrackingId,
    payload: Bytes,
}

/// State shared by the consumer, the workers and sync callers.
pub(crate) struct Shared {
    pub(crate) cfg: EngineSection,
    pub(crate) registry: Arc<MethodRegistry>,
    pub(crate) store: Arc<PendingStore>,
    egress: OnceLock<Arc<dyn Egress>>,
}

impl Shared {
    pub(crate) fn egress(&self) -> Option<&Arc<dyn Egress>> {
        self.egress.get()
    }

    /// Apply the outbound version tag when compat mode is on.
    pub(crate) fn stamp(&self, env: Envelope) -> Envelope {
        if self.cfg.jsonrpc_compat {
            env.with_version()
        } else {
            env
        }
    }

    pub(crate) fn emit(&self, tracking_id: &str, code: i32, env: Envelope) {
        match self.stamp(env).to_vec() {
            Ok(payload) => self.write(tracking_id, code, payload),
            Err(e) => warn!(tracking_id, error = %e, "reply encode failed"),
        }
    }

    pub(crate) fn emit_batch(&self, tracking_id: &str, code: i32, envs: Vec<Envelope>) {
        let envs: Vec<Envelope> = envs.into_iter().map(|e| self.stamp(e)).collect();
        match serde_json::to_vec(&envs) {
            Ok(payload) => self.write(tracking_id, code, payload),
            Err(e) => warn!(tracking_id, error = %e, "batch reply encode failed"),
        }
    }

    // Egress failures are logged here and never reach the loop.
    fn write(&self, tracking_id: &str, code: i32, payload: Vec<u8>) {
        let Some(egress) = self.egress() else {
            warn!(tracking_id, code, "reply dropped: no egress configured");
            return;
        };
        if let Err(e) = egress.write(tracking_id, code, Bytes::from(payload)) {
            warn!(tracking_id, code, error = %e, "egress write failed");
        }
    }
}

struct EngineInner {
    shared: Arc<Shared>,
    ingest_tx: mpsc::Sender<Inbound>,
    shutdown: CancellationToken,
    // Stops the background tasks once the last engine handle goes away.
    _guard: DropGuard,
}

/// Message dispatch engine. Cheap to clone; clones share one pipeline.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("pending", &self.pending_len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

pub struct EngineBuilder {
    cfg: EngineSection,
    registry: Option<Arc<MethodRegistry>>,
    egress: Option<Arc<dyn Egress>>,
    parent: Option<CancellationToken>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            cfg: EngineSection::default(),
            registry: None,
            egress: None,
            parent: None,
        }
    }
}

impl EngineBuilder {
    pub fn config(mut self, cfg: EngineSection) -> Self {
        self.cfg = cfg;
        self
    }

    /// Share a registry with other engines (e.g. one per connection).
    pub fn registry(mut self, registry: Arc<MethodRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn egress<E: Egress>(mut self, egress: E) -> Self {
        self.egress = Some(Arc::new(egress));
        self
    }

    pub fn egress_arc(mut self, egress: Arc<dyn Egress>) -> Self {
        self.egress = Some(egress);
        self
    }

    /// The engine shuts down when `parent` is cancelled.
    pub fn shutdown_token(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Validate the config and start the consumer, the workers and the
    /// sweeper. Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Engine> {
        self.cfg.validate()?;

        let egress = OnceLock::new();
        if let Some(e) = self.egress {
            let _ = egress.set(e);
        }

        let shared = Arc::new(Shared {
            registry: self.registry.unwrap_or_default(),
            store: Arc::new(PendingStore::new()),
            egress,
            cfg: self.cfg,
        });

        let shutdown = match self.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };

        let (ingest_tx, ingest_rx) = mpsc::channel(shared.cfg.queue_capacity);
        let (job_tx, job_rx) = mpsc::channel(shared.cfg.job_queue_capacity);
        let jobs = Arc::new(Mutex::new(job_rx));

        for id in 0..shared.cfg.workers {
            let worker = Worker::new(id, Arc::clone(&shared), Arc::clone(&jobs));
            tokio::spawn(worker.run(shutdown.clone()));
        }

        tokio::spawn(run_consumer(
            Arc::clone(&shared),
            ingest_rx,
            job_tx,
            shutdown.clone(),
        ));

        tokio::spawn(crate::correlation::run_sweeper(
            Arc::clone(&shared.store),
            shared.cfg.sweep_interval(),
            shutdown.clone(),
        ));

        info!(
            workers = shared.cfg.workers,
            queue_capacity = shared.cfg.queue_capacity,
            "engine started"
        );

        Ok(Engine {
            inner: Arc::new(EngineInner {
                shared,
                ingest_tx,
                _guard: shutdown.clone().drop_guard(),
                shutdown,
            }),
        })
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine with default settings, a fresh registry and no egress yet.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    pub fn config(&self) -> &EngineSection {
        &self.inner.shared.cfg
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.inner.shared.registry
    }

    pub fn register<H>(&self, name: impl Into<String>, handler: H)
    where
        H: MethodHandler + 'static,
    {
        self.registry().register(name, handler);
    }

    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry().register_fn(name, f);
    }

    /// Install the egress callback. Allowed once per engine.
    pub fn set_egress<E: Egress>(&self, egress: E) -> Result<()> {
        self.inner
            .shared
            .egress
            .set(Arc::new(egress))
            .map_err(|_| EngineError::EgressAlreadySet)
    }

    /// Queue one inbound message, waiting while the queue is full.
    pub async fn ingest(&self, payload: impl Into<Bytes>) -> Result<TrackingId> {
        let tracking_id = TrackingId::new();
        let inbound = Inbound {
            tracking_id: tracking_id.clone(),
            payload: payload.into(),
        };
        tokio::select! {
            biased;
            () = self.inner.shutdown.cancelled() => Err(EngineError::Closed),
            res = self.inner.ingest_tx.send(inbound) => {
                res.map_err(|_| EngineError::Closed)?;
                Ok(tracking_id)
            }
        }
    }

    /// Queue one inbound message or fail right away with `QueueFull`.
    pub fn try_ingest(&self, payload: impl Into<Bytes>) -> Result<TrackingId> {
        if self.is_shutdown() {
            return Err(EngineError::Closed);
        }
        let tracking_id = TrackingId::new();
        let inbound = Inbound {
            tracking_id: tracking_id.clone(),
            payload: payload.into(),
        };
        self.inner.ingest_tx.try_send(inbound).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EngineError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => EngineError::Closed,
        })?;
        Ok(tracking_id)
    }

    /// Stop the consumer, the workers and the sweeper. Handlers already
    /// running finish; callers waiting in `call` keep their own deadline.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("engine shutting down");
        }
        self.inner.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Pending outbound calls currently stored (expired ones until swept).
    pub fn pending_len(&self) -> usize {
        self.inner.shared.store.len()
    }
}

async fn run_consumer(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<Inbound>,
    jobs: mpsc::Sender<Job>,
    cancel: CancellationToken,
) {
    loop {
        let inbound = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(m) => m,
                None => break,
            },
        };

        // The consumer never waits on the pool; a full job queue is answered
        // with ServerBusy.
        if let Some(job) = route(&shared, inbound) {
            match jobs.try_send(job) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(job)) => reject_busy(&shared, job),
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("job queue closed");
                    break;
                }
            }
        }
    }
    debug!("consumer stopped");
}

/// Classify one inbound message. Anything that needs a handler comes back as
/// a job; everything else is answered or delivered here.
fn route(shared: &Shared, inbound: Inbound) -> Option<Job> {
    let Inbound {
        tracking_id,
        payload,
    } = inbound;

    match classify(&payload, shared.registry.as_ref()) {
        Classified::Rejected(checked) => {
            debug!(tracking_id = %tracking_id, code = checked.code(), "message rejected");
            reply_invalid(shared, &tracking_id, &checked);
            None
        }
        Classified::Single(checked) => match (checked.kind, checked.envelope) {
            (Kind::Request, Some(request)) => Some(Job::Single {
                tracking_id,
                request,
            }),
            (Kind::Response, Some(response)) => {
                deliver_single(shared, &tracking_id, response);
                None
            }
            (_, envelope) => {
                let checked = Checked {
                    envelope,
                    ..checked
                };
                if checked.expects_reply() {
                    reply_invalid(shared, &tracking_id, &checked);
                } else {
                    debug!(tracking_id = %tracking_id, code = checked.code(), "invalid notification dropped");
                }
                None
            }
        },
        Classified::Batch(items) => match batch_kind(&items) {
            BatchKind::Requests => Some(Job::Batch { tracking_id, items }),
            BatchKind::Responses => {
                deliver_batch(shared, &tracking_id, items);
                None
            }
            BatchKind::Mixed => {
                debug!(tracking_id = %tracking_id, "mixed batch rejected");
                let code = ErrorCode::InvalidRequest;
                shared.emit(tracking_id.as_str(), code.code(), Envelope::error(Value::Null, code));
                None
            }
        },
    }
}

/// Answer a job the pool had no room for.
fn reject_busy(shared: &Shared, job: Job) {
    let code = ErrorCode::ServerBusy;
    match job {
        Job::Single {
            tracking_id,
            request,
        } => {
            warn!(tracking_id = %tracking_id, method = %request.method, "worker pool saturated");
            if let Some(id) = request.id {
                shared.emit(tracking_id.as_str(), code.code(), Envelope::error(id, code));
            }
        }
        Job::Batch { tracking_id, items } => {
            warn!(tracking_id = %tracking_id, len = items.len(), "worker pool saturated");
            if items.iter().any(Checked::expects_reply) {
                shared.emit(tracking_id.as_str(), code.code(), Envelope::error(Value::Null, code));
            }
        }
    }
}

fn reply_invalid(shared: &Shared, tracking_id: &TrackingId, checked: &Checked) {
    if let Some(resp) = checked.error_response() {
        shared.emit(tracking_id.as_str(), checked.code(), resp);
    }
}

fn deliver_single(shared: &Shared, tracking_id: &TrackingId, response: Envelope) {
    let Some(key) = response.key() else {
        return;
    };
    let outcome = shared.store.deliver(&key, Reply::Single(response));
    log_delivery(tracking_id, &key, outcome);
}

/// Valid responses go out as one unit to the call keyed by element 0's id.
fn deliver_batch(shared: &Shared, tracking_id: &TrackingId, items: Vec<Checked>) {
    let key = items
        .first()
        .and_then(|c| c.envelope.as_ref())
        .and_then(Envelope::key);

    let mut responses = Vec::with_capacity(items.len());
    for item in items {
        match (item.kind, item.envelope) {
            (Kind::Response, Some(env)) => responses.push(env),
            (_, env) => {
                let id = env.map(|e| e.id_or_null()).unwrap_or(Value::Null);
                warn!(tracking_id = %tracking_id, id = %id, "invalid element left out of response batch");
            }
        }
    }

    let Some(key) = key else {
        warn!(tracking_id = %tracking_id, "response batch without a leading id dropped");
        return;
    };
    let outcome = shared.store.deliver(&key, Reply::Batch(responses));
    log_delivery(tracking_id, &key, outcome);
}

fn log_delivery(tracking_id: &TrackingId, key: &str, outcome: Delivery) {
    match outcome {
        Delivery::Delivered => debug!(tracking_id = %tracking_id, key, "reply delivered"),
        Delivery::Unknown => debug!(tracking_id = %tracking_id, key, "unmatched reply dropped"),
        Delivery::Mismatch => warn!(tracking_id = %tracking_id, key, "reply shape does not match pending call"),
        Delivery::Dropped => debug!(tracking_id = %tracking_id, key, "caller gone, reply dropped"),
    }
}
