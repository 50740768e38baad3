//! Handler workers.
//!
//! A fixed set of workers share one bounded job queue. The consumer only
//! classifies and routes; every handler call happens here.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use relayrpc_core::{Checked, Envelope, ErrorCode, Kind};

use crate::error::EngineError;

use super::engine::{Shared, TrackingId};
use super::registry::Invocation;

/// Unit of work handed from the consumer to the pool.
#[derive(Debug)]
pub(crate) enum Job {
    Single {
        tracking_id: TrackingId,
        request: Envelope,
    },
    Batch {
        tracking_id: TrackingId,
        items: Vec<Checked>,
    },
}

pub(crate) type JobQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

pub(crate) struct Worker {
    id: usize,
    shared: Arc<Shared>,
    jobs: JobQueue,
}

impl Worker {
    pub(crate) fn new(id: usize, shared: Arc<Shared>, jobs: JobQueue) -> Self {
        Self { id, shared, jobs }
    }

    /// Pull jobs until the queue closes or `cancel` fires. A job already taken
    /// runs to completion.
    pub(crate) async fn run(self, cancel: CancellationToken) {
        loop {
            let next = {
                let mut rx = self.jobs.lock().await;
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    job = rx.recv() => job,
                }
            };
            let Some(job) = next else { break };
            self.process(job).await;
        }
        debug!(worker_id = self.id, "worker stopped");
    }

    async fn process(&self, job: Job) {
        match job {
            Job::Single {
                tracking_id,
                request,
            } => {
                if let Some((code, resp)) = self.invoke(&tracking_id, request).await {
                    self.shared.emit(tracking_id.as_str(), code, resp);
                }
            }
            Job::Batch { tracking_id, items } => self.process_batch(tracking_id, items).await,
        }
    }

    /// Returns the reply to write and its code, or `None` for "no reply".
    async fn invoke(&self, tracking_id: &TrackingId, request: Envelope) -> Option<(i32, Envelope)> {
        let method = request.method.clone();
        let id = request.id.clone();

        // A panicking handler costs one reply, not the worker.
        let inv = match AssertUnwindSafe(self.shared.registry.invoke(request))
            .catch_unwind()
            .await
        {
            Ok(inv) => inv,
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                error!(
                    worker_id = self.id,
                    tracking_id = %tracking_id,
                    method = %method,
                    reason = %reason,
                    "handler panicked"
                );
                let code = ErrorCode::InternalError;
                Invocation {
                    response: id.map(|id| Envelope::error(id, code)),
                    code: code.code(),
                    error: Some(EngineError::Handler(format!("handler panicked: {reason}").into())),
                }
            }
        };
        if let Some(err) = &inv.error {
            warn!(
                worker_id = self.id,
                tracking_id = %tracking_id,
                method = %method,
                code = inv.code,
                kind = err.as_str(),
                error = %err,
                "request failed"
            );
        }
        inv.response.map(|resp| (inv.code, resp))
    }

    async fn process_batch(&self, tracking_id: TrackingId, items: Vec<Checked>) {
        let mut out = Vec::with_capacity(items.len());
        let mut code = 0;

        for item in items {
            let outcome = match (item.kind, item.envelope.clone()) {
                (Kind::Request, Some(request)) if item.is_valid() => {
                    self.invoke(&tracking_id, request).await
                }
                _ if item.expects_reply() => item.error_response().map(|e| (item.code(), e)),
                _ => None,
            };
            if let Some((c, resp)) = outcome {
                if code == 0 {
                    code = c;
                }
                out.push(resp);
            }
        }

        if out.is_empty() {
            debug!(tracking_id = %tracking_id, "batch produced no replies");
            return;
        }
        self.shared.emit_batch(tracking_id.as_str(), code, out);
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}
