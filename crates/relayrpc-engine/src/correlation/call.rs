//! Outbound calls: write a request through egress and wait for the reply the
//! peer sends back through `ingest`.

use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use relayrpc_core::Envelope;

use crate::dispatch::{Engine, TrackingId};
use crate::error::{EngineError, Result};

use super::store::{PendingGuard, ReplySlot};

// Pending entries outlive the caller's deadline by at least this much.
const TTL_MARGIN: Duration = Duration::from_secs(1);

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline; the engine's `call_timeout_ms` when unset.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Store key for an outbound call. A `null` id can never be correlated.
fn call_key(request: &Envelope) -> Result<String> {
    match &request.id {
        None | Some(Value::Null) => Err(EngineError::MissingId),
        Some(id) => Ok(relayrpc_core::correlation_key(id)),
    }
}

impl Engine {
    pub async fn call(&self, request: Envelope) -> Result<Envelope> {
        self.call_with(request, CallOptions::default()).await
    }

    pub async fn call_with(&self, request: Envelope, opts: CallOptions) -> Result<Envelope> {
        self.shared().egress().ok_or(EngineError::NoEgress)?;
        let key = call_key(&request)?;
        let payload = self.shared().stamp(request).to_vec().map_err(|e| EngineError::Encode(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel(1);
        self.round_trip(key, ReplySlot::Single(tx), payload, &mut rx, opts).await
    }

    pub async fn call_batch(&self, requests: Vec<Envelope>) -> Result<Vec<Envelope>> {
        self.call_batch_with(requests, CallOptions::default()).await
    }

    /// Batch call keyed by the first message's id. The reply is the whole
    /// response array the peer sends back.
    pub async fn call_batch_with(&self, requests: Vec<Envelope>, opts: CallOptions) -> Result<Vec<Envelope>> {
        self.shared().egress().ok_or(EngineError::NoEgress)?;
        let first = requests.first().ok_or(EngineError::EmptyBatch)?;
        let key = call_key(first)?;

        let shared = self.shared();
        let stamped: Vec<Envelope> = requests.into_iter().map(|e| shared.stamp(e)).collect();
        let payload = serde_json::to_vec(&stamped).map_err(|e| EngineError::Encode(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel(1);
        self.round_trip(key, ReplySlot::Batch(tx), payload, &mut rx, opts).await
    }

    /// Fire-and-forget write. No pending entry is created; the write is tagged
    /// with the message id, or a fresh tracking id when there is none.
    pub fn notify(&self, message: Envelope) -> Result<()> {
        let egress = self.shared().egress().ok_or(EngineError::NoEgress)?;
        let tag = message
            .key()
            .unwrap_or_else(|| TrackingId::new().into_string());
        let payload = self.shared().stamp(message).to_vec().map_err(|e| EngineError::Encode(e.to_string()))?;
        egress
            .write(&tag, 0, Bytes::from(payload))
            .map_err(|e| EngineError::Egress(e.to_string()))
    }

    async fn round_trip<T>(
        &self,
        key: String,
        slot: ReplySlot,
        payload: Vec<u8>,
        rx: &mut mpsc::Receiver<T>,
        opts: CallOptions,
    ) -> Result<T> {
        let shared = self.shared();
        let egress = shared.egress().ok_or(EngineError::NoEgress)?;
        if self.is_shutdown() {
            return Err(EngineError::Closed);
        }

        let timeout = opts.timeout.unwrap_or_else(|| shared.cfg.call_timeout());
        let ttl = shared.cfg.pending_ttl().max(timeout.saturating_add(TTL_MARGIN));

        // Registered before the write so a fast reply cannot miss it.
        let guard = PendingGuard::register(&shared.store, key, slot, ttl);

        egress
            .write(guard.key(), 0, Bytes::from(payload))
            .map_err(|e| EngineError::Egress(e.to_string()))?;

        let cancelled = async {
            match &opts.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            reply = rx.recv() => reply.ok_or(EngineError::Closed),
            () = tokio::time::sleep(timeout) => Err(EngineError::Timeout),
            () = cancelled => Err(EngineError::Cancelled),
        };

        if let Err(e) = &outcome {
            debug!(key = guard.key(), reason = e.as_str(), "call ended without reply");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use super::*;
    use crate::BoxError;

    #[tokio::test(start_paused = true)]
    async fn ttl_eviction_does_not_wake_caller() {
        let engine = Engine::builder()
            .egress(|_: &str, _: i32, _: Bytes| Ok::<_, BoxError>(()))
            .build()
            .unwrap();
        let start = tokio::time::Instant::now();
        let caller = engine.clone();
        let call = tokio::spawn(async move {
            caller
                .call_with(
                    Envelope::request_with_id("x", "t"),
                    CallOptions::timeout(Duration::from_millis(300)),
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let store = Arc::clone(&engine.shared().store);
        let slot = store.get("\"t\"").unwrap();
        // Same slot, far shorter life than the caller's deadline.
        store.put("\"t\"", slot, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.sweep_expired(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!call.is_finished());

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, EngineError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
