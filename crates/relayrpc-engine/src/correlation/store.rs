//! Pending-call store: correlation key -> reply slot, with a fixed TTL.
//!
//! Lookups never extend an entry's lifetime. Expired entries are invisible to
//! `get`/`deliver` and are physically removed by the sweeper.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use relayrpc_core::Envelope;

/// Where a reply for one pending call goes.
#[derive(Debug, Clone)]
pub enum ReplySlot {
    Single(mpsc::Sender<Envelope>),
    Batch(mpsc::Sender<Vec<Envelope>>),
}

/// A reply on its way to a slot.
#[derive(Debug)]
pub enum Reply {
    Single(Envelope),
    Batch(Vec<Envelope>),
}

/// What happened to a reply handed to `deliver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No live entry under the key (never registered, expired, or already answered).
    Unknown,
    /// Single reply for a batch call or the other way round.
    Mismatch,
    /// The caller is gone or its slot is already full.
    Dropped,
}

#[derive(Debug)]
struct Entry {
    slot: ReplySlot,
    expires_at: Instant,
    seq: u64,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
pub struct PendingStore {
    entries: DashMap<String, Entry>,
    seq: AtomicU64,
}

// Far enough out to never expire in practice.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) the entry for `key`. Returns the entry generation,
    /// used by `remove_if_seq` so a stale guard cannot remove a newer entry.
    pub fn put(&self, key: impl Into<String>, slot: ReplySlot, ttl: Duration) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            slot,
            expires_at: deadline(ttl),
            seq,
        };
        if self.entries.insert(key.into(), entry).is_some() {
            tracing::debug!("pending entry replaced");
        }
        seq
    }

    pub fn get(&self, key: &str) -> Option<ReplySlot> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.live(now))
            .map(|e| e.slot.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn remove_if_seq(&self, key: &str, seq: u64) -> bool {
        self.entries.remove_if(key, |_, e| e.seq == seq).is_some()
    }

    /// Physically stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry; returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Hand `reply` to the live entry under `key` without blocking.
    ///
    /// A delivered entry is removed, so duplicates and late replies come back
    /// as `Unknown`.
    pub fn deliver(&self, key: &str, reply: Reply) -> Delivery {
        let now = Instant::now();
        let removed = self.entries.remove_if(key, |_, e| {
            e.live(now)
                && matches!(
                    (&e.slot, &reply),
                    (ReplySlot::Single(_), Reply::Single(_)) | (ReplySlot::Batch(_), Reply::Batch(_))
                )
        });

        let Some((_, entry)) = removed else {
            return if self.get(key).is_some() {
                Delivery::Mismatch
            } else {
                Delivery::Unknown
            };
        };

        let sent = match (entry.slot, reply) {
            (ReplySlot::Single(tx), Reply::Single(env)) => tx.try_send(env).is_ok(),
            (ReplySlot::Batch(tx), Reply::Batch(envs)) => tx.try_send(envs).is_ok(),
            _ => false,
        };
        if sent {
            Delivery::Delivered
        } else {
            Delivery::Dropped
        }
    }
}

/// Removes its pending entry when dropped, whatever path the caller exits by
/// (reply, timeout, cancellation, or the future being dropped).
///
/// Holds its own clone of the slot sender, so sweeping the entry never closes
/// the caller's receiver early; the caller still ends on its own deadline.
pub struct PendingGuard {
    store: Arc<PendingStore>,
    key: String,
    seq: u64,
    _slot: ReplySlot,
}

impl PendingGuard {
    pub fn register(store: &Arc<PendingStore>, key: String, slot: ReplySlot, ttl: Duration) -> Self {
        let seq = store.put(key.clone(), slot.clone(), ttl);
        Self {
            store: Arc::clone(store),
            key,
            seq,
            _slot: slot,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.store.remove_if_seq(&self.key, self.seq);
    }
}

/// Periodic expiry sweep; returns when `cancel` fires.
pub async fn run_sweeper(store: Arc<PendingStore>, every: Duration, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let n = store.sweep_expired();
                if n > 0 {
                    tracing::debug!(expired = n, "pending entries swept");
                }
            }
        }
    }
    tracing::debug!("sweeper stopped");
}
