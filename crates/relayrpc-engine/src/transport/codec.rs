//! Frame <-> engine bytes.
//!
//! Inbound data frames go to the engine untouched (the classifier owns all
//! parsing). Outbound payloads are queued on the connection's writer channel
//! without waiting.

use axum::extract::ws::Message;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::dispatch::Egress;
use crate::error::BoxError;

/// What the session loop does with one inbound frame.
#[derive(Debug)]
pub enum Inbound {
    Data(Bytes),
    Ping(Vec<u8>),
    Pong,
    Close,
}

pub fn decode(msg: Message) -> Inbound {
    match msg {
        Message::Text(s) => Inbound::Data(Bytes::from(s)),
        Message::Binary(b) => Inbound::Data(Bytes::from(b)),
        Message::Ping(v) => Inbound::Ping(v),
        Message::Pong(_) => Inbound::Pong,
        Message::Close(_) => Inbound::Close,
    }
}

/// Cheap length check before anything is copied.
pub fn frame_len(msg: &Message) -> usize {
    match msg {
        Message::Text(s) => s.len(),
        Message::Binary(b) => b.len(),
        Message::Ping(v) | Message::Pong(v) => v.len(),
        Message::Close(_) => 0,
    }
}

/// UTF-8 payloads go out as text frames, anything else as binary.
pub fn encode(payload: Bytes) -> Message {
    match String::from_utf8(payload.to_vec()) {
        Ok(s) => Message::Text(s),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

/// Egress that feeds a connection's outbound writer.
///
/// Never blocks the caller: a full writer queue fails the write, which the
/// engine logs.
#[derive(Debug, Clone)]
pub struct ChannelEgress {
    tx: mpsc::Sender<Message>,
}

impl ChannelEgress {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }
}

impl Egress for ChannelEgress {
    fn write(&self, tracking_id: &str, code: i32, payload: Bytes) -> Result<(), BoxError> {
        tracing::trace!(tracking_id, code, len = payload.len(), "outbound frame");
        self.tx.try_send(encode(payload)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => "outbound queue full".into(),
            mpsc::error::TrySendError::Closed(_) => "connection closed".into(),
        })
    }
}
