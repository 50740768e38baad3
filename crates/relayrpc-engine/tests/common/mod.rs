#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use relayrpc_engine::config::EngineSection;
use relayrpc_engine::{BoxError, Engine};

/// One egress write as seen by the transport.
#[derive(Debug)]
pub struct Written {
    pub tracking_id: String,
    pub code: i32,
    pub payload: Bytes,
}

impl Written {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.payload.to_vec()).unwrap()
    }
}

pub fn engine_with(cfg: EngineSection) -> (Engine, mpsc::UnboundedReceiver<Written>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = Engine::builder()
        .config(cfg)
        .egress(move |tid: &str, code: i32, payload: Bytes| {
            tx.send(Written {
                tracking_id: tid.to_string(),
                code,
                payload,
            })
            .map_err(|e| BoxError::from(e.to_string()))
        })
        .build()
        .unwrap();
    (engine, rx)
}

pub fn engine() -> (Engine, mpsc::UnboundedReceiver<Written>) {
    engine_with(EngineSection::default())
}

pub async fn next(rx: &mut mpsc::UnboundedReceiver<Written>) -> Written {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no egress write within 2s")
        .expect("egress channel closed")
}

/// Asserts nothing is written for a short while.
pub async fn quiet(rx: &mut mpsc::UnboundedReceiver<Written>) {
    let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(got.is_err(), "unexpected egress write: {got:?}");
}
