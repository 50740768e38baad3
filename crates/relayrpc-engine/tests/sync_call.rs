#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use relayrpc_core::Envelope;
use relayrpc_engine::{BoxError, CallOptions, Engine, EngineError};

use common::{engine, next};

/// Peer that answers every written request with `{"id": <same>, "result": <params>}`.
fn spawn_peer(engine: Engine, mut rx: tokio::sync::mpsc::UnboundedReceiver<common::Written>) {
    tokio::spawn(async move {
        while let Some(w) = rx.recv().await {
            let reply = match w.json() {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|r| json!({"id": r["id"], "result": r.get("params").cloned().unwrap_or(Value::Null)}))
                        .collect(),
                ),
                r => json!({"id": r["id"], "result": r.get("params").cloned().unwrap_or(Value::Null)}),
            };
            if engine.ingest(reply.to_string()).await.is_err() {
                break;
            }
        }
    });
}

#[tokio::test]
async fn call_round_trip_clears_pending() {
    let (engine, rx) = engine();
    spawn_peer(engine.clone(), rx);

    let req = Envelope::request("sum").with_params(&[1, 2]).unwrap();
    let resp = engine.call(req).await.unwrap();
    assert_eq!(resp.result_as::<Vec<i32>>().unwrap(), vec![1, 2]);
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn write_is_tagged_with_request_id() {
    let (engine, mut rx) = engine();
    let caller = engine.clone();
    let call = tokio::spawn(async move {
        caller
            .call_with(
                Envelope::request_with_id("x", 42),
                CallOptions::timeout(Duration::from_millis(200)),
            )
            .await
    });

    let w = next(&mut rx).await;
    assert_eq!(w.tracking_id, "42");
    assert_eq!(w.code, 0);
    assert_eq!(w.json(), json!({"method": "x", "id": 42}));
    assert!(matches!(call.await.unwrap(), Err(EngineError::Timeout)));
}

#[tokio::test]
async fn short_timeout_fires_and_cleans_up() {
    let (engine, _rx) = engine();
    let start = Instant::now();
    let err = engine
        .call_with(
            Envelope::request("never"),
            CallOptions::timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Timeout));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn cancellation_releases_caller() {
    let (engine, _rx) = engine();
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = engine
        .call_with(Envelope::request("never"), CallOptions::default().with_cancel(token))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn preconditions_are_checked() {
    let bare = Engine::new().unwrap();
    assert!(matches!(
        bare.call(Envelope::request("x")).await,
        Err(EngineError::NoEgress)
    ));
    assert!(matches!(bare.notify(Envelope::notification("x")), Err(EngineError::NoEgress)));

    let (engine, _rx) = engine();
    assert!(matches!(
        engine.call(Envelope::notification("x")).await,
        Err(EngineError::MissingId)
    ));
    assert!(matches!(engine.call_batch(vec![]).await, Err(EngineError::EmptyBatch)));
    assert!(matches!(
        engine.call_batch(vec![Envelope::notification("x")]).await,
        Err(EngineError::MissingId)
    ));

    assert!(matches!(
        engine.call(Envelope::request_with_id("x", Value::Null)).await,
        Err(EngineError::MissingId)
    ));
    assert!(matches!(
        engine
            .call_batch(vec![Envelope::request_with_id("x", Value::Null), Envelope::request("y")])
            .await,
        Err(EngineError::MissingId)
    ));
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn unbounded_timeout_waits_for_cancel() {
    let (engine, _rx) = engine();
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = engine
        .call_with(
            Envelope::request("never"),
            CallOptions::timeout(Duration::MAX).with_cancel(token),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn batch_call_gets_whole_response_array() {
    let (engine, rx) = engine();
    spawn_peer(engine.clone(), rx);

    let reqs = vec![
        Envelope::request("a").with_params(&1).unwrap(),
        Envelope::request("b").with_params(&2).unwrap(),
    ];
    let resps = engine.call_batch(reqs).await.unwrap();
    assert_eq!(resps.len(), 2);
    assert_eq!(resps[0].result_as::<i32>().unwrap(), 1);
    assert_eq!(resps[1].result_as::<i32>().unwrap(), 2);
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn late_reply_after_timeout_is_dropped() {
    let (engine, mut rx) = engine();
    let err = engine
        .call_with(
            Envelope::request_with_id("x", "late"),
            CallOptions::timeout(Duration::from_millis(30)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout));
    let _request = next(&mut rx).await;

    engine.ingest(r#"{"id":"late","result":1}"#).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.pending_len(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn dropped_call_future_cleans_up() {
    let (engine, _rx) = engine();
    let caller = engine.clone();
    let task = tokio::spawn(async move { caller.call(Envelope::request("hang")).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(engine.pending_len(), 1);

    task.abort();
    let _ = task.await;
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn egress_failure_is_returned_to_caller() {
    let engine = Engine::builder()
        .egress(|_: &str, _: i32, _: Bytes| Err::<(), BoxError>("socket gone".into()))
        .build()
        .unwrap();

    let err = engine.call(Envelope::request("x")).await.unwrap_err();
    assert!(matches!(err, EngineError::Egress(ref m) if m.contains("socket gone")));
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn notify_writes_once_without_pending_entry() {
    let (engine, mut rx) = engine();
    engine
        .notify(Envelope::notification("tick").with_params(&json!({"n": 1})).unwrap())
        .unwrap();

    let w = next(&mut rx).await;
    assert_eq!(w.json(), json!({"method": "tick", "params": {"n": 1}}));
    assert!(!w.tracking_id.is_empty());
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn response_batch_is_keyed_by_leading_element() {
    let (engine, mut rx) = engine();
    let caller = engine.clone();
    let call = tokio::spawn(async move {
        caller
            .call_batch_with(
                vec![Envelope::request_with_id("a", "k"), Envelope::request_with_id("b", "k2")],
                CallOptions::timeout(Duration::from_secs(1)),
            )
            .await
    });
    let _request = next(&mut rx).await;

    // Element 0 is invalid but still names the call.
    engine.ingest(r#"[{"id":"k"},{"id":"k2","result":1}]"#).await.unwrap();
    let resps = call.await.unwrap().unwrap();
    assert_eq!(resps.len(), 1);
    assert_eq!(resps[0].id, Some(json!("k2")));
    assert_eq!(engine.pending_len(), 0);
}
