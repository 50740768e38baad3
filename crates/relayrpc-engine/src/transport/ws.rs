//! WebSocket handler.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS
//! - Build one engine per connection on the shared registry
//! - Lifecycle: ping/pong + idle timeout + frame size limit
//! - Shut the engine down when the connection ends

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::Instrument;

use crate::app_state::AppState;
use crate::dispatch::Engine;
use crate::error::{EngineError, Result};
use crate::transport::codec::{decode, frame_len, ChannelEgress, Inbound};

const OUTBOUND_CAPACITY: usize = 1024;
const IDLE_CHECK_EVERY: Duration = Duration::from_millis(250);

pub async fn ws_upgrade(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let session_id = uuid::Uuid::new_v4();
    ws.on_upgrade(move |socket| {
        async move {
            match run_session(app, socket).await {
                Ok(()) => tracing::debug!("session closed"),
                Err(e) => tracing::warn!(code = e.as_str(), error = %e, "session ended with error"),
            }
        }
        .instrument(tracing::info_span!("session", %session_id))
    })
}

async fn run_session(app: AppState, socket: WebSocket) -> Result<()> {
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);

    let engine = Engine::builder()
        .config(app.cfg().engine.clone())
        .registry(app.registry())
        .egress(ChannelEgress::new(out_tx.clone()))
        .shutdown_token(app.shutdown_token().clone())
        .build()?;

    let result = session_loop(&app, &engine, socket, &out_tx, &mut out_rx).await;
    engine.shutdown();
    result
}

async fn session_loop(
    app: &AppState,
    engine: &Engine,
    socket: WebSocket,
    out_tx: &mpsc::Sender<Message>,
    out_rx: &mut mpsc::Receiver<Message>,
) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let gw = &app.cfg().gateway;
    let ping_every = Duration::from_millis(gw.ping_interval_ms);
    let idle_timeout = Duration::from_millis(gw.idle_timeout_ms);
    let max_frame = gw.max_frame_bytes;

    let mut ping_tick = tokio::time::interval(ping_every);
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut idle_tick = tokio::time::interval(IDLE_CHECK_EVERY);
    idle_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            // outbound writer
            maybe_out = out_rx.recv() => {
                let Some(m) = maybe_out else { break };
                if ws_tx.send(m).await.is_err() {
                    break;
                }
            }

            // inbound reader
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break };
                last_activity = Instant::now();

                let len = frame_len(&msg);
                if len > max_frame {
                    tracing::warn!(len, max_frame, "frame too large, closing");
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::SIZE,
                            reason: "frame too large".into(),
                        })))
                        .await;
                    break;
                }

                match decode(msg) {
                    Inbound::Data(bytes) => match engine.ingest(bytes).await {
                        Ok(tracking_id) => tracing::trace!(%tracking_id, len, "ingested"),
                        Err(EngineError::Closed) => break,
                        Err(e) => return Err(e),
                    },
                    Inbound::Ping(payload) => {
                        let _ = out_tx.try_send(Message::Pong(payload));
                    }
                    Inbound::Pong => {}
                    Inbound::Close => break,
                }
            }

            _ = ping_tick.tick() => {
                let _ = out_tx.try_send(Message::Ping(Vec::new()));
            }

            _ = idle_tick.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    tracing::debug!("idle timeout");
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "idle timeout".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    }

    Ok(())
}
