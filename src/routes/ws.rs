// WebSocket job event stream: replay the log, then live events until a terminal one.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::{ApiError, AppState};
use crate::docker_repo::ContainerRuntime;
use crate::error::ReconcileError;
use crate::models::JobEvent;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) async fn ws_job<R: ContainerRuntime>(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<AppState<R>>,
) -> Result<impl IntoResponse, ApiError> {
    let (backlog, rx) = state
        .deps
        .registry
        .subscribe(&id)
        .ok_or_else(|| ReconcileError::NotFound(format!("job '{id}'")))?;
    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(e) = stream_job(socket, &id, backlog, rx).await {
            tracing::info!(job_id = %id, "Job stream error: {}", e);
        }
    }))
}

/// Send one event; `Ok(false)` when the client is gone or too slow.
async fn send_event(socket: &mut WebSocket, event: &JobEvent) -> anyhow::Result<bool> {
    let json = serde_json::to_string(event)?;
    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
    Ok(matches!(r, Ok(Ok(()))))
}

async fn stream_job(
    mut socket: WebSocket,
    job_id: &str,
    backlog: Vec<JobEvent>,
    mut rx: broadcast::Receiver<JobEvent>,
) -> anyhow::Result<()> {
    tracing::info!(job_id, replay = backlog.len(), "Client connected to job stream");
    let mut last_seq = None;
    for event in &backlog {
        if !send_event(&mut socket, event).await? {
            return Ok(());
        }
        last_seq = Some(event.seq);
        if event.event.is_terminal() {
            let _ = socket.send(Message::Close(None)).await;
            return Ok(());
        }
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        // Already sent as part of the replay.
                        if last_seq.is_some_and(|s| event.seq <= s) {
                            continue;
                        }
                        if !send_event(&mut socket, &event).await? {
                            break;
                        }
                        last_seq = Some(event.seq);
                        if event.event.is_terminal() {
                            let _ = socket.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(job_id, "WebSocket job client lagged, skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
                if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}
