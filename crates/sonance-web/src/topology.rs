/// Web API for speaker groups: REST + WebSocket real-time updates.
///
/// The WebSocket carries the whole drag-and-drop interaction: the browser
/// reports `drag_start`, `drag_over`, `drop` and `drag_cancel`, and the
/// server pushes every new view plus rollback notifications.
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use sonance_engine::groups::{
    DebugSnapshot, DeviceId, DragGesture, DropTarget, MoveOutcome, Notification, ReconciledView,
};

use crate::state::AppState;

/// Messages from the browser to the server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    DragStart { device: DeviceId },
    DragOver { target: DropTarget },
    Drop { target: DropTarget },
    DragCancel,
}

/// Messages from the server to the browser.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    View { view: ReconciledView },
    Notification { notification: Notification },
    /// Answer to a `drop`.
    Move { device: DeviceId, outcome: MoveOutcome },
    Error { message: String },
}

/// GET /api/topology: current reconciled view.
pub async fn get_topology(State(state): State<AppState>) -> Json<ReconciledView> {
    Json(state.engine.view())
}

/// GET /api/topology/debug: authoritative snapshot, pending moves, and view.
pub async fn get_topology_debug(
    State(state): State<AppState>,
) -> Result<Json<DebugSnapshot>, StatusCode> {
    state
        .engine
        .debug()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

/// GET /api/topology/ws: WebSocket for views, notifications, and drags.
pub async fn topology_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| topology_ws_handler(socket, state))
}

async fn send<S>(ws_tx: &mut S, msg: &ServerMessage) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    ws_tx.send(Message::Text(json.into())).await.map_err(|_| ())
}

async fn topology_ws_handler(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut views = state.engine.subscribe_view();
    let mut notifications = state.engine.subscribe_notifications();
    // Each connection drags independently.
    let mut drag = DragGesture::new();

    let view = views.borrow_and_update().clone();
    if send(&mut ws_tx, &ServerMessage::View { view }).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            ws_msg = ws_rx.next() => match ws_msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(msg) => handle_client_message(&state, &mut drag, msg).await,
                        Err(e) => Some(ServerMessage::Error {
                            message: format!("unrecognised message: {e}"),
                        }),
                    };
                    if let Some(reply) = reply {
                        if send(&mut ws_tx, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("topology ws receive error: {e}");
                    break;
                }
            },
            changed = views.changed() => {
                if changed.is_err() {
                    // Engine gone.
                    break;
                }
                let view = views.borrow_and_update().clone();
                if send(&mut ws_tx, &ServerMessage::View { view }).await.is_err() {
                    break;
                }
            },
            note = notifications.recv() => match note {
                Ok(notification) => {
                    if send(&mut ws_tx, &ServerMessage::Notification { notification }).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "topology ws fell behind on notifications");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let _ = ws_tx.close().await;
}

async fn handle_client_message(
    state: &AppState,
    drag: &mut DragGesture,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::DragStart { device } => {
            drag.start(device);
            None
        }
        ClientMessage::DragOver { target } => {
            drag.hover(target);
            None
        }
        ClientMessage::DragCancel => {
            drag.cancel();
            None
        }
        ClientMessage::Drop { target } => {
            let Some(done) = drag.drop_on(target) else {
                return Some(ServerMessage::Error {
                    message: "drop without drag_start".into(),
                });
            };
            let device = done.device.clone();
            Some(match state.engine.drop_device(done.device, done.target).await {
                Ok(outcome) => ServerMessage::Move { device, outcome },
                Err(e) => ServerMessage::Error {
                    message: e.to_string(),
                },
            })
        }
    }
}
