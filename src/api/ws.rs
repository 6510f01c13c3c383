//! Live event feed over WebSocket.
//!
//! Subscribes to the `agent.events` and `task.events` state-store
//! channels and forwards each message as a JSON text frame.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::debug;

use super::state::AppState;

pub async fn events_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

async fn stream_events(mut socket: WebSocket, state: AppState) {
    let mut agent_events = state.state_store.subscribe("agent.events").await;
    let mut task_events = state.state_store.subscribe("task.events").await;
    debug!("event stream client connected");

    loop {
        let message = tokio::select! {
            event = agent_events.recv() => event,
            event = task_events.recv() => event,
            incoming = socket.recv() => {
                match incoming {
                    // Client pings keep the connection alive; a close or
                    // error ends the stream.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => continue,
                }
            }
        };

        match message {
            Ok(event) => {
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            // Lagged subscribers skip to the live edge.
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("event stream client disconnected");
}
