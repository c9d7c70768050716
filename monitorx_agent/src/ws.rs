//! WebSocket upgrade and per-connection handler. Each socket is one hub subscriber.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::hub::SubscriberId;
use crate::state::AppState;
use crate::types::HubMessage;

pub const GET_HISTORY: &str = "get_history";

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(msg: &HubMessage) -> Option<String> {
    serde_json::to_string(msg)
        .map_err(|e| warn!("cannot encode {}: {e}", msg.event_name()))
        .ok()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (id, mut rx) = state.hub.subscribe_channel();

    // Ensure we unsubscribe on disconnect (drop).
    struct ClientGuard(AppState, SubscriberId);
    impl Drop for ClientGuard {
        fn drop(&mut self) {
            self.0.hub.unsubscribe(self.1);
        }
    }
    let _guard = ClientGuard(state.clone(), id);
    debug!(id, "websocket client connected");

    let (mut tx, mut incoming) = socket.split();
    let history = || HubMessage::History(state.history.snapshot());

    if let Some(js) = encode(&history()) {
        if tx.send(Message::Text(js)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            out = rx.recv() => {
                let Some(msg) = out else { break };
                if let Some(js) = encode(&msg) {
                    if tx.send(Message::Text(js)).await.is_err() {
                        break;
                    }
                }
            }
            msg = incoming.next() => match msg {
                Some(Ok(Message::Text(text))) if text.trim() == GET_HISTORY => {
                    if let Some(js) = encode(&history()) {
                        if tx.send(Message::Text(js)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
    debug!(id, "websocket client gone");
}
