//! WebSocket endpoint for real-time clients.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{future, SinkExt, StreamExt};

use crate::connection::{Inbound, Outbound};
use crate::hub::HubHandle;
use crate::AppState;

/// WebSocket routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// Upgrade the request and hand the socket to a new hub session.
///
/// A failed handshake never reaches the hub.
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_failed_upgrade(|e| {
        tracing::warn!(error = %e, "websocket handshake failed");
    })
    .on_upgrade(move |socket| serve_socket(socket, state.hub))
}

async fn serve_socket(socket: WebSocket, hub: HubHandle) {
    let connection = hub.connect();
    let id = connection.id();

    let (sink, stream) = socket.split();
    let reader = stream.map(|message| message.map(inbound_frame));
    let writer = sink.with(|frame: Outbound| future::ready(Ok::<_, axum::Error>(outbound_message(frame))));

    match connection.run(reader, writer).await {
        Ok(reason) => tracing::debug!(connection_id = %id, reason = ?reason, "websocket closed"),
        Err(e) => tracing::info!(connection_id = %id, error = %e, "websocket closed with error"),
    }
}

fn inbound_frame(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Text(text),
        Message::Close(_) => Inbound::Close,
        Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => Inbound::Other,
    }
}

fn outbound_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Event(text) => Message::Text(text.to_string()),
        Outbound::Close => Message::Close(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_frame_mapping() {
        assert_eq!(
            inbound_frame(Message::Text("{}".to_string())),
            Inbound::Text("{}".to_string())
        );
        assert_eq!(inbound_frame(Message::Close(None)), Inbound::Close);
        assert_eq!(inbound_frame(Message::Binary(vec![1, 2])), Inbound::Other);
        assert_eq!(inbound_frame(Message::Ping(vec![])), Inbound::Other);
    }

    #[test]
    fn test_outbound_message_mapping() {
        let frame = Outbound::Event("{\"type\":\"seatUpdate\"}".into());
        assert!(matches!(
            outbound_message(frame),
            Message::Text(text) if text == "{\"type\":\"seatUpdate\"}"
        ));
        assert!(matches!(outbound_message(Outbound::Close), Message::Close(None)));
    }
}
