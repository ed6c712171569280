use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use txfeed_relay::ChannelConnection;

use crate::state::AppState;

/// WebSocket upgrade handler for the change feed
pub async fn ws_feed(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_feed(socket, state))
}

/// Register the socket with the relay and pump frames until either side closes.
///
/// The feed is one-way: anything the client sends is read and discarded so
/// that close frames and disconnects are noticed.
async fn handle_feed(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut frames) = ChannelConnection::new(state.client_buffer);
    let connection_id = state.registry.register(Arc::new(connection));

    tracing::info!(
        connection_id = %connection_id,
        connections = state.registry.len(),
        "client connected"
    );

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!("WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.registry.remove(connection_id);
    tracing::info!(
        connection_id = %connection_id,
        connections = state.registry.len(),
        "client disconnected"
    );
}
