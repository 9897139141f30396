//! Wisp tunnel WebSocket upgrade.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use pomar_tunnel::TunnelSession;
use tokio::sync::mpsc;
use tracing::{debug, info};

const OUTBOUND_BACKLOG: usize = 64;

/// `GET /wisp` — upgrade to a tunnel session. The route is gated by the
/// session middleware; once upgraded, the payload is opaque.
pub(crate) async fn wisp_upgrade(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(handle_socket)
}

async fn handle_socket(socket: WebSocket) {
    info!("tunnel session opened");
    let (mut sink, mut stream) = socket.split();

    // A single writer task serializes outbound frames on the socket.
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_BACKLOG);
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Binary(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let session = TunnelSession::new(tx);
    session.open().await;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Binary(data)) => session.handle_frame(&data).await,
            Ok(Message::Close(_)) | Err(_) => break,
            // Text, ping, and pong frames are not part of the protocol.
            Ok(_) => {}
        }
    }

    session.shutdown().await;
    writer.abort();
    debug!("tunnel session closed");
}
