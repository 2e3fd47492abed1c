//! Scripted `WebSocket` servers for connector tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Serve every connection with `session` on an ephemeral port. Returns the `ws://` URL.
pub async fn serve<F, Fut>(session: F) -> String
where
    F: Fn(ServerSocket, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let session = Arc::new(session);
    tokio::spawn(async move {
        let mut index = 0usize;
        while let Ok((stream, _)) = listener.accept().await {
            let session = Arc::clone(&session);
            let this = index;
            index = index.saturating_add(1);
            tokio::spawn(async move {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    session(ws, this).await;
                }
            });
        }
    });
    format!("ws://{addr}/")
}

/// Success reply echoing `action` and `requestId`.
pub fn success(request: &Value, fields: Value) -> Value {
    let mut reply = json!({
        "action": request["action"],
        "requestId": request["requestId"],
        "status": "success",
    });
    if let (Some(reply), Some(fields)) = (reply.as_object_mut(), fields.as_object()) {
        reply.extend(fields.clone());
    }
    reply
}

/// Error reply echoing `action` and `requestId`.
pub fn failure(request: &Value, code: u16, message: &str) -> Value {
    json!({
        "action": request["action"],
        "requestId": request["requestId"],
        "status": "error",
        "code": code,
        "error": message,
    })
}
