//! Socket server protocol over a real `WebSocket` connection.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use hive_backend::Backend;
use hive_config::HiveConfig;
use hive_core::HivePrincipal;
use hive_frontend::prelude::*;
use hive_test::prelude::*;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const STEP: Duration = Duration::from_secs(2);

struct Fixture {
    backend: Backend,
    service: Arc<HiveService>,
    server: SocketServer,
}

async fn start() -> Fixture {
    init_test_logging();
    let backend = Backend::start(&HiveConfig::default()).unwrap();
    let service = Arc::new(HiveService::new(backend.client("frontend-socket")));
    let auth = StaticAuthenticator::new()
        .with_token("admin", HivePrincipal::unrestricted("admin"))
        .with_token("d1-only", HivePrincipal::for_devices("user", ["d1"]));
    let server = SocketServer::bind("127.0.0.1:0", Arc::clone(&service), Arc::new(auth))
        .await
        .unwrap();
    Fixture {
        backend,
        service,
        server,
    }
}

struct Peer {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Peer {
    async fn connect(url: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        Self { ws }
    }

    async fn send(&mut self, message: Value) {
        self.ws
            .send(Message::Text(message.to_string().into()))
            .await
            .unwrap();
    }

    async fn next(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(STEP, self.ws.next())
                .await
                .expect("frame in time")
                .expect("socket open")
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn request(&mut self, message: Value) -> Value {
        self.send(message).await;
        self.next().await
    }

    async fn login(&mut self, token: &str) {
        let reply = self
            .request(json!({"action": "authenticate", "requestId": "auth", "token": token}))
            .await;
        assert_eq!(reply["status"], "success", "{reply}");
    }
}

#[tokio::test]
async fn test_requests_need_authentication() {
    let fx = start().await;
    let mut peer = Peer::connect(&fx.server.url()).await;

    let info = peer.request(json!({"action": "server/info", "requestId": 1})).await;
    assert_eq!(info["status"], "success");
    assert_eq!(info["info"]["apiVersion"], hive_frontend::API_VERSION);

    let reply = peer
        .request(json!({"action": "notification/subscribe", "requestId": 2, "deviceId": "d1"}))
        .await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["code"], 401);
    assert_eq!(reply["requestId"], 2);
    assert_eq!(reply["action"], "notification/subscribe");

    let reply = peer
        .request(json!({"action": "authenticate", "requestId": 3, "token": "nope"}))
        .await;
    assert_eq!(reply["code"], 401);
}

#[tokio::test]
async fn test_subscribe_then_push() {
    let fx = start().await;
    let mut peer = Peer::connect(&fx.server.url()).await;
    peer.login("admin").await;

    let reply = peer
        .request(json!({
            "action": "notification/subscribe",
            "requestId": "s",
            "deviceId": "d1",
            "names": ["temp"],
        }))
        .await;
    assert_eq!(reply["status"], "success");
    let subscription_id = reply["subscriptionId"].as_u64().unwrap();

    let reply = peer
        .request(json!({
            "action": "notification/insert",
            "requestId": "i",
            "deviceId": "d1",
            "notification": {"notification": "temp", "parameters": {"t": 21}},
        }))
        .await;
    // the push and the insert reply may arrive in either order
    let push = if reply["action"] == "notification/insert" && reply.get("requestId").is_some() {
        peer.next().await
    } else {
        let ack = peer.next().await;
        assert_eq!(ack["requestId"], "i");
        reply
    };
    assert_eq!(push["action"], "notification/insert");
    assert_eq!(push["subscriptionId"], subscription_id);
    assert_eq!(push["notification"]["deviceId"], "d1");
    assert_eq!(push["notification"]["parameters"]["t"], 21);
    assert!(push.get("requestId").is_none());
}

#[tokio::test]
async fn test_backlog_is_pushed_after_ack() {
    let fx = start().await;
    let first = fx
        .service
        .insert_notification("d1", notification("d1", "t"))
        .await
        .unwrap();
    fx.service
        .insert_notification("d1", notification("d1", "t"))
        .await
        .unwrap();

    let mut peer = Peer::connect(&fx.server.url()).await;
    peer.login("admin").await;
    peer.send(json!({
        "action": "notification/subscribe",
        "requestId": "s",
        "deviceId": "d1",
        "timestamp": first.timestamp,
    }))
    .await;

    let ack = peer.next().await;
    assert_eq!(ack["requestId"], "s");
    let push = peer.next().await;
    assert_eq!(push["subscriptionId"], ack["subscriptionId"]);
    assert_ne!(push["notification"]["id"], first.id);
}

#[tokio::test]
async fn test_restricted_principal_is_forbidden_elsewhere() {
    let fx = start().await;
    let mut peer = Peer::connect(&fx.server.url()).await;
    peer.login("d1-only").await;

    let reply = peer
        .request(json!({
            "action": "command/insert",
            "requestId": 1,
            "deviceId": "d2",
            "command": {"command": "reboot"},
        }))
        .await;
    assert_eq!(reply["code"], 403);

    let reply = peer
        .request(json!({"action": "command/subscribe", "requestId": 2, "deviceId": "*"}))
        .await;
    assert_eq!(reply["code"], 403);

    let reply = peer
        .request(json!({
            "action": "command/insert",
            "requestId": 3,
            "deviceId": "d1",
            "command": {"command": "reboot"},
        }))
        .await;
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["command"]["command"], "reboot");
}

#[tokio::test]
async fn test_command_update_of_unknown_command_is_404() {
    let fx = start().await;
    let mut peer = Peer::connect(&fx.server.url()).await;
    peer.login("admin").await;

    let reply = peer
        .request(json!({
            "action": "command/update",
            "requestId": 1,
            "deviceId": "d1",
            "commandId": 42,
            "command": {"status": "done"},
        }))
        .await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["code"], 404);
}

#[tokio::test]
async fn test_malformed_and_unknown_requests() {
    let fx = start().await;
    let mut peer = Peer::connect(&fx.server.url()).await;
    peer.login("admin").await;

    peer.ws
        .send(Message::Text("not json".to_owned().into()))
        .await
        .unwrap();
    assert_eq!(peer.next().await["code"], 400);

    let reply = peer.request(json!({"action": "device/launch", "requestId": 1})).await;
    assert_eq!(reply["code"], 400);

    let reply = peer
        .request(json!({"action": "notification/unsubscribe", "requestId": 2}))
        .await;
    assert_eq!(reply["code"], 400);

    // unknown handles are a no-op
    let reply = peer
        .request(json!({"action": "notification/unsubscribe", "requestId": 3, "subscriptionId": 999}))
        .await;
    assert_eq!(reply["status"], "success");
}

#[tokio::test]
async fn test_closing_session_releases_subscriptions() {
    let fx = start().await;
    let mut peer = Peer::connect(&fx.server.url()).await;
    peer.login("admin").await;
    for device in ["d1", "d2"] {
        let reply = peer
            .request(json!({"action": "command/subscribe", "requestId": device, "deviceId": device}))
            .await;
        assert_eq!(reply["status"], "success");
    }
    assert_eq!(fx.service.active_count(), 2);
    assert_eq!(fx.backend.bus().subscriber_count(), 2);

    peer.ws.close(None).await.unwrap();
    tokio::time::timeout(STEP, async {
        while fx.service.active_count() > 0 || fx.backend.bus().subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    fx.server.shutdown(STEP).await;
}
