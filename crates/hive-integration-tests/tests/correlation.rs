//! Single resolution of correlated requests and the "no response" failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use hive_client::{ConnectorError, ConnectorSettings, HiveSocketConnector};
use hive_rpc::{Body, LocalBroker, MessageDispatcher, Request, RequestResponseMatcher, Response, RpcClient};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[test]
fn test_duplicate_response_is_dropped() {
    let matcher = RequestResponseMatcher::new();
    let mut rx = matcher.register_single("c1");

    assert!(matcher.offer(Response::reply("c1", Body::Pong)));
    assert!(!matcher.offer(Response::reply("c1", Body::Pong)));
    assert_eq!(rx.try_recv().unwrap().body(), &Body::Pong);
    assert_eq!(matcher.pending_count(), 0);
}

#[tokio::test]
async fn test_server_answering_twice_resolves_caller_once() {
    let broker = Arc::new(LocalBroker::new(1));
    let mut partitions = broker.take_partitions().unwrap();
    let client = RpcClient::connect(broker.clone(), "caller", Duration::from_secs(1));

    let server = {
        let broker = broker.clone();
        tokio::spawn(async move {
            let request = partitions[0].recv().await.unwrap();
            let reply_to = request.reply_to().unwrap().to_owned();
            for _ in 0..2 {
                broker
                    .dispatch(&reply_to, Response::reply(request.correlation_id(), Body::Pong))
                    .unwrap();
            }
        })
    };

    let response = client
        .call(Request::builder().body(Body::Ping).build())
        .await
        .unwrap();
    assert_eq!(response.body(), &Body::Pong);
    server.await.unwrap();

    // the duplicate reaches the listener and finds nothing to resolve
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.matcher().pending_count(), 0);
}

#[tokio::test]
async fn test_connector_times_out_against_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // read and never answer
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (push, _pushed) = mpsc::unbounded_channel::<Value>();
    let connector = HiveSocketConnector::connect(
        ConnectorSettings::new(url).with_response_timeout(Duration::from_millis(200)),
        Arc::new(push),
    )
    .await
    .unwrap();

    let started = Instant::now();
    let err = connector
        .request(json!({"action": "server/info"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::NoResponse { .. }), "{err:?}");
    assert!(err.is_transport());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(connector.pending_requests(), 0);
    connector.close();
}
