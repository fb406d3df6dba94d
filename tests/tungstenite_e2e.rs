use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kameo::Actor;
use notify_stream::{
    Connect, ConnectionManager, ConnectionManagerArgs, ConnectionStatus, DisconnectCause,
    EventDispatcher, StreamConfig, TungsteniteTransport,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

const NOTIFICATION: &str = r#"{"id":42,"appid":5,"message":"Disk usage at 91%","title":"storage","priority":8,"date":"2024-05-01T12:30:00+02:00"}"#;

/// Accepts one client, reports the request target, pushes a split notification and closes.
async fn spawn_push_server() -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (target_tx, target_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = target_tx.send(req.uri().to_string());
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        ws.send(Message::Text(NOTIFICATION.into())).await.unwrap();
        ws.send(Message::Text("not a notification".into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = ws.close(None).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    (addr, target_rx)
}

async fn recv<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streams_notifications_from_a_real_websocket_server() {
    let (addr, target_rx) = spawn_push_server().await;

    let dispatcher = EventDispatcher::new(32);
    let mut messages = dispatcher.subscribe_messages();
    let mut statuses = dispatcher.subscribe_status();

    let config = StreamConfig::new(format!("http://{addr}"), "tok en").with_reconnect(false);
    let manager = ConnectionManager::spawn(
        ConnectionManagerArgs::new(config, TungsteniteTransport::default())
            .with_dispatcher(dispatcher),
    );

    manager.ask(Connect).await.unwrap();
    assert_eq!(target_rx.await.unwrap(), "/stream?token=tok+en");

    let message = recv(&mut messages).await;
    assert_eq!(message.id(), 42);
    assert_eq!(message.title(), "storage");
    assert_eq!(message.body(), "Disk usage at 91%");
    assert_eq!(message.priority(), 8);
    assert_eq!(message.timestamp().to_rfc3339(), "2024-05-01T10:30:00+00:00");

    assert_eq!(recv(&mut statuses).await, ConnectionStatus::Connecting);
    assert_eq!(recv(&mut statuses).await, ConnectionStatus::Connected);
    match recv(&mut statuses).await {
        ConnectionStatus::Disconnected(DisconnectCause::RemoteClosed { .. })
        | ConnectionStatus::Disconnected(DisconnectCause::StreamEnded) => {}
        other => panic!("unexpected status {other:?}"),
    }
}
