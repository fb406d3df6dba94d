#![allow(dead_code)]

use std::time::Duration;

use kameo::Actor;
use kameo::prelude::ActorRef;
use notify_stream::testing::{MockControl, MockTransport};
use notify_stream::{
    ConnectionManager, ConnectionManagerArgs, ConnectionStatus, EventDispatcher,
    NotificationMessage, StreamConfig,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

pub type MockManager = ActorRef<ConnectionManager<MockTransport>>;

pub struct Harness {
    pub manager: MockManager,
    pub control: MockControl,
    pub dispatcher: EventDispatcher,
    pub statuses: broadcast::Receiver<ConnectionStatus>,
    pub messages: broadcast::Receiver<NotificationMessage>,
}

/// Config used by the mock tests: no stale timeout, so a paused clock never trips it.
pub fn config() -> StreamConfig {
    StreamConfig::new("http://push.test", "secret").with_stale_timeout(None)
}

pub fn spawn(config: StreamConfig) -> Harness {
    spawn_with(config, EventDispatcher::new(64))
}

pub fn spawn_with(config: StreamConfig, dispatcher: EventDispatcher) -> Harness {
    let (transport, control) = MockTransport::new();
    let statuses = dispatcher.subscribe_status();
    let messages = dispatcher.subscribe_messages();
    let manager = ConnectionManager::spawn(
        ConnectionManagerArgs::new(config, transport).with_dispatcher(dispatcher.clone()),
    );
    Harness {
        manager,
        control,
        dispatcher,
        statuses,
        messages,
    }
}

pub async fn next_status(rx: &mut broadcast::Receiver<ConnectionStatus>) -> ConnectionStatus {
    tokio::time::timeout(Duration::from_secs(300), rx.recv())
        .await
        .expect("timed out waiting for a status")
        .expect("status channel closed")
}

pub async fn next_message(
    rx: &mut broadcast::Receiver<NotificationMessage>,
) -> NotificationMessage {
    tokio::time::timeout(Duration::from_secs(300), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("message channel closed")
}

/// Collect statuses until `stop` matches, returning everything seen including the match.
pub async fn statuses_until(
    rx: &mut broadcast::Receiver<ConnectionStatus>,
    stop: impl Fn(&ConnectionStatus) -> bool,
) -> Vec<ConnectionStatus> {
    let mut seen = Vec::new();
    loop {
        let status = next_status(rx).await;
        let done = stop(&status);
        seen.push(status);
        if done {
            return seen;
        }
    }
}

pub fn assert_no_status(rx: &mut broadcast::Receiver<ConnectionStatus>) {
    match rx.try_recv() {
        Err(TryRecvError::Empty) => {}
        other => panic!("expected no further status, got {other:?}"),
    }
}

pub fn notification_json(id: i64, title: &str) -> String {
    format!(
        r#"{{"id":{id},"appid":3,"message":"body {id}","title":"{title}","priority":5,"date":"2024-05-01T10:00:00Z","extras":{{"client::display":{{"contentType":"text/plain"}}}}}}"#
    )
}
