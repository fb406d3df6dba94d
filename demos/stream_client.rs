use std::sync::Arc;

use kameo::Actor;
use notify_stream::{
    Connect, ConnectionManager, ConnectionManagerArgs, ConnectionStatus, Disconnect,
    EventDispatcher, EventSink, GetStreamStats, MessageLog, NotificationMessage, StreamConfig,
    TungsteniteTransport,
};
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "stream_client\n\
  Connects to a push server stream and prints notifications until Ctrl-C.\n\
\n\
USAGE:\n\
  NOTIFY_STREAM_URL=https://push.example.com NOTIFY_STREAM_TOKEN=<client token> \\\n\
  cargo run --example stream_client\n\
\n\
ENV:\n\
  NOTIFY_STREAM_URL        server base url (http, https, ws or wss)\n\
  NOTIFY_STREAM_TOKEN      client token\n\
  NOTIFY_STREAM_RECONNECT  reconnect after failures (default true)\n\
  RUST_LOG                 log filter (default info)\n\
"
}

struct Printer;

impl EventSink for Printer {
    fn on_message(&self, message: &NotificationMessage) {
        println!(
            "[{}] {} (prio {}) {}: {}",
            message.timestamp().format("%Y-%m-%d %H:%M:%S"),
            message.display_app_name(),
            message.priority(),
            message.title(),
            message.body()
        );
    }

    fn on_status(&self, status: &ConnectionStatus) {
        println!("-- {status}");
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = StreamConfig::from_env();
    if let Err(err) = config.endpoint() {
        eprintln!("{err}\n\n{}", usage());
        std::process::exit(2);
    }

    let dispatcher = EventDispatcher::default();
    let history = Arc::new(MessageLog::default());
    let _printer = dispatcher.attach(Arc::new(Printer));
    let _history = dispatcher.attach(history.clone());

    let manager = ConnectionManager::spawn(
        ConnectionManagerArgs::new(config, TungsteniteTransport::default())
            .with_dispatcher(dispatcher),
    );
    manager.ask(Connect).await?;

    tokio::signal::ctrl_c().await?;
    manager.ask(Disconnect).await?;

    let stats = manager.ask(GetStreamStats).await?;
    println!(
        "received {} notifications ({} frames, {} undecodable, {} reconnects); {} kept in history",
        stats.messages,
        stats.frames,
        stats.decode_errors,
        stats.reconnects,
        history.len()
    );
    Ok(())
}
