//! Ping/pong demo server.
//!
//! Answers every `Ping` with a `Pong`, broadcast to all connected clients:
//!   cargo run --bin pingpong-server -- --addr 127.0.0.1:8765

use serde_json::json;
use std::sync::Arc;
use tether_core::{CallbackChain, Filter, FilteredCallback, LoggerCallback, Message};
use tether_net::{Svc, SvcConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let addr = parse_arg(&args, "--addr").unwrap_or_else(|| "127.0.0.1:8765".to_string());

    // Callbacks run on the connection's IO tasks, so the responder hands
    // replies to the main task instead of sending inline.
    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    let responder = FilteredCallback::new().when_recv(Filter::new(json!({"Ping": {}})), {
        move |_con_id, _msg| {
            let _ = reply_tx.send(json!({"Pong": {"ty": "P", "text": "pong"}}));
        }
    });
    let chain = CallbackChain::new()
        .with(LoggerCallback::new_ref())
        .with(Arc::new(responder));

    let svc = Svc::bind(
        SvcConfig::new(&addr).with_name("pingpong").with_max_connections(8),
        Arc::new(chain),
    )
    .await?;
    tracing::info!("Serving on {}", svc.local_addr());

    while let Some(reply) = reply_rx.recv().await {
        if let Err(e) = svc.send(&reply).await {
            tracing::warn!("Reply not delivered: {}", e);
        }
    }
    Ok(())
}

fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
