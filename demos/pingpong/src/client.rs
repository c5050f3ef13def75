//! Ping/pong demo client.
//!
//! Reconnects transparently and sends a `Ping` every second:
//!   cargo run --bin pingpong-client -- --addr 127.0.0.1:8765

use serde_json::json;
use std::time::Duration;
use tether_core::LoggerCallback;
use tether_net::{CltAuto, CltConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let addr = parse_arg(&args, "--addr").unwrap_or_else(|| "127.0.0.1:8765".to_string());

    let clt = CltAuto::connect(
        CltConfig::new(&addr).with_name("pinger"),
        LoggerCallback::new_ref(),
    );

    loop {
        if clt.is_connected_timeout(Duration::from_secs(1)).await {
            if let Err(e) = clt.send(json!({"Ping": {"ty": "P", "text": "ping"}})).await {
                tracing::warn!("Send failed: {}", e);
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
