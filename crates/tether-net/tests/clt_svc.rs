//! Manual client/server lifecycle and dispatch behavior.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::{
    Callback, CallbackChain, ConId, CounterCallback, DevNullCallback, Filter, MemoryStore, Message,
};
use tether_net::{Clt, CltConfig, NetError, Svc, SvcConfig};

fn init_log() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// An ephemeral address that is currently free.
async fn free_addr() -> String {
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap().to_string();
    drop(probe);
    addr
}

#[tokio::test]
async fn svc_with_no_clients_reports_not_connected() {
    init_log();
    let svc = Svc::bind(SvcConfig::new("127.0.0.1:0"), DevNullCallback::new_ref())
        .await
        .unwrap();

    let timeout = Duration::from_millis(100);
    let start = Instant::now();
    assert!(!svc.is_connected_timeout(timeout).await);
    assert!(start.elapsed() >= timeout);
}

#[tokio::test]
async fn shutdown_short_circuits_liveness_probe() {
    init_log();
    let svc = Arc::new(
        Svc::bind(SvcConfig::new("127.0.0.1:0"), DevNullCallback::new_ref())
            .await
            .unwrap(),
    );

    let probe = {
        let svc = svc.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            let connected = svc.is_connected_timeout(Duration::from_secs(3)).await;
            (connected, start.elapsed())
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    svc.shutdown();

    let (connected, elapsed) = probe.await.unwrap();
    assert!(!connected);
    assert!(elapsed < Duration::from_secs(1), "probe waited out the timeout: {elapsed:?}");
}

#[tokio::test]
async fn clt_connect_with_no_listener_fails() {
    init_log();
    let addr = free_addr().await;
    let err = Clt::connect(CltConfig::new(&addr), DevNullCallback::new_ref())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NetError::Connect { .. } | NetError::ConnectTimeout { .. }
    ));
}

#[tokio::test]
async fn ping_pong_roundtrip_preserves_content() {
    init_log();
    let store = MemoryStore::new_ref();
    let svc = Svc::bind(SvcConfig::new("127.0.0.1:0"), store.clone())
        .await
        .unwrap();
    let addr = svc.local_addr().to_string();
    let clt = Clt::connect(CltConfig::new(&addr), store.clone())
        .await
        .unwrap();

    assert!(svc.is_connected_timeout(Duration::from_secs(1)).await);
    assert!(clt.is_connected());

    let ping = json!({"Ping": {"ty": "P", "text": "ping"}});
    clt.send(ping.clone()).await.unwrap();
    let seen = store
        .find_recv(Some("svc"), &Filter::new(json!({"Ping": {}})), Duration::from_millis(200))
        .await
        .expect("server should observe the ping");
    assert_eq!(seen.message, ping);

    let pong = json!({"Pong": {"ty": "P", "text": "pong"}});
    svc.send(&pong).await.unwrap();
    let seen = store
        .find_recv(Some("clt"), &Filter::new(json!({"Pong": {}})), Duration::from_millis(200))
        .await
        .expect("client should observe the pong");
    assert_eq!(seen.message, pong);

    // Sent hooks fired on the originating sides as well.
    assert!(
        store
            .find_sent(Some("clt"), &Filter::new(json!({"Ping": {}})), Duration::from_millis(200))
            .await
            .is_some()
    );
    assert!(
        store
            .find_sent(Some("svc"), &Filter::new(json!({"Pong": {}})), Duration::from_millis(200))
            .await
            .is_some()
    );
}

#[derive(Debug)]
struct PanickingCallback;

impl Callback for PanickingCallback {
    fn on_recv(&self, _con_id: &ConId, _msg: &Message) {
        panic!("observer failure");
    }
    fn on_sent(&self, _con_id: &ConId, _msg: &Message) {
        panic!("observer failure");
    }
}

#[tokio::test]
async fn faulty_observer_does_not_break_the_pipeline() {
    init_log();
    let store = MemoryStore::new_ref();
    let chain = CallbackChain::new()
        .with(Arc::new(PanickingCallback))
        .with(store.clone());
    let svc = Svc::bind(SvcConfig::new("127.0.0.1:0"), Arc::new(chain))
        .await
        .unwrap();
    let clt = Clt::connect(
        CltConfig::new(&svc.local_addr().to_string()),
        DevNullCallback::new_ref(),
    )
    .await
    .unwrap();

    clt.send(json!({"Ping": {"n": 1}})).await.unwrap();
    clt.send(json!({"Ping": {"n": 2}})).await.unwrap();

    // Both events reached the member after the panicking one.
    assert!(
        store
            .find_recv(None, &Filter::new(json!({"Ping": {"n": 2}})), Duration::from_millis(500))
            .await
            .is_some()
    );
    assert!(
        store
            .find_recv(None, &Filter::new(json!({"Ping": {"n": 1}})), Duration::ZERO)
            .await
            .is_some()
    );
    // And the connection survived its misbehaving observer.
    assert!(clt.is_connected());
}

#[tokio::test]
async fn events_delivered_exactly_once_in_arrival_order() {
    init_log();
    let counter = CounterCallback::new_ref();
    let store = MemoryStore::new_ref();
    let chain = CallbackChain::new().with(counter.clone()).with(store.clone());
    let svc = Svc::bind(SvcConfig::new("127.0.0.1:0"), Arc::new(chain))
        .await
        .unwrap();
    let clt = Clt::connect(
        CltConfig::new(&svc.local_addr().to_string()),
        DevNullCallback::new_ref(),
    )
    .await
    .unwrap();

    for n in 0..5 {
        clt.send(json!({"Seq": {"n": n}})).await.unwrap();
    }
    assert!(
        store
            .find_recv(None, &Filter::new(json!({"Seq": {"n": 4}})), Duration::from_millis(500))
            .await
            .is_some()
    );
    assert_eq!(counter.recv_count(), 5);
    assert_eq!(store.len(), 5);
    assert_eq!(store.last().unwrap().message, json!({"Seq": {"n": 4}}));
}

#[tokio::test]
async fn repeated_bind_connect_close_cycles() {
    init_log();
    let addr = free_addr().await;
    for i in 0..10 {
        let svc = Svc::bind(SvcConfig::new(&addr), DevNullCallback::new_ref())
            .await
            .unwrap_or_else(|e| panic!("cycle {i} bind: {e}"));
        let clt = Clt::connect(CltConfig::new(&addr), DevNullCallback::new_ref())
            .await
            .unwrap_or_else(|e| panic!("cycle {i} connect: {e}"));

        assert!(svc.is_connected_timeout(Duration::from_secs(1)).await);
        assert!(clt.is_connected());

        drop(clt);
        drop(svc);
        // Yield so the previous listener is fully released before rebinding.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn pool_rejects_connections_over_capacity() {
    init_log();
    let svc = Svc::bind(
        SvcConfig::new("127.0.0.1:0").with_max_connections(1),
        DevNullCallback::new_ref(),
    )
    .await
    .unwrap();
    let addr = svc.local_addr().to_string();

    let clt1 = Clt::connect(CltConfig::new(&addr), DevNullCallback::new_ref())
        .await
        .unwrap();
    assert!(svc.is_connected_timeout(Duration::from_secs(1)).await);

    // The TCP handshake succeeds, then the engine closes the excess
    // connection as soon as it reaches the full pool.
    let clt2 = Clt::connect(CltConfig::new(&addr), DevNullCallback::new_ref())
        .await
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while clt2.is_connected() {
        assert!(Instant::now() < deadline, "excess connection was never rejected");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(clt1.is_connected());
    assert_eq!(svc.pool().len(), 1);
}

#[tokio::test]
async fn send_after_peer_teardown_reports_not_connected() {
    init_log();
    let svc = Svc::bind(SvcConfig::new("127.0.0.1:0"), DevNullCallback::new_ref())
        .await
        .unwrap();
    let clt = Clt::connect(
        CltConfig::new(&svc.local_addr().to_string()),
        DevNullCallback::new_ref(),
    )
    .await
    .unwrap();
    assert!(svc.is_connected_timeout(Duration::from_secs(1)).await);

    svc.shutdown();
    let deadline = Instant::now() + Duration::from_secs(2);
    while clt.is_connected() {
        assert!(Instant::now() < deadline, "client never observed the teardown");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(matches!(
        clt.send(json!({"Ping": {}})).await.unwrap_err(),
        NetError::NotConnected
    ));
    assert!(matches!(
        svc.send(&json!({"Pong": {}})).await.unwrap_err(),
        NetError::NotConnected
    ));

    // Teardown is idempotent on both sides.
    svc.shutdown();
    clt.shutdown();
    clt.shutdown();
}
