//! Integration tests for the chat relay
//!
//! Each test binds a real relay on an ephemeral port and talks to it over
//! WebSocket, either with raw tungstenite sockets or the chat client.

use chat_relay::server::{ConnectionRegistry, RelayServer, RelayServerConfig, RelayStats};
use chat_relay_client::{ChatClient, ChatMessage, ClientConfig, SendOutcome, SessionState};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> (SocketAddr, ConnectionRegistry) {
    let config = RelayServerConfig::new("127.0.0.1:0".parse().unwrap());
    let bound = RelayServer::new(config).bind().await.unwrap();
    let addr = bound.local_addr();
    let registry = bound.registry();

    tokio::spawn(async move {
        bound.serve().await.unwrap();
    });

    (addr, registry)
}

async fn connect_raw(addr: SocketAddr) -> RawSocket {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}

async fn next_data(ws: &mut RawSocket) -> Message {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket ended")
            .unwrap();
        if msg.is_text() || msg.is_binary() {
            return msg;
        }
    }
}

async fn assert_silent(ws: &mut RawSocket) {
    let got = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(got.is_err(), "expected no frame, got {:?}", got);
}

async fn wait_connected(client: &ChatClient) {
    let mut rx = client.state_receiver();
    let reached = timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| *s == SessionState::Connected),
    )
    .await
    .expect("client did not connect")
    .is_ok();
    assert!(reached);
}

#[tokio::test]
async fn test_hello_reaches_peer_but_not_sender() {
    let (addr, registry) = start_relay().await;
    let url = format!("ws://{}", addr);

    let alice = ChatClient::new(ClientConfig::new(url.clone()));
    let bob = ChatClient::new(ClientConfig::new(url));
    let mut bob_inbox = bob.message_receiver();

    alice.connect().unwrap();
    bob.connect().unwrap();
    wait_connected(&alice).await;
    wait_connected(&bob).await;
    assert!(eventually(|| registry.active_count() == 2).await);

    assert_eq!(alice.send("hello"), SendOutcome::Sent);

    let got = timeout(Duration::from_secs(5), bob_inbox.recv())
        .await
        .expect("bob got nothing")
        .unwrap();
    assert_eq!(got, ChatMessage::received("hello"));

    sleep(Duration::from_millis(200)).await;

    let bob_log = bob.messages();
    assert_eq!(bob_log, vec![ChatMessage::received("hello")]);

    let alice_log = alice.messages();
    assert_eq!(alice_log.len(), 1);
    assert!(alice_log[0].is_sent);
    assert_eq!(alice_log[0].text, "hello");

    alice.disconnect().await;
    bob.disconnect().await;
}

#[tokio::test]
async fn test_fan_out_reaches_every_other_peer() {
    let (addr, registry) = start_relay().await;

    let mut sockets = Vec::new();
    for _ in 0..5 {
        sockets.push(connect_raw(addr).await);
    }
    assert!(eventually(|| registry.active_count() == 5).await);

    sockets[0].send(Message::text("ping".to_string())).await.unwrap();

    for ws in sockets.iter_mut().skip(1) {
        let msg = next_data(ws).await;
        assert_eq!(msg.into_text().unwrap().as_str(), "ping");
    }
    assert_silent(&mut sockets[0]).await;
}

#[tokio::test]
async fn test_binary_frames_keep_their_tag() {
    let (addr, registry) = start_relay().await;

    let mut a = connect_raw(addr).await;
    let mut b = connect_raw(addr).await;
    assert!(eventually(|| registry.active_count() == 2).await);

    let payload = vec![0u8, 159, 146, 150, 255];
    a.send(Message::binary(payload.clone())).await.unwrap();

    match next_data(&mut b).await {
        Message::Binary(data) => assert_eq!(&data[..], &payload[..]),
        other => panic!("expected binary frame, got {:?}", other),
    }

    b.send(Message::text("text stays text".to_string())).await.unwrap();
    assert!(next_data(&mut a).await.is_text());
}

#[tokio::test]
async fn test_closed_peer_is_skipped() {
    let (addr, registry) = start_relay().await;

    let mut a = connect_raw(addr).await;
    let mut b = connect_raw(addr).await;
    let mut c = connect_raw(addr).await;
    assert!(eventually(|| registry.active_count() == 3).await);

    c.close(None).await.unwrap();
    assert!(eventually(|| registry.active_count() == 2).await);

    a.send(Message::text("still here".to_string())).await.unwrap();
    assert_eq!(next_data(&mut b).await.into_text().unwrap().as_str(), "still here");

    // The sender's connection is unaffected by the dead peer
    b.send(Message::text("and back".to_string())).await.unwrap();
    assert_eq!(next_data(&mut a).await.into_text().unwrap().as_str(), "and back");
}

#[tokio::test]
async fn test_dropped_socket_is_removed() {
    let (addr, registry) = start_relay().await;

    let a = connect_raw(addr).await;
    let mut b = connect_raw(addr).await;
    assert!(eventually(|| registry.active_count() == 2).await);

    // No close handshake
    drop(a);
    assert!(eventually(|| registry.active_count() == 1).await);

    b.send(Message::text("anyone?".to_string())).await.unwrap();
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn test_lone_client_message_goes_nowhere() {
    let (addr, registry) = start_relay().await;

    let mut a = connect_raw(addr).await;
    assert!(eventually(|| registry.active_count() == 1).await);

    a.send(Message::text("echo?".to_string())).await.unwrap();
    assert_silent(&mut a).await;
    assert_eq!(registry.active_count(), 1);
}

#[tokio::test]
async fn test_token_query_is_accepted_on_root_path() {
    let (addr, registry) = start_relay().await;

    let (mut a, _) = connect_async(format!("ws://{}/?token=abc", addr)).await.unwrap();
    let mut b = connect_raw(addr).await;
    assert!(eventually(|| registry.active_count() == 2).await);

    a.send(Message::text("hi".to_string())).await.unwrap();
    assert_eq!(next_data(&mut b).await.into_text().unwrap().as_str(), "hi");
}

#[tokio::test]
async fn test_repeated_token_query_still_upgrades() {
    let (addr, registry) = start_relay().await;

    let (mut a, _) = connect_async(format!("ws://{}/?token=a&token=b", addr))
        .await
        .unwrap();
    let mut b = connect_raw(addr).await;
    assert!(eventually(|| registry.active_count() == 2).await);

    a.send(Message::text("duplicate token".to_string())).await.unwrap();
    assert_eq!(
        next_data(&mut b).await.into_text().unwrap().as_str(),
        "duplicate token"
    );
}

#[tokio::test]
async fn test_rapid_submits_deliver_once() {
    let (addr, registry) = start_relay().await;

    let client = ChatClient::new(ClientConfig::new(format!("ws://{}", addr)));
    client.connect().unwrap();
    wait_connected(&client).await;

    let mut peer = connect_raw(addr).await;
    assert!(eventually(|| registry.active_count() == 2).await);

    let outcomes: Vec<_> = (0..10).map(|i| client.submit(&format!("msg {}", i))).collect();
    assert!(outcomes[0].is_sent());
    assert!(outcomes[1..].iter().all(|o| *o == SendOutcome::Throttled));

    assert_eq!(next_data(&mut peer).await.into_text().unwrap().as_str(), "msg 0");
    assert_silent(&mut peer).await;

    client.disconnect().await;
}

#[tokio::test]
async fn test_health_and_stats() {
    let (addr, registry) = start_relay().await;
    let http = reqwest::Client::new();

    let health = http
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());
    assert_eq!(health.text().await.unwrap(), "ok");

    let mut a = connect_raw(addr).await;
    let _b = connect_raw(addr).await;
    assert!(eventually(|| registry.active_count() == 2).await);

    let stats: RelayStats = http
        .get(format!("http://{}/stats", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        stats,
        RelayStats {
            active_connections: 2,
            total_connections: 2,
        }
    );

    a.close(None).await.unwrap();
    assert!(eventually(|| registry.active_count() == 1).await);

    let stats: RelayStats = http
        .get(format!("http://{}/stats", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats.active_connections, 1);
    assert_eq!(stats.total_connections, 2);
}

#[tokio::test]
async fn test_graceful_shutdown_stops_accepting() {
    let config = RelayServerConfig::new("127.0.0.1:0".parse().unwrap());
    let bound = RelayServer::new(config).bind().await.unwrap();
    let addr = bound.local_addr();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(bound.serve_with_shutdown(async move {
        let _ = stop_rx.await;
    }));

    let http = reqwest::Client::new();
    let health = http.get(format!("http://{}/health", addr)).send().await.unwrap();
    assert!(health.status().is_success());

    stop_tx.send(()).unwrap();
    let result = timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());

    let fresh = reqwest::Client::new();
    assert!(fresh.get(format!("http://{}/health", addr)).send().await.is_err());
}
