//! Connection lifecycle integration tests
//!
//! The full manager runs over the in-memory transport with tokio's clock
//! paused, so backoff and cooldown delays elapse instantly and exactly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;

use ara_realtime_client::config::{ProtocolKind, TransportConfig, TransportKind};
use ara_realtime_client::connection_manager::TimerKind;
use ara_realtime_client::protocol::WireProtocol;
use ara_realtime_client::transport::create_transport;
use ara_realtime_client::{
    ClientError, ConnectionEvent, ConnectionManager, ConnectionState, Credentials, MemoryTransport,
};

use common::*;

fn reconnecting(event: ConnectionEvent) -> (u32, Duration, ClientError) {
    match event {
        ConnectionEvent::Reconnecting {
            attempt,
            delay,
            error,
        } => (attempt, delay, error),
        other => panic!("expected Reconnecting, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_handshake_and_stats() {
    let (transport, mut server) = MemoryTransport::pair();
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));
    let mut events = manager.event_receiver();

    manager
        .connect(Credentials::new("42").with_token("secret"))
        .await
        .unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connecting);
    assert_eq!(manager.state(), ConnectionState::Connecting);

    let mut peer = server.accept().await.unwrap();
    assert_eq!(peer.credentials.identity, "42");
    let connect = handshake(&mut peer).await;
    assert_eq!(connect["payload"]["identity"], "42");
    assert_eq!(connect["payload"]["token"], "secret");

    match next_event(&mut events).await {
        ConnectionEvent::Connected { session_id, .. } => {
            assert_eq!(session_id.as_deref(), Some("session-1"))
        }
        other => panic!("expected Connected, got {:?}", other),
    }
    assert_eq!(manager.state(), ConnectionState::Connected);

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.state, ConnectionState::Connected);
    assert_eq!(stats.connections_established, 1);
    assert_eq!(stats.connect_attempts, 1);
    assert!(stats.connection_id.is_some());
    assert!(stats.armed_timers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_refused_attempts_back_off_exponentially() {
    let (transport, mut server) = MemoryTransport::pair();
    server.refuse_next(3);
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));
    let mut events = manager.event_receiver();

    let started = Instant::now();
    manager.connect("42").await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connecting);

    let mut delays = Vec::new();
    for expected_attempt in 2..=4 {
        let (attempt, delay, error) = reconnecting(next_event(&mut events).await);
        assert_eq!(attempt, expected_attempt);
        assert!(matches!(error, ClientError::ConnectionRefused(_)));
        delays.push(delay);
    }
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(1_000),
            Duration::from_millis(2_000),
            Duration::from_millis(4_000)
        ]
    );

    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Connected { .. }
    ));

    assert_eq!(started.elapsed(), Duration::from_millis(7_000));
    assert_eq!(server.open_attempts(), 4);
    assert_eq!(manager.stats().await.unwrap().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_count_survives_bare_transport_open() {
    let (transport, mut server) = MemoryTransport::pair();
    server.refuse_next(2);
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));
    let mut events = manager.event_receiver();

    manager.connect("42").await.unwrap();
    next_event(&mut events).await; // Connecting
    reconnecting(next_event(&mut events).await);
    reconnecting(next_event(&mut events).await);

    // Third attempt opens the transport but the handshake never completes
    let mut silent = server.accept().await.unwrap();
    expect_frame(&mut silent, "connect").await;

    let (attempt, delay, error) = reconnecting(next_event(&mut events).await);
    assert_eq!(attempt, 4);
    assert_eq!(delay, Duration::from_millis(4_000));
    assert!(matches!(error, ClientError::Timeout(_)));
    assert_eq!(manager.stats().await.unwrap().retry_count, 3);

    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Connected { .. }
    ));
    assert_eq!(manager.stats().await.unwrap().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_then_single_cooldown_cycle() {
    let (transport, server) = MemoryTransport::pair();
    server.refuse_next(u32::MAX);
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));
    let mut events = manager.event_receiver();

    manager.connect("42").await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connecting);
    for expected_attempt in 2..=10 {
        let (attempt, _, _) = reconnecting(next_event(&mut events).await);
        assert_eq!(attempt, expected_attempt);
    }
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Failed(ClientError::ExhaustedRetries { attempts: 10 })
    );
    assert_eq!(manager.state(), ConnectionState::Failed);
    assert_eq!(server.open_attempts(), 10);
    assert_eq!(
        manager.stats().await.unwrap().armed_timers,
        vec![TimerKind::Cooldown]
    );

    // Cooldown elapses: one fresh cycle starting from the base delay
    let before_cooldown = Instant::now();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connecting);
    assert_eq!(before_cooldown.elapsed(), Duration::from_millis(10_000));
    let (attempt, delay, _) = reconnecting(next_event(&mut events).await);
    assert_eq!(attempt, 2);
    assert_eq!(delay, Duration::from_millis(1_000));

    for _ in 3..=10 {
        reconnecting(next_event(&mut events).await);
    }
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Failed(ClientError::ExhaustedRetries { attempts: 10 })
    );
    assert_eq!(server.open_attempts(), 20);

    // No further automatic cycle
    let stats = manager.stats().await.unwrap();
    assert!(stats.armed_timers.is_empty());
    tokio::time::sleep(Duration::from_secs(3_600)).await;
    assert_eq!(server.open_attempts(), 20);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    // The host can always try again
    server.refuse_next(0);
    manager.connect("42").await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_backoff_cancels_everything() {
    let (transport, server) = MemoryTransport::pair();
    server.refuse_next(u32::MAX);
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));
    let mut events = manager.event_receiver();

    manager.connect("42").await.unwrap();
    next_event(&mut events).await; // Connecting
    reconnecting(next_event(&mut events).await);
    assert_eq!(manager.state(), ConnectionState::Reconnecting);

    manager.disconnect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);

    let attempts = server.open_attempts();
    let stats = manager.stats().await.unwrap();
    assert!(stats.armed_timers.is_empty());
    assert_eq!(stats.retry_count, 0);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(server.open_attempts(), attempts);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_live_link() {
    let (transport, mut server) = MemoryTransport::pair();
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));
    let mut events = manager.event_receiver();

    manager.connect("42").await.unwrap();
    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;
    next_event(&mut events).await; // Connecting
    next_event(&mut events).await; // Connected

    manager.disconnect().await.unwrap();
    assert_eq!(peer.recv().await, None);
    assert!(peer.is_closed());
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);

    // Reconnecting later works and starts a fresh cycle
    manager.connect("42").await.unwrap();
    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connecting);
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Connected { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_server_close_triggers_reconnect() {
    let (transport, mut server) = MemoryTransport::pair();
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));
    let mut events = manager.event_receiver();

    manager.connect("42").await.unwrap();
    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;
    next_event(&mut events).await; // Connecting
    next_event(&mut events).await; // Connected

    peer.close("server restart").await;
    let (attempt, delay, error) = reconnecting(next_event(&mut events).await);
    assert_eq!(attempt, 2);
    assert_eq!(delay, Duration::from_millis(1_000));
    assert_eq!(
        error,
        ClientError::ConnectionClosed("server restart".to_string())
    );

    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Connected { .. }
    ));
    assert_eq!(manager.stats().await.unwrap().connections_established, 2);
}

#[tokio::test(start_paused = true)]
async fn test_protocol_error_threshold_forces_reconnect() {
    let (transport, mut server) = MemoryTransport::pair();
    let mut config = test_config();
    config.client.max_protocol_errors = 3;
    let manager = ConnectionManager::new(config, Arc::new(transport));
    let mut events = manager.event_receiver();

    manager.connect("42").await.unwrap();
    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;
    next_event(&mut events).await; // Connecting
    next_event(&mut events).await; // Connected

    peer.send("{not json").await;
    peer.send("{not json").await;
    // A valid frame resets the count
    peer.send(json!({"type": "heartbeat"}).to_string()).await;
    for _ in 0..3 {
        peer.send("{not json").await;
    }

    let (_, _, error) = reconnecting(next_event(&mut events).await);
    assert!(matches!(error, ClientError::Protocol(_)));
    assert!(peer.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_server_error_during_handshake_is_a_failed_attempt() {
    let (transport, mut server) = MemoryTransport::pair();
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));
    let mut events = manager.event_receiver();

    manager.connect("42").await.unwrap();
    let mut peer = server.accept().await.unwrap();
    expect_frame(&mut peer, "connect").await;
    peer.send(json!({"type": "error", "code": "UNAUTHORIZED", "message": "bad token"}).to_string())
        .await;

    next_event(&mut events).await; // Connecting
    let (_, _, error) = reconnecting(next_event(&mut events).await);
    assert_eq!(
        error,
        ClientError::ConnectionRefused("UNAUTHORIZED: bad token".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_url_fails_without_retrying() {
    let (transport, server) = MemoryTransport::pair();
    let mut config = test_config();
    config.client.url = "   ".to_string();
    let manager = ConnectionManager::new(config, Arc::new(transport));
    let mut events = manager.event_receiver();

    manager.connect("42").await.unwrap();
    next_event(&mut events).await; // Connecting
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Failed(ClientError::InvalidUrl(_))
    ));
    assert_eq!(manager.state(), ConnectionState::Failed);
    // Rejected before reaching the server
    assert_eq!(server.open_attempts(), 0);
    assert!(manager.stats().await.unwrap().armed_timers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_manager_closes_link() {
    let (transport, mut server) = MemoryTransport::pair();
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));

    manager.connect("42").await.unwrap();
    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;

    drop(manager);
    assert_eq!(peer.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_waits_for_loop() {
    let (transport, mut server) = MemoryTransport::pair();
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));
    let mut state = manager.subscribe_state();

    manager.connect("42").await.unwrap();
    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;
    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();

    manager.dispose().await.unwrap();
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    assert_eq!(peer.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_memory_loopback_transport_from_config() {
    for protocol in [ProtocolKind::Json, ProtocolKind::Stomp] {
        let transport_config = TransportConfig {
            kind: TransportKind::Memory,
            ..TransportConfig::default()
        };
        let transport = create_transport(&transport_config, WireProtocol::from(protocol));
        assert_eq!(transport.name(), "memory");

        let mut config = test_config();
        config.client.protocol = protocol;
        let manager = ConnectionManager::new(config, transport);

        let (handler, mut payloads) = forwarding_handler();
        manager.subscribe("/topic/echo", handler).unwrap();
        manager
            .send("/topic/echo", &json!({"text": "hello"}))
            .unwrap();
        manager.connect("42").await.unwrap();

        assert_eq!(
            recv_payload(&mut payloads).await,
            json!({"text": "hello"}),
            "loopback over {:?}",
            protocol
        );
        manager.dispose().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_outbox_flushes_in_order_and_drops_oldest() {
    let (transport, mut server) = MemoryTransport::pair();
    let mut config = test_config();
    config.client.outbox_capacity = 2;
    let manager = ConnectionManager::new(config, Arc::new(transport));

    for n in 1..=3 {
        manager.send("chat/7", &json!({"n": n})).unwrap();
    }
    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.outbox_len, 2);
    assert_eq!(stats.outbox_dropped, 1);

    manager.connect("42").await.unwrap();
    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;

    let first = expect_frame(&mut peer, "send").await;
    let second = expect_frame(&mut peer, "send").await;
    assert_eq!(first["payload"]["body"]["n"], 2);
    assert_eq!(second["payload"]["body"]["n"], 3);
    assert_eq!(manager.stats().await.unwrap().outbox_len, 0);

    // Connected: sent straight away
    manager.send("chat/7", &json!({"n": 4})).unwrap();
    let live = expect_frame(&mut peer, "send").await;
    assert_eq!(live["payload"]["channel"], "chat/7");
    assert_eq!(live["payload"]["body"]["n"], 4);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_discards_queued_sends() {
    let (transport, mut server) = MemoryTransport::pair();
    let manager = ConnectionManager::new(test_config(), Arc::new(transport));

    manager.send("chat/7", &json!({"n": 1})).unwrap();
    manager.disconnect().await.unwrap();
    assert_eq!(manager.stats().await.unwrap().outbox_len, 0);

    manager.connect("42").await.unwrap();
    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;
    manager.send("chat/7", &json!({"n": 2})).unwrap();
    let frame = expect_frame(&mut peer, "send").await;
    assert_eq!(frame["payload"]["body"]["n"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_frames_count_toward_protocol_errors() {
    let (transport, mut server) = MemoryTransport::pair();
    let mut config = test_config();
    config.client.max_protocol_errors = 2;
    let manager = ConnectionManager::new(config, Arc::new(transport));
    let mut events = manager.event_receiver();

    manager.connect("42").await.unwrap();
    let mut peer = server.accept().await.unwrap();
    handshake(&mut peer).await;
    next_event(&mut events).await; // Connecting
    next_event(&mut events).await; // Connected

    assert!(peer.send_malformed("binary frame of 3 bytes").await);
    assert!(peer.send_malformed("binary frame of 3 bytes").await);

    let (_, _, error) = reconnecting(next_event(&mut events).await);
    assert!(matches!(error, ClientError::Protocol(_)));
    assert_eq!(manager.stats().await.unwrap().router.protocol_errors, 2);
}
