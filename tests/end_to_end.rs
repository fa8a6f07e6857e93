//! Client against the line-protocol server over real sockets.

use chrono::{DateTime, TimeZone, Utc};
use graphite_client::{Client, ClientConfig, Error, Metric, ProtocolServer};
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(2);

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn specimen() -> Metric {
    Metric::new("abc", 123.03, at(1234567890))
}

fn specimens() -> Vec<Metric> {
    vec![
        Metric::new("abc", 123.03, at(1234567890)),
        Metric::new("abc", "123.03", at(1234567891)),
        Metric::new("abc", 123, at(1234567892)),
    ]
}

/// Same path, numerically equal value and timestamp within a second.
fn assert_equivalent(sent: &[Metric], received: &[Metric]) {
    assert_eq!(sent.len(), received.len(), "metric count");
    for (s, r) in sent.iter().zip(received) {
        assert_eq!(s.path, r.path);
        assert_eq!(s.value.as_f64(), r.value.as_f64());
        let (s_ts, r_ts) = (s.timestamp.unwrap(), r.timestamp.unwrap());
        assert!((s_ts - r_ts).num_milliseconds().abs() < 1000);
    }
}

async fn server() -> ProtocolServer {
    ProtocolServer::bind("127.0.0.1:0").await.unwrap()
}

#[tokio::test]
async fn test_sanity() {
    let server = server().await;
    let client = Client::with_defaults(&server.local_addr().to_string()).unwrap();

    assert_ok!(client.send(&specimens()).await);
    assert_ok!(client.close().await);

    let received = server.wait_for_metrics(3, WAIT).await;
    assert!(!server.has_errors(), "{:?}", server.errors());
    assert_equivalent(&specimens(), &received);

    // Guard against a comparison that accepts anything
    let off_by_a_bit = vec![
        Metric::new("abc", 123.02, at(1234567890)),
        Metric::new("abc", "123.02", at(1234567891)),
        Metric::new("abc", 122, at(1234567892)),
    ];
    for (s, r) in off_by_a_bit.iter().zip(&received) {
        assert_ne!(s.value.as_f64(), r.value.as_f64());
    }
}

#[tokio::test]
async fn test_prefix() {
    let server = server().await;
    let addr = server.local_addr().to_string();
    let metric = specimen();

    for prefix in ["prefix", "prefix."] {
        let client = Client::new(&addr, ClientConfig::default().with_prefix(prefix)).unwrap();
        assert_ok!(client.send(std::slice::from_ref(&metric)).await);
        assert_ok!(client.close().await);
    }

    let received = server.wait_for_metrics(2, WAIT).await;
    assert!(!server.has_errors(), "{:?}", server.errors());
    assert_eq!(received.len(), 2);
    for r in &received {
        assert_eq!(r.path, "prefix.abc");
        assert_eq!(r.value.as_f64(), Some(123.03));
        assert_eq!(r.timestamp, Some(at(1234567890)));
    }
    assert_eq!(metric.path, "abc");
}

#[tokio::test]
async fn test_empty_send() {
    let server = server().await;
    let client = Client::with_defaults(&server.local_addr().to_string()).unwrap();

    assert_ok!(client.send(&[]).await);
    assert!(client.is_connected().await);
    assert_ok!(client.close().await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!server.has_errors(), "{:?}", server.errors());
    assert!(server.metrics().is_empty());
}

#[tokio::test]
async fn test_invalid_metric_sends_nothing() {
    let server = server().await;
    let client = Client::with_defaults(&server.local_addr().to_string()).unwrap();

    assert_err!(client.send(&[Metric::default()]).await);
    assert_err!(client.send(&[Metric::new("", 2.5, Utc::now())]).await);
    assert_err!(
        client
            .send(&[Metric {
                path: "apple".to_string(),
                value: 2.5.into(),
                timestamp: None,
            }])
            .await
    );

    let mut batch = specimens();
    batch.insert(2, Metric::default());
    match client.send(&batch).await {
        Err(Error::Validation { index, .. }) => assert_eq!(index, 2),
        other => panic!("unexpected: {:?}", other),
    }

    assert_ok!(client.close().await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.metrics().is_empty());
    assert!(!server.has_errors(), "{:?}", server.errors());
}

#[tokio::test]
async fn test_send_after_close() {
    let server = server().await;
    let client = Client::with_defaults(&server.local_addr().to_string()).unwrap();

    assert_ok!(client.send(&[specimen()]).await);
    assert_ok!(client.close().await);
    assert_ok!(client.send(&[specimen()]).await);
    assert_ok!(client.close().await);
    assert_ok!(client.close().await);

    let received = server.wait_for_metrics(2, WAIT).await;
    assert!(!server.has_errors(), "{:?}", server.errors());
    assert_equivalent(&[specimen(), specimen()], &received);
}

#[tokio::test]
async fn test_connection_reused_across_sends() {
    let server = server().await;
    let client = Client::with_defaults(&server.local_addr().to_string()).unwrap();

    for i in 0..5i64 {
        assert_ok!(client.send(&[Metric::new("seq", i, at(1000 + i))]).await);
    }
    assert_ok!(client.close().await);

    let received = server.wait_for_metrics(5, WAIT).await;
    let values: Vec<f64> = received.iter().filter_map(|m| m.value.as_f64()).collect();
    assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients() {
    const CLIENTS: usize = 8;
    const PER_CLIENT: usize = 50;

    let server = server().await;
    let addr = server.local_addr().to_string();

    let mut handles = Vec::new();
    for c in 0..CLIENTS {
        let addr = addr.clone();
        handles.push(tokio::spawn(async move {
            let client = Client::with_defaults(&addr).unwrap();
            let batch: Vec<Metric> = (0..PER_CLIENT)
                .map(|i| Metric::new(format!("client{}", c), i as i64, at(1_600_000_000)))
                .collect();
            client.send(&batch).await.unwrap();
            client.close().await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let received = server.wait_for_metrics(CLIENTS * PER_CLIENT, WAIT).await;
    assert!(!server.has_errors(), "{:?}", server.errors());
    assert_eq!(received.len(), CLIENTS * PER_CLIENT);

    for c in 0..CLIENTS {
        let path = format!("client{}", c);
        let values: Vec<f64> = received
            .iter()
            .filter(|m| m.path == path)
            .filter_map(|m| m.value.as_f64())
            .collect();
        let expected: Vec<f64> = (0..PER_CLIENT).map(|i| i as f64).collect();
        assert_eq!(values, expected, "order within {}", path);
    }
}

#[tokio::test]
async fn test_shared_client_serializes_sends() {
    let server = server().await;
    let client = std::sync::Arc::new(Client::with_defaults(&server.local_addr().to_string()).unwrap());

    let tasks: Vec<_> = (0..4)
        .map(|t| {
            let client = std::sync::Arc::clone(&client);
            tokio::spawn(async move {
                let batch: Vec<Metric> = (0..10)
                    .map(|i| Metric::new(format!("task{}", t), i, at(1)))
                    .collect();
                client.send(&batch).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    assert_ok!(client.close().await);

    let received = server.wait_for_metrics(40, WAIT).await;
    assert_eq!(received.len(), 40);
    // Each batch arrives contiguously on the single shared connection
    for chunk in received.chunks(10) {
        assert!(chunk.iter().all(|m| m.path == chunk[0].path));
    }
}

#[tokio::test]
async fn test_connect_refused_then_redial() {
    // Reserve a port, then free it so nothing listens there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::with_defaults(&addr.to_string()).unwrap();
    match client.send(&[specimen()]).await {
        Err(Error::Connect { .. }) => {}
        other => panic!("unexpected: {:?}", other),
    }
    assert!(!client.is_connected().await);

    let server = ProtocolServer::bind(addr).await.unwrap();
    assert_ok!(client.send(&[specimen()]).await);
    assert_ok!(client.close().await);

    let received = server.wait_for_metrics(1, WAIT).await;
    assert_equivalent(&[specimen()], &received);
}

#[tokio::test]
async fn test_send_after_server_closed() {
    let server = server().await;
    let addr = server.local_addr();
    let client = Client::with_defaults(&addr.to_string()).unwrap();
    assert_ok!(client.send(&[specimen()]).await);
    assert_eq!(server.wait_for_metrics(1, WAIT).await.len(), 1);

    assert_ok!(client.close().await);
    server.close().await;
    drop(server);

    match client.send(&[specimen()]).await {
        Err(Error::Connect { .. }) => {}
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_dial_timeout_is_typed() {
    // A listener that never accepts, with its accept queue filled up, drops
    // further SYNs so the next connect hangs.
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(0).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut held = Vec::new();
    for _ in 0..2 {
        if let Ok(Ok(stream)) =
            tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await
        {
            held.push(stream);
        }
    }
    assert!(!held.is_empty());

    let config = ClientConfig::default().with_dial_timeout(Duration::from_millis(200));
    let client = Client::new(&addr.to_string(), config).unwrap();

    let started = std::time::Instant::now();
    let err = client.send(&[specimen()]).await.unwrap_err();
    assert!(matches!(err, Error::ConnectTimeout { .. }), "unexpected: {:?}", err);
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!client.is_connected().await);

    drop(listener);
}

#[test]
fn test_address_errors() {
    for address in ["", "host:notaport", "a:b:c", "[::1"] {
        match Client::with_defaults(address) {
            Err(Error::Address { .. }) => {}
            other => panic!("{:?}: unexpected {:?}", address, other),
        }
    }
    assert_eq!(Client::with_defaults("localhost").unwrap().address(), "localhost:2003");
}
