//! Integration tests for the line feed against an in-process relay.

use informant_rs::Error;
use informant_rs::feed::{FeedClient, LineFeed};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

async fn relay() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

#[test]
fn unique_labels_differ_per_call() {
    let a = LineFeed::unique_label();
    let b = LineFeed::unique_label();
    assert!(a.starts_with("build-informant-"));
    assert_ne!(a, b);
}

#[tokio::test]
async fn subscribe_sends_handshake_and_yields_deliveries() {
    let (listener, addr) = relay().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let handshake: Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

        let message = json!({"id": 7, "body": {"payload": {"buildid": "1"}}});
        write
            .write_all(format!("\n{message}\n").as_bytes())
            .await
            .unwrap();

        let mut acks = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            acks.push(serde_json::from_str::<Value>(&line).unwrap());
        }
        (handshake, acks)
    });

    let feed = LineFeed::new(&addr, "build-informant-test");
    let mut subscription = feed.subscribe("build.#").await.unwrap();
    let delivery = subscription.next().await.unwrap().unwrap();
    assert_eq!(delivery.body["payload"]["buildid"], "1");

    delivery.ack.acknowledge().await.unwrap();
    // A second ack must not reach the relay.
    delivery.ack.acknowledge().await.unwrap();
    drop(delivery);
    drop(subscription);

    let (handshake, acks) = server.await.unwrap();
    assert_eq!(
        handshake,
        json!({"subscribe": "build.#", "label": "build-informant-test"})
    );
    assert_eq!(acks, vec![json!({"ack": 7})]);
}

#[tokio::test]
async fn closed_connection_is_a_transient_feed_error() {
    let (listener, addr) = relay().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        lines.next_line().await.unwrap();
    });

    let feed = LineFeed::new(&addr, "label");
    let mut subscription = feed.subscribe("build.#").await.unwrap();
    server.await.unwrap();

    let err = subscription.next().await.unwrap_err();
    assert!(matches!(err, Error::Feed(_)), "got {err:?}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn invalid_lines_are_skipped_without_dropping_the_connection() {
    let (listener, addr) = relay().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap();

        // Not JSON, then JSON with an id but no body, then a real message.
        let good = json!({"id": "m-3", "body": {"payload": {"buildid": "3"}}});
        write
            .write_all(format!("not json\n{{\"id\":\"m-2\"}}\n{good}\n").as_bytes())
            .await
            .unwrap();

        let mut acks = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            acks.push(serde_json::from_str::<Value>(&line).unwrap());
        }
        acks
    });

    let feed = LineFeed::new(&addr, "label");
    let mut subscription = feed.subscribe("build.#").await.unwrap();
    let delivery = subscription.next().await.unwrap().unwrap();
    assert_eq!(delivery.body["payload"]["buildid"], "3");
    delivery.ack.acknowledge().await.unwrap();
    drop(delivery);
    drop(subscription);

    // The id-bearing invalid line is acked so the relay won't resend it.
    let acks = server.await.unwrap();
    assert_eq!(acks, vec![json!({"ack": "m-2"}), json!({"ack": "m-3"})]);
}

#[tokio::test]
async fn unreachable_relay_fails_to_subscribe() {
    let (listener, addr) = relay().await;
    drop(listener);

    let feed = LineFeed::new(&addr, "label");
    let err = match feed.subscribe("build.#").await {
        Ok(_) => panic!("subscribe should fail"),
        Err(e) => e,
    };
    assert!(matches!(err, Error::Io(_)), "got {err:?}");
}
