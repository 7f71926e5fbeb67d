//! End-to-end feed tests against an in-memory WebSocket server
//!
//! The connector hands the client one half of a duplex pipe per connection
//! attempt; the test drives the other half as the exchange.

use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use book_feed::adapters::coinbase::signing::{hmac_sha256_base64, verify_message};
use book_feed::adapters::coinbase::Credentials;
use book_feed::adapters::errors::{ExchangeError, ExchangeResult};
use book_feed::adapters::shared::Connector;
use book_feed::config::{AppConfig, TradingPair};
use book_feed::core::{ConnectionState, FeedClient, PairKey, StatusSnapshot, SubscriptionState};
use book_feed::ws::{encode_frame, parse_close_payload, parse_header, unmask, Frame, FrameError, Opcode};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Mock exchange
// =============================================================================

struct PipeConnector {
    servers: mpsc::UnboundedSender<DuplexStream>,
}

#[async_trait]
impl Connector for PipeConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> ExchangeResult<DuplexStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.servers
            .send(server)
            .map_err(|_| ExchangeError::ConnectionFailed("mock server gone".into()))?;
        Ok(client)
    }
}

/// Client stream whose reads fail with transient errors once `failing` is set
struct FlakyStream {
    inner: DuplexStream,
    failing: Arc<AtomicBool>,
    failures: Arc<AtomicUsize>,
}

impl AsyncRead for FlakyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.failing.load(Ordering::SeqCst) {
            let n = self.failures.fetch_add(1, Ordering::SeqCst);
            let kind = if n % 2 == 0 { ErrorKind::WouldBlock } else { ErrorKind::TimedOut };
            return Poll::Ready(Err(std::io::Error::from(kind)));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FlakyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Hands the test the server half plus a switch for this connection's read errors
struct FlakyConnector {
    servers: mpsc::UnboundedSender<(DuplexStream, Arc<AtomicBool>)>,
    failures: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for FlakyConnector {
    type Stream = FlakyStream;

    async fn connect(&self) -> ExchangeResult<FlakyStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let failing = Arc::new(AtomicBool::new(false));
        self.servers
            .send((server, failing.clone()))
            .map_err(|_| ExchangeError::ConnectionFailed("mock server gone".into()))?;
        Ok(FlakyStream {
            inner: client,
            failing,
            failures: self.failures.clone(),
        })
    }
}

struct MockServer {
    stream: DuplexStream,
    buf: Vec<u8>,
}

impl MockServer {
    /// Wait for the next connection and complete its upgrade handshake
    async fn accept(servers: &mut mpsc::UnboundedReceiver<DuplexStream>) -> Self {
        let stream = tokio::time::timeout(WAIT, servers.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped");
        Self::upgrade(stream).await
    }

    async fn upgrade(mut stream: DuplexStream) -> Self {
        let mut head = Vec::new();
        let mut chunk = [0u8; 512];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed during handshake");
            head.extend_from_slice(&chunk[..n]);
        }
        let request = String::from_utf8(head).unwrap();
        assert!(request.starts_with("GET / HTTP/1.1\r\n"));
        assert!(request.contains("Upgrade: websocket"));
        assert!(request.contains("Sec-WebSocket-Version: 13"));

        let key = request
            .split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("sec-websocket-key"))
            .map(|(_, value)| value.trim().to_string())
            .unwrap();
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            derive_accept_key(key.as_bytes())
        );
        stream.write_all(response.as_bytes()).await.unwrap();

        Self {
            stream,
            buf: Vec::new(),
        }
    }

    /// Next frame from the client, which must be masked
    async fn next_frame(&mut self) -> Option<Frame> {
        let mut chunk = [0u8; 4096];
        loop {
            match parse_header(&self.buf) {
                Ok(header) if self.buf.len() as u64 >= header.frame_len() => {
                    assert!(header.masked, "client frame not masked");
                    let key = header.mask_key.unwrap();
                    let end = header.frame_len() as usize;
                    let payload = unmask(&self.buf[header.header_byte_size..end], key);
                    self.buf.drain(..end);
                    return Some(Frame {
                        fin: header.fin,
                        opcode: header.opcode,
                        payload,
                    });
                }
                Ok(_) | Err(FrameError::Incomplete { .. }) => {}
                Err(e) => panic!("client sent a bad frame: {}", e),
            }
            let n = tokio::time::timeout(WAIT, self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for a client frame")
                .unwrap();
            if n == 0 {
                return None;
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn next_text(&mut self) -> serde_json::Value {
        let frame = self.next_frame().await.expect("client closed");
        assert_eq!(frame.opcode, Opcode::Text);
        assert!(frame.fin);
        serde_json::from_slice(&frame.payload).unwrap()
    }

    async fn send_frame(&mut self, fin: bool, opcode: Opcode, payload: &[u8]) {
        self.send_raw(&encode_frame(fin, opcode, payload, None)).await;
    }

    async fn send_text(&mut self, text: &str) {
        self.send_frame(true, Opcode::Text, text.as_bytes()).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.feed.ping_interval_ms = 60_000;
    config.feed.silence_timeout_ms = 120_000;
    config.feed.read_timeout_ms = 20;
    config.feed.handshake_timeout_ms = 2_000;
    config.feed.write_timeout_ms = 1_000;
    config.feed.reconnect.initial_delay_ms = 10;
    config.feed.reconnect.max_delay_ms = 10;
    config.feed.reconnect.jitter_ms = 0;
    config
}

/// Start `client` against the mock exchange; yields the server half of
/// every connection attempt
fn start(client: &mut FeedClient) -> mpsc::UnboundedReceiver<DuplexStream> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.start_with(PipeConnector { servers: tx });
    rx
}

fn product_ids(request: &serde_json::Value) -> Vec<String> {
    let mut ids: Vec<String> = request["product_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    ids.sort();
    ids
}

async fn wait_for_state(client: &FeedClient, key: PairKey, expected: SubscriptionState) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while client.subscription_state(key).await.unwrap() != expected {
        assert!(tokio::time::Instant::now() < deadline, "never reached {:?}", expected);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_snapshot<F>(client: &FeedClient, key: PairKey, done: F) -> StatusSnapshot
where
    F: Fn(&StatusSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let snapshot = client.snapshot(key).await.unwrap();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition never met: {}", snapshot);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

const TICKER: &str = r#"{"type":"ticker","product_id":"BTC-USD","sequence":10,"price":"42000.50","best_bid":"42000.00","best_bid_size":"1.5","best_ask":"42001.00","best_ask_size":"2.0","time":"2024-01-01T00:00:00.000000Z"}"#;

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_handshake_subscribe_and_confirm() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    let key = client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut server = MockServer::accept(&mut servers).await;
    let request = server.next_text().await;
    assert_eq!(request["type"], "subscribe");
    assert_eq!(product_ids(&request), vec!["BTC-USD"]);
    let channels = request["channels"].to_string();
    assert!(channels.contains("ticker"));
    assert!(channels.contains("heartbeat"));
    assert!(request.get("signature").is_none());

    wait_for_state(&client, key, SubscriptionState::Subscribed).await;

    server
        .send_text(r#"{"type":"subscriptions","channels":[{"name":"ticker","product_ids":["BTC-USD"]}]}"#)
        .await;
    wait_for_state(&client, key, SubscriptionState::Confirmed).await;
    assert_eq!(client.state().await, ConnectionState::Streaming);

    client.shutdown().await;
}

#[tokio::test]
async fn test_ticker_updates_status() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    let key = client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut server = MockServer::accept(&mut servers).await;
    server.next_text().await;
    server.send_text(TICKER).await;

    let snapshot = wait_for_snapshot(&client, key, |s| s.quote.last_price.is_some()).await;
    assert_eq!(snapshot.quote.last_price, Some(42000.5));
    assert_eq!(snapshot.quote.last_sequence, Some(10));
    assert!(snapshot.book.limited_data);
    assert_eq!(snapshot.book.best_bid().unwrap().price, 42000.0);
    assert_eq!(snapshot.book.best_ask().unwrap().size, 2.0);
    assert_eq!(
        client.subscription_state(key).await.unwrap(),
        SubscriptionState::Confirmed
    );

    client.shutdown().await;
}

#[tokio::test]
async fn test_fragmented_message_with_interleaved_ping() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    let key = client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut server = MockServer::accept(&mut servers).await;
    server.next_text().await;

    let (a, rest) = TICKER.split_at(20);
    let (b, c) = rest.split_at(40);
    server.send_frame(false, Opcode::Text, a.as_bytes()).await;
    server.send_frame(false, Opcode::Continuation, b.as_bytes()).await;
    server.send_frame(true, Opcode::Ping, b"keepalive").await;
    server.send_frame(true, Opcode::Continuation, c.as_bytes()).await;

    let pong = server.next_frame().await.unwrap();
    assert_eq!(pong.opcode, Opcode::Pong);
    assert_eq!(pong.payload, b"keepalive");

    let snapshot = wait_for_snapshot(&client, key, |s| s.quote.last_price.is_some()).await;
    assert_eq!(snapshot.quote.last_price, Some(42000.5));

    client.shutdown().await;
}

#[tokio::test]
async fn test_reserved_opcode_and_garbage_are_skipped() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    let key = client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut server = MockServer::accept(&mut servers).await;
    server.next_text().await;

    server.send_frame(true, Opcode::Reserved(0x3), b"mystery").await;
    // Reserved bits set: the reader drops these one byte at a time
    server.send_raw(&[0x70, 0x70]).await;
    server.send_text(TICKER).await;

    let snapshot = wait_for_snapshot(&client, key, |s| s.quote.last_price.is_some()).await;
    assert_eq!(snapshot.quote.last_price, Some(42000.5));
    assert_eq!(client.health().sessions(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_level2_snapshot_and_updates() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    let key = client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut server = MockServer::accept(&mut servers).await;
    server.next_text().await;

    server
        .send_text(
            r#"{"type":"snapshot","product_id":"BTC-USD","bids":[["42000.00","1.0"],["41999.00","2.0"]],"asks":[["42001.00","1.5"]]}"#,
        )
        .await;
    server
        .send_text(
            r#"{"type":"l2update","product_id":"BTC-USD","time":"2024-01-01T00:00:01Z","changes":[["buy","42000.00","0"],["sell","42002.00","3.0"]]}"#,
        )
        .await;

    let snapshot = wait_for_snapshot(&client, key, |s| s.book.asks.len() == 2).await;
    assert!(!snapshot.book.limited_data);
    assert_eq!(snapshot.book.bids.len(), 1);
    assert_eq!(snapshot.book.best_bid().unwrap().price, 41999.0);
    assert_eq!(snapshot.book.asks[1].price, 42002.0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_resubscribes_every_instrument() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    let btc = client.track(TradingPair::new("BTC", "USD")).await;
    let eth = client.track(TradingPair::new("ETH", "USD")).await;
    let mut servers = start(&mut client);

    let mut first = MockServer::accept(&mut servers).await;
    assert_eq!(product_ids(&first.next_text().await), vec!["BTC-USD", "ETH-USD"]);
    first.send_text(TICKER).await;
    wait_for_state(&client, btc, SubscriptionState::Confirmed).await;

    // Peer vanishes
    drop(first);

    let mut second = MockServer::accept(&mut servers).await;
    let request = second.next_text().await;
    assert_eq!(request["type"], "subscribe");
    assert_eq!(product_ids(&request), vec!["BTC-USD", "ETH-USD"]);

    wait_for_state(&client, btc, SubscriptionState::Subscribed).await;
    wait_for_state(&client, eth, SubscriptionState::Subscribed).await;
    assert!(client.health().disconnects() >= 1);

    // Sequence tracking restarted: a lower sequence than before is accepted
    second
        .send_text(r#"{"type":"ticker","product_id":"BTC-USD","sequence":3,"price":"43000.00"}"#)
        .await;
    let snapshot = wait_for_snapshot(&client, btc, |s| s.quote.last_price == Some(43000.0)).await;
    assert_eq!(snapshot.quote.last_sequence, Some(3));
    assert_eq!(snapshot.quote.stale_messages, 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_server_close_triggers_reconnect() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut first = MockServer::accept(&mut servers).await;
    first.next_text().await;
    let mut close = 1001u16.to_be_bytes().to_vec();
    close.extend_from_slice(b"going away");
    first.send_frame(true, Opcode::Close, &close).await;

    let mut second = MockServer::accept(&mut servers).await;
    assert_eq!(second.next_text().await["type"], "subscribe");

    client.shutdown().await;
}

#[tokio::test]
async fn test_unanswered_pings_trigger_reconnect() {
    let mut config = test_config();
    config.feed.ping_interval_ms = 50;
    config.feed.silence_timeout_ms = 0;
    let mut client = FeedClient::new(&config, None, None);
    client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut first = MockServer::accept(&mut servers).await;
    first.next_text().await;

    let mut pings = 0;
    while let Some(frame) = first.next_frame().await {
        if frame.opcode == Opcode::Ping {
            pings += 1;
        }
        if frame.opcode == Opcode::Close || pings >= 2 {
            break;
        }
    }
    assert_eq!(pings, 2);

    // Never answered: the client gives up on this connection
    let mut second = MockServer::accept(&mut servers).await;
    second.next_text().await;

    client.shutdown().await;
}

#[tokio::test]
async fn test_tracking_while_streaming_sends_new_subscription() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut server = MockServer::accept(&mut servers).await;
    assert_eq!(product_ids(&server.next_text().await), vec!["BTC-USD"]);

    let sol = client.track(TradingPair::new("SOL", "USD")).await;
    let request = server.next_text().await;
    assert_eq!(product_ids(&request), vec!["BTC-USD", "SOL-USD"]);
    wait_for_state(&client, sol, SubscriptionState::Subscribed).await;

    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_sends_normal_close() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut server = MockServer::accept(&mut servers).await;
    server.next_text().await;

    client.shutdown().await;
    assert!(!client.is_running());
    assert_eq!(client.state().await, ConnectionState::Disconnected);

    let close = server.next_frame().await.expect("close frame");
    assert_eq!(close.opcode, Opcode::Close);
    let (code, reason) = parse_close_payload(&close.payload);
    assert_eq!(code, Some(1000));
    assert_eq!(reason, "client shutdown");
    assert!(server.next_frame().await.is_none(), "stream closed after close frame");
}

#[tokio::test]
async fn test_failed_handshake_is_retried() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut rejected = tokio::time::timeout(WAIT, servers.recv()).await.unwrap().unwrap();
    let mut buf = [0u8; 1024];
    let n = rejected.read(&mut buf).await.unwrap();
    assert!(n > 0);
    rejected
        .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();

    let mut server = MockServer::accept(&mut servers).await;
    assert_eq!(server.next_text().await["type"], "subscribe");
    assert_eq!(client.health().disconnects(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_oversized_fragment_discards_whole_message() {
    let mut config = test_config();
    config.feed.max_frame_payload_bytes = 200;
    let mut client = FeedClient::new(&config, None, None);
    let key = client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut server = MockServer::accept(&mut servers).await;
    server.next_text().await;
    server
        .send_text(
            r#"{"type":"snapshot","product_id":"BTC-USD","bids":[["42000.00","1.0"],["41999.00","2.0"]],"asks":[["42001.00","1.5"]]}"#,
        )
        .await;
    wait_for_snapshot(&client, key, |s| s.book.bids.len() == 2).await;

    // The middle fragment is over the frame limit; the rest must not be spliced
    let middle = vec![r#"["41000.00","5.0"]"#; 17].join(",");
    assert!(middle.len() > 200);
    server
        .send_frame(false, Opcode::Text, br#"{"type":"snapshot","product_id":"BTC-USD","bids":["#)
        .await;
    server.send_frame(false, Opcode::Continuation, middle.as_bytes()).await;
    server
        .send_frame(true, Opcode::Continuation, br#"],"asks":[["500","1"]]}"#)
        .await;
    server
        .send_text(r#"{"type":"ticker","product_id":"BTC-USD","sequence":11,"price":"100.5"}"#)
        .await;

    let snapshot = wait_for_snapshot(&client, key, |s| s.quote.last_price == Some(100.5)).await;
    assert_eq!(snapshot.book.bids.len(), 2);
    assert_eq!(snapshot.book.best_bid().unwrap().price, 42000.0);
    assert_eq!(snapshot.book.asks.len(), 1);
    assert_eq!(snapshot.book.best_ask().unwrap().price, 42001.0);
    assert_eq!(client.health().sessions(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_bare_level_updates_apply_to_single_instrument() {
    let config = test_config();
    let mut client = FeedClient::new(&config, None, None);
    let key = client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut server = MockServer::accept(&mut servers).await;
    server.next_text().await;
    server
        .send_text(
            r#"{"type":"snapshot","product_id":"BTC-USD","bids":[["42000.00","1.0"]],"asks":[["42001.00","1.5"]]}"#,
        )
        .await;
    server.send_text(r#"[["buy","41998.00","4.0"],["buy","41997.00","1.0"]]"#).await;
    server.send_text(r#"["sell","42001.00","0"]"#).await;

    let snapshot =
        wait_for_snapshot(&client, key, |s| s.book.bids.len() == 3 && s.book.asks.is_empty()).await;
    assert_eq!(snapshot.book.bids.len(), 3);
    assert_eq!(snapshot.book.bids[1].price, 41998.0);
    assert_eq!(snapshot.book.bids[1].size, 4.0);

    client.shutdown().await;
}

const SECRET: &str = "c3VwZXItc2VjcmV0LWtleS1ieXRlcw==";

fn assert_signed_level2(request: &serde_json::Value) {
    assert_eq!(request["type"], "subscribe");
    assert_eq!(product_ids(request), vec!["BTC-USD"]);
    assert_eq!(request["channels"][0]["name"], "level2");
    assert_eq!(request["key"], "test-key");
    assert_eq!(request["passphrase"], "test-pass");

    let timestamp: i64 = request["timestamp"].as_str().unwrap().parse().unwrap();
    let expected = hmac_sha256_base64(SECRET, &verify_message(timestamp)).unwrap();
    assert_eq!(request["signature"], expected.as_str());
}

#[tokio::test]
async fn test_signed_level2_subscription_resent_after_reconnect() {
    let config = test_config();
    let credentials = Credentials::new("test-key", SECRET, "test-pass");
    let mut client = FeedClient::new(&config, Some(credentials), None);
    let key = client.track(TradingPair::new("BTC", "USD")).await;
    let mut servers = start(&mut client);

    let mut first = MockServer::accept(&mut servers).await;
    let public = first.next_text().await;
    assert_eq!(public["channels"][0]["name"], "ticker");
    assert!(public.get("signature").is_none());
    assert_signed_level2(&first.next_text().await);
    wait_for_state(&client, key, SubscriptionState::Subscribed).await;

    drop(first);

    let mut second = MockServer::accept(&mut servers).await;
    let public = second.next_text().await;
    assert!(public.get("signature").is_none());
    assert_signed_level2(&second.next_text().await);
    wait_for_state(&client, key, SubscriptionState::Subscribed).await;
    assert_eq!(client.health().disconnects(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_transient_read_errors_past_limit_trigger_reconnect() {
    let mut config = test_config();
    config.feed.max_transient_read_retries = 3;
    config.feed.transient_retry_sleep_ms = 5;
    let mut client = FeedClient::new(&config, None, None);
    let key = client.track(TradingPair::new("BTC", "USD")).await;

    let (tx, mut connections) = mpsc::unbounded_channel();
    let failures = Arc::new(AtomicUsize::new(0));
    client.start_with(FlakyConnector {
        servers: tx,
        failures: failures.clone(),
    });

    let (stream, failing) = tokio::time::timeout(WAIT, connections.recv()).await.unwrap().unwrap();
    let mut first = MockServer::upgrade(stream).await;
    first.next_text().await;
    wait_for_state(&client, key, SubscriptionState::Subscribed).await;
    assert_eq!(client.health().disconnects(), 0);

    failing.store(true, Ordering::SeqCst);

    let (stream, _) = tokio::time::timeout(WAIT, connections.recv())
        .await
        .expect("no reconnect after transient errors")
        .unwrap();
    let mut second = MockServer::upgrade(stream).await;
    assert_eq!(product_ids(&second.next_text().await), vec!["BTC-USD"]);
    // three retries, then the fourth error ends the session
    assert_eq!(failures.load(Ordering::SeqCst), 4);
    assert_eq!(client.health().disconnects(), 1);

    drop(first);
    client.shutdown().await;
}
