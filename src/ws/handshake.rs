//! HTTP/1.1 Upgrade handshake (client side)

use std::time::Duration;

use base64::Engine;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::shared::Transport;

/// Upper bound on the size of the server's response head
const MAX_RESPONSE_HEAD_BYTES: usize = 16 * 1024;

/// 16 random bytes, base64-encoded
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

pub fn build_request(host: &str, path: &str, key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        path, host, key
    )
}

/// Validate the response head (status line + headers, without the blank line)
pub fn validate_response(head: &str, key: &str) -> ExchangeResult<()> {
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    if !status_line.starts_with("HTTP/1.1 101") {
        return Err(ExchangeError::HandshakeFailed(format!(
            "unexpected status line: {:?}",
            status_line
        )));
    }

    let accept = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("sec-websocket-accept"))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| {
            ExchangeError::HandshakeFailed("missing Sec-WebSocket-Accept header".into())
        })?;

    let expected = derive_accept_key(key.as_bytes());
    if accept != expected {
        return Err(ExchangeError::HandshakeFailed(format!(
            "Sec-WebSocket-Accept mismatch: expected {}, got {}",
            expected, accept
        )));
    }

    Ok(())
}

/// Run the Upgrade handshake over `stream`.
///
/// Returns any bytes that arrived after the response head; they already
/// belong to the frame stream.
pub async fn perform_handshake<T>(
    stream: &mut T,
    host: &str,
    path: &str,
    timeout: Duration,
) -> ExchangeResult<Vec<u8>>
where
    T: Transport + ?Sized,
{
    let exchange = async {
        let key = generate_key();
        let request = build_request(host, path, &key);
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| ExchangeError::HandshakeFailed(format!("write failed: {}", e)))?;

        let mut received: Vec<u8> = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| ExchangeError::HandshakeFailed(format!("read failed: {}", e)))?;
            if n == 0 {
                return Err(ExchangeError::HandshakeFailed(
                    "connection closed during handshake".into(),
                ));
            }
            received.extend_from_slice(&chunk[..n]);

            if let Some(pos) = find_head_end(&received) {
                break pos;
            }
            if received.len() > MAX_RESPONSE_HEAD_BYTES {
                return Err(ExchangeError::HandshakeFailed(format!(
                    "response head exceeds {} bytes",
                    MAX_RESPONSE_HEAD_BYTES
                )));
            }
        };

        let head = String::from_utf8_lossy(&received[..head_end]).into_owned();
        validate_response(&head, &key)?;

        let leftover = received.split_off(head_end + 4);
        tracing::debug!(host = %host, path = %path, leftover = leftover.len(), "WebSocket handshake complete");
        Ok::<_, ExchangeError>(leftover)
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| ExchangeError::NetworkTimeout(timeout.as_millis() as u64))?
}

fn find_head_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Read the client's request from the server half and return its key
    async fn read_request(server: &mut tokio::io::DuplexStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 512];
        while find_head_end(&buf).is_none() {
            let n = AsyncReadExt::read(server, &mut chunk).await.unwrap();
            assert!(n > 0);
            buf.extend_from_slice(&chunk[..n]);
        }
        let text = String::from_utf8(buf).unwrap();
        text.lines()
            .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap()
            .trim()
            .to_string()
    }

    fn accept_response(key: &str) -> String {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            derive_accept_key(key.as_bytes())
        )
    }

    #[test]
    fn test_generate_key_is_16_bytes() {
        let key = generate_key();
        let raw = base64::engine::general_purpose::STANDARD.decode(&key).unwrap();
        assert_eq!(raw.len(), 16);
        assert_ne!(generate_key(), key);
    }

    #[test]
    fn test_build_request_headers() {
        let req = build_request("ws-feed.example.com", "/", "abc==");
        assert!(req.starts_with("GET / HTTP/1.1\r\n"));
        assert!(req.contains("Host: ws-feed.example.com\r\n"));
        assert!(req.contains("Upgrade: websocket\r\n"));
        assert!(req.contains("Connection: Upgrade\r\n"));
        assert!(req.contains("Sec-WebSocket-Key: abc==\r\n"));
        assert!(req.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_rfc_sample_accept_key() {
        let head = "HTTP/1.1 101 Switching Protocols\r\nsec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
        assert!(validate_response(head, "dGhlIHNhbXBsZSBub25jZQ==").is_ok());
    }

    #[test]
    fn test_non_101_status_rejected() {
        let err = validate_response("HTTP/1.1 403 Forbidden\r\nContent-Length: 0", "x").unwrap_err();
        assert!(matches!(err, ExchangeError::HandshakeFailed(_)));
    }

    #[test]
    fn test_wrong_accept_rejected() {
        let head = "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: bogus";
        let err = validate_response(head, "dGhlIHNhbXBsZSBub25jZQ==").unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn test_missing_accept_rejected() {
        let err = validate_response("HTTP/1.1 101 Switching Protocols", "x").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_handshake_success_returns_leftover() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let server_task = tokio::spawn(async move {
            let key = read_request(&mut server).await;
            let mut response = accept_response(&key).into_bytes();
            response.extend_from_slice(&[0x81, 0x02, b'h', b'i']);
            AsyncWriteExt::write_all(&mut server, &response).await.unwrap();
            server
        });

        let leftover = perform_handshake(&mut client, "localhost", "/", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(leftover, vec![0x81, 0x02, b'h', b'i']);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejected_status() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            read_request(&mut server).await;
            AsyncWriteExt::write_all(&mut server, b"HTTP/1.1 400 Bad Request\r\n\r\n")
                .await
                .unwrap();
            server
        });

        let result = perform_handshake(&mut client, "localhost", "/", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ExchangeError::HandshakeFailed(_))));
    }

    #[tokio::test]
    async fn test_handshake_peer_closes() {
        let (mut client, server) = tokio::io::duplex(4096);
        drop(server);
        let result = perform_handshake(&mut client, "localhost", "/", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ExchangeError::HandshakeFailed(_))));
    }

    #[tokio::test]
    async fn test_handshake_times_out() {
        let (mut client, _server) = tokio::io::duplex(4096);
        let result =
            perform_handshake(&mut client, "localhost", "/", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ExchangeError::NetworkTimeout(50))));
    }
}
