//! Byte-stream transport boundary
//!
//! The WebSocket layer only needs `read`, `write_all` and `close`. Any tokio
//! async stream qualifies, which lets tests swap the TLS socket for an
//! in-memory duplex pipe.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;

use crate::adapters::errors::{ExchangeError, ExchangeResult};

/// Abstract encrypted byte stream
#[async_trait]
pub trait Transport: Send {
    /// Read available bytes; `Ok(0)` means the peer closed the stream
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    async fn close(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl<T> Transport for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }

    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        AsyncWriteExt::write_all(self, bytes).await?;
        AsyncWriteExt::flush(self).await
    }

    async fn close(&mut self) -> std::io::Result<()> {
        AsyncWriteExt::shutdown(self).await
    }
}

/// Produces a fresh connected transport for every (re)connection attempt
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: Transport + 'static;

    async fn connect(&self) -> ExchangeResult<Self::Stream>;
}

/// TCP + TLS (TLSv1.2 minimum) connector
#[derive(Debug, Clone)]
pub struct TlsConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TlsConnector {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self) -> ExchangeResult<Self::Stream> {
        let addr = format!("{}:{}", self.host, self.port);
        let timeout_ms = self.connect_timeout.as_millis() as u64;

        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ExchangeError::NetworkTimeout(timeout_ms))?
            .map_err(|e| ExchangeError::ConnectionFailed(format!("TCP connect to {}: {}", addr, e)))?;

        if let Err(e) = tcp.set_nodelay(true) {
            tracing::warn!(error = %e, "Failed to enable TCP_NODELAY");
        }

        let tls = native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()
            .map_err(|e| ExchangeError::ConnectionFailed(format!("TLS error: {}", e)))?;
        let tls = tokio_native_tls::TlsConnector::from(tls);

        let stream = tokio::time::timeout(self.connect_timeout, tls.connect(&self.host, tcp))
            .await
            .map_err(|_| ExchangeError::NetworkTimeout(timeout_ms))?
            .map_err(|e| ExchangeError::ConnectionFailed(format!("TLS handshake: {}", e)))?;

        tracing::debug!(host = %self.host, port = self.port, "TLS connection established");
        Ok(stream)
    }
}
