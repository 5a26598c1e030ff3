//! Plain-TCP IRC line transport

use super::{ConnectRequest, Connection, Connector, LineReader, LineWriter, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Longest inbound line kept, tags included; the rest of the line is dropped
pub const MAX_LINE_BYTES: usize = 8704;

/// Connector dialing `host:port` over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector with the given dial timeout
    #[inline]
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connection, TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&request.address))
            .await
            .map_err(|_| TransportError::Connect {
                address: request.address.clone(),
                reason: format!("timed out after {}s", self.connect_timeout.as_secs()),
            })?
            .map_err(|e| TransportError::Connect {
                address: request.address.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        tracing::debug!(address = %request.address, nick = %request.nick, "tcp connection open");

        Ok(Connection {
            writer: Box::new(TcpLineWriter { inner: write }),
            reader: Box::new(TcpLineReader {
                inner: BufReader::new(read),
                buf: Vec::with_capacity(512),
            }),
        })
    }
}

struct TcpLineWriter {
    inner: OwnedWriteHalf,
}

#[async_trait]
impl LineWriter for TcpLineWriter {
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        if line.contains(['\r', '\n']) {
            return Err(TransportError::Rejected(
                "line contains embedded CR/LF".to_string(),
            ));
        }
        let mut frame = Vec::with_capacity(line.len() + 2);
        frame.extend_from_slice(line.as_bytes());
        frame.extend_from_slice(b"\r\n");
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

struct TcpLineReader {
    inner: BufReader<OwnedReadHalf>,
    buf: Vec<u8>,
}

impl TcpLineReader {
    /// Consume input up to and including the next '\n'
    async fn skip_rest_of_line(&mut self) -> Result<(), TransportError> {
        let mut scratch = Vec::new();
        loop {
            scratch.clear();
            let n = (&mut self.inner)
                .take(MAX_LINE_BYTES as u64)
                .read_until(b'\n', &mut scratch)
                .await?;
            if n == 0 || scratch.ends_with(b"\n") {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl LineReader for TcpLineReader {
    async fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        self.buf.clear();
        let n = (&mut self.inner)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if !self.buf.ends_with(b"\n") && n == MAX_LINE_BYTES {
            tracing::warn!(limit = MAX_LINE_BYTES, "inbound line truncated");
            self.skip_rest_of_line().await?;
        }
        // IRC is byte-oriented; non-UTF-8 text is kept lossily
        let line = String::from_utf8_lossy(&self.buf);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerLabel;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_round_trip_strips_crlf() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b":irc1.test.net 001 c1a :Welcome\r\n")
                .await
                .unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let connector = TcpConnector::default();
        let request = ConnectRequest {
            server: ServerLabel::new("irc1.test.net").unwrap(),
            address,
            nick: "c1a".into(),
        };
        let mut conn = connector.connect(&request).await.unwrap();

        let line = conn.reader.read_line().await.unwrap();
        assert_eq!(line.as_deref(), Some(":irc1.test.net 001 c1a :Welcome"));

        conn.writer.write_line("NICK c1a").await.unwrap();
        assert_eq!(server.await.unwrap(), "NICK c1a\r\n");
    }

    async fn serve_once(payload: Vec<u8>) -> (Connection, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&payload).await.unwrap();
        });
        let request = ConnectRequest {
            server: ServerLabel::new("irc1.test.net").unwrap(),
            address,
            nick: "c1a".into(),
        };
        (TcpConnector::default().connect(&request).await.unwrap(), server)
    }

    #[tokio::test]
    async fn non_utf8_line_does_not_end_the_stream() {
        let (mut conn, server) =
            serve_once(b":irc1 NOTICE c1a :caf\xe9\r\n:irc1 2200 c1a :joined\r\n".to_vec()).await;
        server.await.unwrap();

        let first = conn.reader.read_line().await.unwrap().unwrap();
        assert_eq!(first, ":irc1 NOTICE c1a :caf\u{FFFD}");
        let second = conn.reader.read_line().await.unwrap();
        assert_eq!(second.as_deref(), Some(":irc1 2200 c1a :joined"));
        assert_eq!(conn.reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn overlong_line_is_truncated_and_resynced() {
        let mut payload = vec![b'a'; MAX_LINE_BYTES * 2 + 17];
        payload.extend_from_slice(b"\r\nPING :irc1\r\n");
        let (mut conn, server) = serve_once(payload).await;

        let first = conn.reader.read_line().await.unwrap().unwrap();
        assert_eq!(first.len(), MAX_LINE_BYTES);
        assert_eq!(conn.reader.read_line().await.unwrap().as_deref(), Some("PING :irc1"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_rejects_embedded_newline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _accept = tokio::spawn(async move { listener.accept().await });

        let request = ConnectRequest {
            server: ServerLabel::new("irc1.test.net").unwrap(),
            address,
            nick: "c1a".into(),
        };
        let mut conn = TcpConnector::default().connect(&request).await.unwrap();
        let result = conn.writer.write_line("PRIVMSG x :a\r\nQUIT").await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));
    }

    #[tokio::test]
    async fn tcp_connect_refused_is_connect_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let request = ConnectRequest {
            server: ServerLabel::new("irc1.test.net").unwrap(),
            address,
            nick: "c1a".into(),
        };
        let result = TcpConnector::default().connect(&request).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
