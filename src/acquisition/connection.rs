//! One TCP channel to the interrogator.
//!
//! A [`Connection`] owns a single socket (command or streaming port). All
//! socket access goes through one async mutex, so a request write and its
//! response read happen as one exchange and at most one read is in flight.
//! An exchange abandoned after its request went out leaves one response
//! owed; the next exchange reads and discards it first.

use crate::config::defaults;
use crate::protocol::{DecodeError, Request, Response, ResponseHeader, HEADER_LENGTH};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Transport failures on a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {timeout:?} connecting to {addr}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("{name} is not connected")]
    NotConnected { name: String },

    #[error("connection closed while reading {what}")]
    Closed { what: &'static str },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Frame(#[from] DecodeError),
}

/// Read exactly one framed response from `reader`.
///
/// Suspends until the header and the full body are available. A peer
/// closing mid-frame is reported as [`ConnectionError::Closed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Response, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LENGTH];
    read_exact_or_closed(reader, &mut header, "response header").await?;
    let header = ResponseHeader::decode(&header);

    let mut body = vec![0u8; header.body_length()];
    read_exact_or_closed(reader, &mut body, "response body").await?;

    Ok(Response::from_parts(header, body)?)
}

async fn read_exact_or_closed<R>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ConnectionError::Closed { what })
        }
        Err(e) => Err(ConnectionError::Io(e)),
    }
}

/// A single framed TCP channel.
pub struct Connection {
    name: String,
    host: String,
    port: u16,
    connect_timeout: Duration,
    stream: Mutex<Option<BufReader<TcpStream>>>,
    connected: AtomicBool,
    /// Responses still owed for abandoned exchanges on the current socket
    unread: AtomicUsize,
}

/// Marks a response as owed unless the exchange reads it.
struct OwedResponse<'a> {
    unread: &'a AtomicUsize,
    armed: bool,
}

impl<'a> OwedResponse<'a> {
    const fn new(unread: &'a AtomicUsize) -> Self {
        Self { unread, armed: true }
    }

    fn settled(mut self) {
        self.armed = false;
    }
}

impl Drop for OwedResponse<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.unread.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Connection {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
            unread: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the socket. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut guard = self.stream.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let addr = self.addr();
        tracing::info!(connection = %self.name, address = %addr, "Connecting to interrogator");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout {
                addr: addr.clone(),
                timeout: self.connect_timeout,
            })?
            .map_err(|source| ConnectionError::ConnectFailed {
                addr: addr.clone(),
                source,
            })?;

        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(defaults::KEEPALIVE_TIME_SECS))
            .with_interval(Duration::from_secs(defaults::KEEPALIVE_INTERVAL_SECS));
        if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
            tracing::warn!(connection = %self.name, error = %e, "Failed to enable TCP keepalive");
        }
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(connection = %self.name, error = %e, "Failed to disable Nagle's algorithm");
        }

        *guard = Some(BufReader::new(stream));
        self.unread.store(0, Ordering::Release);
        self.connected.store(true, Ordering::Release);

        tracing::info!(connection = %self.name, "Connection established");
        Ok(())
    }

    /// Close the socket. Safe to call when not connected.
    pub async fn disconnect(&self) {
        let mut guard = self.stream.lock().await;
        if let Some(mut reader) = guard.take() {
            let _ = reader.get_mut().shutdown().await;
            tracing::info!(connection = %self.name, "Connection closed");
        }
        self.unread.store(0, Ordering::Release);
        self.connected.store(false, Ordering::Release);
    }

    /// Send `request` and read its response as one exchange.
    pub async fn execute(&self, request: &Request) -> Result<Response, ConnectionError> {
        let bytes = request.encode()?;
        let mut guard = self.stream.lock().await;
        let result = self.exchange(&mut guard, request, &bytes).await;
        self.settle(&mut guard, result)
    }

    async fn exchange(
        &self,
        guard: &mut Option<BufReader<TcpStream>>,
        request: &Request,
        bytes: &[u8],
    ) -> Result<Response, ConnectionError> {
        let reader = self.socket(guard)?;
        while self.unread.load(Ordering::Acquire) > 0 {
            let stale = read_frame(reader).await?;
            self.unread.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(connection = %self.name, message = %stale.message_text(), "Discarded response of an abandoned request");
        }

        tracing::debug!(connection = %self.name, command = %request, "Sending request");
        reader.get_mut().write_all(bytes).await?;
        let owed = OwedResponse::new(&self.unread);
        let result = read_frame(reader).await;
        owed.settled();
        result
    }

    /// Read the next framed response (streaming channel).
    pub async fn read(&self) -> Result<Response, ConnectionError> {
        let mut guard = self.stream.lock().await;
        let reader = self.socket(&mut guard)?;
        let result = read_frame(reader).await;
        self.settle(&mut guard, result)
    }

    /// Discard whatever arrives until the socket stays idle for `idle`.
    ///
    /// Returns the number of bytes discarded.
    pub async fn drain(&self, idle: Duration) -> Result<usize, ConnectionError> {
        let mut guard = self.stream.lock().await;
        let reader = self.socket(&mut guard)?;

        let mut buf = [0u8; 4096];
        let mut drained = 0usize;
        loop {
            match tokio::time::timeout(idle, reader.read(&mut buf)).await {
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => drained += n,
                Ok(Err(e)) => return Err(ConnectionError::Io(e)),
            }
        }
        Ok(drained)
    }

    fn socket<'a>(
        &self,
        guard: &'a mut Option<BufReader<TcpStream>>,
    ) -> Result<&'a mut BufReader<TcpStream>, ConnectionError> {
        guard.as_mut().ok_or_else(|| ConnectionError::NotConnected {
            name: self.name.clone(),
        })
    }

    /// Drop the socket once the peer has gone away.
    fn settle(
        &self,
        guard: &mut Option<BufReader<TcpStream>>,
        result: Result<Response, ConnectionError>,
    ) -> Result<Response, ConnectionError> {
        if matches!(result, Err(ConnectionError::Closed { .. })) {
            *guard = None;
            self.unread.store(0, Ordering::Release);
            self.connected.store(false, Ordering::Release);
            tracing::warn!(connection = %self.name, "Peer closed the connection");
        }
        result
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("addr", &self.addr())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Answers every request with its own command name as the message,
    /// splitting each response in two writes.
    async fn echo_server() -> (u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut pending = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                pending.extend_from_slice(&buf[..n]);
                while let Ok((request, consumed)) = Request::decode(&pending) {
                    pending.drain(..consumed);
                    let bytes = Response::ok(&request.command, vec![0; 4]).encode().unwrap();
                    let (head, tail) = bytes.split_at(5);
                    socket.write_all(head).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    socket.write_all(tail).await.unwrap();
                }
            }
        });
        (port, handle)
    }

    #[tokio::test]
    async fn concurrent_exchanges_are_serialized() {
        let (port, _server) = echo_server().await;
        let connection = Arc::new(Connection::new("test", "127.0.0.1", port));
        connection.connect().await.unwrap();
        assert!(connection.is_connected());

        let commands = [
            Command::GetFirmwareVersion,
            Command::IsReady,
            Command::GetNtpServer,
        ];
        let tasks: Vec<_> = commands
            .into_iter()
            .map(|command| {
                let connection = Arc::clone(&connection);
                tokio::spawn(async move {
                    let response = connection.execute(&Request::new(command)).await.unwrap();
                    (command, response)
                })
            })
            .collect();

        for task in tasks {
            let (command, response) = task.await.unwrap();
            assert!(response.succeeded);
            assert_eq!(response.message_text(), command.name());
            assert_eq!(response.content.len(), 4);
        }
    }

    #[tokio::test]
    async fn peer_closing_mid_frame_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let bytes = Response::ok("partial", vec![1; 32]).encode().unwrap();
            socket.write_all(&bytes[..12]).await.unwrap();
        });

        let connection = Connection::new("test", "127.0.0.1", port);
        connection.connect().await.unwrap();
        let err = connection.read().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed { what: "response body" }));
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn drain_counts_discarded_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[7u8; 300]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let connection = Connection::new("test", "127.0.0.1", port);
        connection.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let drained = connection.drain(Duration::from_millis(100)).await.unwrap();
        assert_eq!(drained, 300);
    }

    #[tokio::test]
    async fn abandoned_exchange_does_not_shift_later_responses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut pending = Vec::new();
            let mut buf = [0u8; 1024];
            let mut answered = 0;
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                pending.extend_from_slice(&buf[..n]);
                while let Ok((request, consumed)) = Request::decode(&pending) {
                    pending.drain(..consumed);
                    if answered == 0 {
                        tokio::time::sleep(Duration::from_millis(150)).await;
                    }
                    answered += 1;
                    let bytes = Response::ok(&request.command, Vec::new()).encode().unwrap();
                    socket.write_all(&bytes).await.unwrap();
                }
            }
        });

        let connection = Connection::new("test", "127.0.0.1", port);
        connection.connect().await.unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(30),
            connection.execute(&Request::new(Command::GetFirmwareVersion)),
        )
        .await;
        assert!(abandoned.is_err());

        let response = connection
            .execute(&Request::new(Command::IsReady))
            .await
            .unwrap();
        assert_eq!(response.message_text(), "#IsReady");
    }

    #[tokio::test]
    async fn requests_need_a_socket() {
        let connection = Connection::new("idle", "127.0.0.1", 1);
        let err = connection
            .execute(&Request::new(Command::IsReady))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected { .. }));
    }
}
