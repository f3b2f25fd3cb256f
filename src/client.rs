//! Async Client
//!
//! A thin client for the dictionary protocol: one request, one reply, over a
//! persistent connection. Reconnect policy belongs to the caller; the client
//! only offers [`Client::connect_with_retry`] as a building block.

use crate::protocol::{Command, FrameDecoder, ProtocolError, Reply};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{info, warn};

/// Delay between connection attempts in [`Client::connect_with_retry`].
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors returned by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server sent something that is not a valid reply
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server closed the connection before replying
    #[error("connection closed by server")]
    ConnectionClosed,
}

/// A connection to a dictionary server.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    buffer: BytesMut,
    decoder: FrameDecoder,
}

impl Client {
    /// Connects once.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            decoder: FrameDecoder::new(),
        })
    }

    /// Connects, retrying every `delay` until it succeeds.
    pub async fn connect_with_retry(addr: SocketAddr, delay: Duration) -> Self {
        loop {
            info!(%addr, "Connecting");
            match Self::connect(addr).await {
                Ok(client) => {
                    info!(%addr, "Connected");
                    return client;
                }
                Err(e) => {
                    warn!(%addr, error = %e, "Failed to connect");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub async fn get(&mut self, key: impl Into<String>) -> Result<Reply, ClientError> {
        self.send(&Command::get(key)).await
    }

    pub async fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Reply, ClientError> {
        self.send(&Command::set(key, value)).await
    }

    /// Sends `command` and waits for its reply.
    pub async fn send(&mut self, command: &Command) -> Result<Reply, ClientError> {
        let frame = command.encode()?;
        self.stream.write_all(&frame).await?;

        loop {
            if let Some(body) = self.decoder.decode_frame(&mut self.buffer)? {
                return Ok(Reply::from_body(&body)?);
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}
