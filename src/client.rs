//! Thin connect layer: TCP dial plus handshake timeout, builder-style
//! configuration — everything below "here is a live `Connection`" is
//! [`crate::connection::Connection`]'s job, not this module's.

use std::time::Duration;

use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::ClientError;

#[derive(Clone)]
pub struct Connector {
    config: Config,
    handshake_timeout: Duration,
}

impl Connector {
    pub fn new(config: Config) -> Connector {
        Connector {
            config,
            handshake_timeout: Duration::from_secs(5),
        }
    }

    pub fn handshake_timeout(mut self, d: Duration) -> Self {
        self.handshake_timeout = d;
        self
    }

    /// Dials `addr` over plain TCP and runs the HTTP/2 client preface.
    /// TLS/ALPN negotiation happens before this crate gets involved — the
    /// caller is expected to hand `connect_tls` an already-negotiated
    /// `h2` stream when operating over TLS.
    pub async fn connect<A: ToSocketAddrs>(&self, addr: A) -> Result<Connection, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        stream.set_nodelay(true).map_err(ClientError::Connect)?;
        self.connect_stream(stream).await
    }

    pub async fn connect_stream<T>(&self, stream: T) -> Result<Connection, ClientError>
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        timeout(self.handshake_timeout, Connection::handshake(stream, self.config.clone()))
            .await
            .map_err(|_| ClientError::HandshakeTimeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_over_duplex_transport_succeeds() {
        let (client, mut server) = tokio::io::duplex(1 << 16);

        let server_task = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut preface = [0u8; 24];
            server.read_exact(&mut preface).await.unwrap();
            assert_eq!(&preface, crate::frame::PREFACE);

            // Drain whatever SETTINGS/WINDOW_UPDATE the client sent, then
            // reply with our own empty SETTINGS so the handshake can
            // complete without depending on frame boundaries.
            let mut buf = [0u8; 4096];
            let _ = tokio::time::timeout(Duration::from_millis(100), server.read(&mut buf)).await;

            let mut settings = bytes::BytesMut::new();
            crate::frame::Settings::default().encode(&mut settings);
            server.write_all(&settings).await.unwrap();
            server
        });

        let connector = Connector::new(Config::default());
        let connection = connector.connect_stream(client).await.unwrap();
        assert_eq!(connection.open_stream_count(), 0);

        server_task.abort();
    }
}
