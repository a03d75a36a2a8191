//! Connection capability used by the pool and the driver.
//!
//! The load engine never speaks WebSocket itself. It only needs to open a
//! session, wait for the next data message, optionally send one, and close.
//! [`WsConnector`] provides that on top of `tokio-tungstenite`; tests plug in
//! scripted transports.

use crate::error::TransportError;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Opens transport sessions to a URL.
pub trait Connector {
    type Conn: Transport;

    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Conn, TransportError>>;
}

/// One established session.
pub trait Transport {
    /// Resolves with the payload of the next data message.
    fn recv(&mut self) -> impl Future<Output = Result<Bytes, TransportError>>;

    fn send(&mut self, text: &str) -> impl Future<Output = Result<(), TransportError>>;

    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>>;
}

/// WebSocket client connector.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    connect_timeout: Option<Duration>,
}

impl WsConnector {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    type Conn = WsTransport;

    async fn connect(&self, url: &str) -> Result<WsTransport, TransportError> {
        let handshake = connect_async(url);
        let (stream, response) = match self.connect_timeout {
            Some(limit) => timeout(limit, handshake)
                .await
                .map_err(|_| TransportError::ConnectTimeout(limit))??,
            None => handshake.await?,
        };
        debug!(url = %url, status = %response.status(), "WebSocket handshake complete");
        Ok(WsTransport { stream })
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WsTransport {
    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Bytes::from(text)),
                Some(Ok(Message::Binary(data))) => return Ok(Bytes::from(data)),
                // Pings are answered by tungstenite on the next read/write.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text.to_owned())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            // Already closed by either side; nothing left to release.
            Err(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
            ) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
