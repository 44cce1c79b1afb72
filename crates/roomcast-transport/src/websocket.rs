//! WebSocket transport implementation.
//!
//! Two connection types share one framing layer:
//!
//! - [`AxumConnection`] wraps a socket upgraded by the relay's axum router.
//! - [`WebSocketConnection`] is the client side, opened by
//!   [`WebSocketConnector`] through tokio-tungstenite.
//!
//! Binary messages carry length-prefixed MessagePack frames; text messages
//! carry one JSON frame each. The server side answers in whichever encoding
//! the peer used last.

use async_trait::async_trait;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use roomcast_protocol::{codec, Encoding, Frame, ProtocolError};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::traits::{Connection, Connector, TransportError};

/// Default maximum message size (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// An encoded frame ready to go out as a websocket message.
enum Payload {
    Binary(Vec<u8>),
    Text(String),
}

/// Framing state shared by both connection types.
struct FrameReader {
    buffer: BytesMut,
    encoding: Encoding,
    max_message_size: usize,
}

impl FrameReader {
    fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            encoding: Encoding::Binary,
            max_message_size,
        }
    }

    fn check_size(&self, len: usize) -> Result<(), TransportError> {
        if len > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                len, self.max_message_size
            );
            return Err(ProtocolError::FrameTooLarge(len).into());
        }
        Ok(())
    }

    /// Take the next complete frame out of the binary buffer.
    fn buffered(&mut self) -> Result<Option<Frame>, TransportError> {
        codec::decode_from(&mut self.buffer).map_err(|e| {
            // Whatever is left can't be resynchronised.
            self.buffer.clear();
            e.into()
        })
    }

    fn push_binary(&mut self, data: &[u8]) -> Result<Option<Frame>, TransportError> {
        self.check_size(data.len())?;
        self.encoding = Encoding::Binary;
        self.buffer.extend_from_slice(data);
        self.buffered()
    }

    fn push_text(&mut self, text: &str) -> Result<Frame, TransportError> {
        self.check_size(text.len())?;
        self.encoding = Encoding::Text;
        Ok(codec::decode_text(text)?)
    }

    fn encode(&self, frame: &Frame) -> Result<Payload, TransportError> {
        Ok(match self.encoding {
            Encoding::Binary => Payload::Binary(codec::encode(frame)?.to_vec()),
            Encoding::Text => Payload::Text(codec::encode_text(frame)?),
        })
    }
}

/// A WebSocket upgraded by axum on the relay side.
pub struct AxumConnection {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    reader: FrameReader,
    is_open: bool,
}

impl AxumConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket, remote_addr: Option<SocketAddr>, max_message_size: usize) -> Self {
        Self {
            socket,
            remote_addr,
            reader: FrameReader::new(max_message_size),
            is_open: true,
        }
    }
}

#[async_trait]
impl Connection for AxumConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        if let Some(frame) = self.reader.buffered()? {
            return Ok(Some(frame));
        }

        loop {
            match self.socket.recv().await {
                Some(Ok(AxumMessage::Binary(data))) => {
                    if let Some(frame) = self.reader.push_binary(&data)? {
                        return Ok(Some(frame));
                    }
                }
                Some(Ok(AxumMessage::Text(text))) => {
                    return self.reader.push_text(&text).map(Some);
                }
                Some(Ok(AxumMessage::Ping(data))) => {
                    if let Err(e) = self.socket.send(AxumMessage::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(AxumMessage::Pong(_))) => {}
                Some(Ok(AxumMessage::Close(_))) => {
                    debug!("Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    debug!("WebSocket error: {}", e);
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match self.reader.encode(&frame)? {
            Payload::Binary(data) => AxumMessage::Binary(data),
            Payload::Text(text) => AxumMessage::Text(text),
        };
        self.socket
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(());
        }

        self.socket
            .send(AxumMessage::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

/// Opens client connections to a relay's websocket endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    max_message_size: usize,
}

impl WebSocketConnector {
    /// Create a connector for a `ws://` or `wss://` url.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the largest message accepted from the relay.
    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// The url this connector dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        debug!("WebSocket handshake completed with {}", self.url);
        Ok(Box::new(WebSocketConnection::new(
            stream,
            self.url.clone(),
            self.max_message_size,
        )))
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

/// Client side of a websocket connection.
///
/// Always sends binary frames.
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
    reader: FrameReader,
    is_open: bool,
}

impl WebSocketConnection {
    fn new(
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        url: String,
        max_message_size: usize,
    ) -> Self {
        Self {
            stream,
            url,
            reader: FrameReader::new(max_message_size),
            is_open: true,
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        if let Some(frame) = self.reader.buffered()? {
            return Ok(Some(frame));
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if let Some(frame) = self.reader.push_binary(&data)? {
                        return Ok(Some(frame));
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    return self.reader.push_text(&text).map(Some);
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!("WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let data = codec::encode(&frame)?;
        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(());
        }

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(format!("Failed to close: {}", e))),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.url.clone())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
