//! In-process transport.
//!
//! Frames move over tokio channels without touching the codec. Used to run
//! the relay loop and clients inside one process, mostly in tests.

use async_trait::async_trait;
use roomcast_protocol::Frame;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::traits::{Connection, Connector, Transport, TransportError};

/// One end of an in-memory connection.
pub struct MemoryConnection {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

/// Create two connected ends.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryConnection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryConnection {
            tx: Some(a_tx),
            rx: b_rx,
        },
        MemoryConnection {
            tx: Some(b_tx),
            rx: a_rx,
        },
    )
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the sender ends the peer's stream.
        self.tx = None;
        self.rx.close();
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Accepting side of the in-memory transport.
pub struct MemoryListener {
    incoming: Mutex<mpsc::UnboundedReceiver<MemoryConnection>>,
}

/// Dialing side of the in-memory transport.
#[derive(Clone)]
pub struct MemoryConnector {
    listener: mpsc::UnboundedSender<MemoryConnection>,
}

/// Create a listener and a connector that dials it.
#[must_use]
pub fn listener() -> (MemoryListener, MemoryConnector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryListener {
            incoming: Mutex::new(rx),
        },
        MemoryConnector { listener: tx },
    )
}

#[async_trait]
impl Transport for MemoryListener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let conn = self
            .incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)?;
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (client, server) = pair();
        self.listener
            .send(server)
            .map_err(|_| TransportError::ConnectFailed("listener closed".to_string()))?;

        debug!("Opened in-memory connection");
        Ok(Box::new(client))
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}
