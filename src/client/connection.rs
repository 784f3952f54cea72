//! WebSocket client transport.
//!
//! A reader task and a writer task bridge the socket to a pair of channels,
//! so the client loop only ever does non-blocking channel operations.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::network::protocol::{ClientMessage, ServerMessage};

/// Client transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Handshake or socket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound queue is full.
    #[error("Outbound queue full")]
    QueueFull,

    /// Connection is gone.
    #[error("Connection closed")]
    Closed,
}

/// Live connection to a server.
#[derive(Debug)]
pub struct ServerConnection {
    outgoing: mpsc::Sender<ClientMessage>,
    incoming: mpsc::Receiver<ServerMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ServerConnection {
    /// Connect to `url` (e.g. `ws://127.0.0.1:8080`).
    pub async fn connect(url: &str, queue: usize) -> Result<Self, ClientError> {
        info!("Connecting to {}", url);
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ClientMessage>(queue.max(1));
        let (incoming_tx, incoming_rx) = mpsc::channel::<ServerMessage>(queue.max(1));

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                        Ok(msg) => {
                            if incoming_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to parse server message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Server closed connection");
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            debug!("Reader task ended");
        });

        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let frame = match &msg {
                    ClientMessage::Input(input) => input.to_bytes().map(Message::Binary).ok(),
                    other => other.to_json().map(Message::Text).ok(),
                };
                let Some(frame) = frame else {
                    error!("Failed to serialize {:?}", msg);
                    continue;
                };
                if let Err(e) = write.send(frame).await {
                    error!("Failed to send message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Writer task ended");
        });

        Ok(Self {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
            reader,
            writer,
        })
    }

    /// Queue a message without waiting.
    pub fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        self.outgoing.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ClientError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ClientError::Closed,
        })
    }

    /// Wait for the next server message. `None` once the socket is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.incoming.recv().await
    }

    /// Every message received so far.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.incoming.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Whether the writer is still running.
    pub fn is_open(&self) -> bool {
        !self.writer.is_finished() && !self.outgoing.is_closed()
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
