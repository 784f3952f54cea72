//! WebSocket Game Server
//!
//! Async WebSocket server for multiplayer connections.
//! Owns one shared world session, drives it from a fixed-rate timer and
//! routes decoded client messages into it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::{SessionError, WorldSession};

/// Time allowed to flush queued messages after a connection ends.
const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// The shared world.
    session: Arc<Mutex<WorldSession>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let session = WorldSession::new(&config);

        Self {
            config,
            session: Arc::new(Mutex::new(session)),
            shutdown_tx,
        }
    }

    /// The shared world session.
    pub fn session(&self) -> Arc<Mutex<WorldSession>> {
        self.session.clone()
    }

    /// Bind to the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run on an already bound listener until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);

        let game_handle = tokio::spawn(Self::run_game_loop(
            self.session.clone(),
            self.config.sim.step_ms(),
        ));
        let cleanup_handle = tokio::spawn(Self::run_cleanup_loop(
            self.session.clone(),
            self.config.connection_timeout,
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        game_handle.abort();
        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let session = self.session.clone();
        let queue = self.config.outbound_queue.max(1);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(queue);

            // The session holds the only sender; dropping it ends the writer.
            let joined = session.lock().await.connect(msg_tx);
            let (conn_id, entity) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    warn!("Rejecting {}: {}", addr, e);
                    let reject = ServerMessage::error(ErrorCode::ServerOverloaded, e.to_string());
                    if let Ok(text) = reject.to_json() {
                        let _ = ws_sender.send(Message::Text(text)).await;
                    }
                    let _ = ws_sender.close().await;
                    return;
                }
            };
            debug!("Client {} is {} piloting {}", addr, conn_id, entity);

            // Spawn message sender task
            let mut sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });
            let mut sender_done = false;

            // Handle incoming messages
            loop {
                tokio::select! {
                    frame = ws_receiver.next() => {
                        let decoded = match frame {
                            Some(Ok(Message::Text(text))) => ClientMessage::from_json(&text),
                            Some(Ok(Message::Binary(data))) => ClientMessage::from_bytes(&data),
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        let mut world = session.lock().await;
                        match decoded {
                            Ok(ClientMessage::Leave) => {
                                let _ = world.receive(&conn_id, ClientMessage::Leave);
                                break;
                            }
                            Ok(msg) => {
                                if let Err(e) = world.receive(&conn_id, msg) {
                                    debug!("Message from {} rejected: {}", addr, e);
                                    if matches!(e, SessionError::UnknownConnection(_)) {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                debug!("Invalid message from {}: {}", addr, e);
                                world.notify(
                                    &conn_id,
                                    ServerMessage::error(ErrorCode::InvalidMessage, "Invalid message format"),
                                );
                            }
                        }
                    }
                    _ = &mut sender_task, if !sender_done => {
                        // Session dropped the connection (idle) or the socket closed.
                        sender_done = true;
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        session.lock().await.notify(&conn_id, ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            // Cleanup
            session.lock().await.disconnect(&conn_id);
            if !sender_done {
                let _ = tokio::time::timeout(FLUSH_TIMEOUT, &mut sender_task).await;
                sender_task.abort();
            }

            info!("Client {} cleaned up", addr);
        });
    }

    /// Drive the world from a fixed-rate timer.
    ///
    /// Each firing feeds the wall-clock delta since the previous one; the
    /// simulation clamps it and runs however many steps are due.
    async fn run_game_loop(session: Arc<Mutex<WorldSession>>, step_ms: f64) {
        let tick_duration = Duration::from_secs_f64(step_ms.max(1.0) / 1000.0);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut last = Instant::now();
        loop {
            tick_interval.tick().await;

            let now = Instant::now();
            let delta_ms = now.duration_since(last).as_secs_f64() * 1000.0;
            last = now;

            let outcome = session.lock().await.advance(delta_ms);
            if outcome.steps > 1 {
                debug!(steps = outcome.steps, delta_ms, "catching up");
            }
        }
    }

    /// Drop connections that have gone silent.
    async fn run_cleanup_loop(session: Arc<Mutex<WorldSession>>, timeout: Duration) {
        let mut interval = interval(Duration::from_secs(1));

        loop {
            interval.tick().await;

            let mut world = session.lock().await;
            for id in world.idle_connections(timeout) {
                world.disconnect(&id);
                info!("Removed idle connection {}", id);
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.session.lock().await.connection_count()
    }
}
