//! Server network layer: TCP accept task and tick loop coordination

use crate::config::ServerConfig;
use crate::session_manager::{DispatchError, SessionManager};
use log::{debug, error, info, warn};
use shared::{JoinRequest, ALL_RELATIONSHIPS};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    ConnectionAccepted { stream: TcpStream, addr: SocketAddr },
    Shutdown,
}

/// Stops a running [`Server`] from another task
#[derive(Clone)]
pub struct ShutdownHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ShutdownHandle {
    /// Returns false if the server loop has already exited.
    pub fn shutdown(&self) -> bool {
        self.server_tx.send(ServerMessage::Shutdown).is_ok()
    }
}

/// Main server coordinating the listener and the simulation
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    manager: SessionManager,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_manager(SessionManager::new(config)).await
    }

    /// Binds the manager's configured address.
    pub async fn with_manager(manager: SessionManager) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&manager.config().bind_address).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            tick_duration: manager.config().tick_duration,
            manager,
            server_tx,
            server_rx,
        })
    }

    /// Bound address; useful when binding port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Spawns task that accepts incoming TCP connections
    fn spawn_acceptor(&mut self) -> Option<JoinHandle<()>> {
        let listener = self.listener.take()?;
        let server_tx = self.server_tx.clone();

        Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if server_tx
                            .send(ServerMessage::ConnectionAccepted { stream, addr })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }))
    }

    fn handle_accepted(&mut self, stream: TcpStream, addr: SocketAddr) {
        match self.manager.accept(stream) {
            Some(id) => info!("Client connected from {} as connection {}", addr, id),
            None => warn!("Dropped connection from {}", addr),
        }
    }

    fn start_test_client(&mut self) {
        let config = self.manager.config();
        let join = JoinRequest {
            relationships: vec![ALL_RELATIONSHIPS.to_string()],
            send_scene_info: config.send_scene_info,
            ..JoinRequest::default()
        };
        let mode = config.test_client_input;
        if self.manager.create_test_client(&join, mode).is_none() {
            warn!("Running without test client");
        }
    }

    /// Blocks until the first remote client has sent `CREATE_ENVIRONMENT`.
    ///
    /// Returns false if a shutdown arrived first.
    async fn await_first_environment(&mut self) -> bool {
        loop {
            let (stream, addr) = match self.server_rx.recv().await {
                Some(ServerMessage::ConnectionAccepted { stream, addr }) => (stream, addr),
                Some(ServerMessage::Shutdown) | None => return false,
            };
            let connection = match self.manager.accept(stream) {
                Some(id) => id,
                None => continue,
            };
            info!("First client connected from {}", addr);

            match self.manager.await_environment(connection).await {
                Ok(()) => return true,
                Err(DispatchError::ConnectionClosed(_)) => {
                    warn!("Connection {} closed before sending an environment", connection);
                    self.manager.disconnect(connection);
                }
                Err(e) => warn!("Environment not applied: {}", e),
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let acceptor = self.spawn_acceptor();

        if self.manager.config().create_test_client {
            self.start_test_client();
        }
        if self.manager.config().await_environment && !self.await_first_environment().await {
            info!("Server shutting down");
            if let Some(acceptor) = acceptor {
                acceptor.abort();
            }
            return Ok(());
        }

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::ConnectionAccepted { stream, addr }) => {
                            self.handle_accepted(stream, addr);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    self.manager.tick();
                    ticks += 1;

                    if ticks % 500 == 0 {
                        debug!(
                            "Tick {}: {} connections, {} avatars, step {}",
                            ticks,
                            self.manager.registry().len(),
                            self.manager.registry().avatar_count(),
                            self.manager.step()
                        );
                    }
                },
            }
        }

        if let Some(acceptor) = acceptor {
            acceptor.abort();
        }
        Ok(())
    }
}
