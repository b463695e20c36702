//! UDP transport and the authority's main loop.
//!
//! Three background tasks talk to the loop over channels: a receiver that
//! decodes datagrams, a sender that encodes and ships outgoing packets, and a
//! checker that expires silent sessions. The loop itself owns the
//! [`GameState`] and is the only place it is ever mutated.

use crate::client_manager::{SessionManager, SESSION_TIMEOUT};
use crate::config::GameConfig;
use crate::game::GameState;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{InputState, Packet, SessionId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Network tasks to main loop.
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    SessionTimeout { session: SessionId },
    #[allow(dead_code)]
    Shutdown,
}

/// Main loop to the sender task.
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
    },
}

pub struct Server {
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<SessionManager>>,
    game: GameState,
    tick_duration: Duration,
    tick_seconds: f32,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(addr: &str, config: GameConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Authority listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let tick_duration = config.tick_duration();
        let tick_seconds = config.tick_seconds();
        let sessions = SessionManager::new(config.max_clients);

        Ok(Server {
            socket,
            sessions: Arc::new(RwLock::new(sessions)),
            game: GameState::new(config)?,
            tick_duration,
            tick_seconds,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];
            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[..len]) {
                        Ok(packet) => {
                            if server_tx
                                .send(ServerMessage::PacketReceived { packet, addr })
                                .is_err()
                            {
                                error!("Main loop is gone, stopping receiver");
                                break;
                            }
                        }
                        Err(e) => warn!("Dropped undecodable datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let sessions = Arc::clone(&self.sessions);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = send_datagram(&socket, &packet, addr).await {
                            error!("Failed to send to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet } => {
                        let targets = sessions.read().await.addresses();
                        for (session, addr) in targets {
                            if let Err(e) = send_datagram(&socket, &packet, addr).await {
                                error!("Failed to send to session {}: {}", session, e);
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_timeout_checker(&self) {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let expired = sessions.write().await.expire_silent(SESSION_TIMEOUT);
                for session in expired {
                    if server_tx
                        .send(ServerMessage::SessionTimeout { session })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket { packet }) {
            error!("Failed to queue broadcast: {}", e);
        }
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                if client_version != PROTOCOL_VERSION {
                    warn!(
                        "Refused {}: protocol {} (expected {})",
                        addr, client_version, PROTOCOL_VERSION
                    );
                    self.send_packet(
                        Packet::Disconnected {
                            reason: format!(
                                "protocol version mismatch, server speaks {}",
                                PROTOCOL_VERSION
                            ),
                        },
                        addr,
                    );
                    return;
                }

                let admitted = self.sessions.write().await.admit(addr);
                match admitted {
                    Some(session_id) => {
                        self.game.add_participant(session_id);
                        self.send_packet(Packet::Connected { session_id }, addr);
                    }
                    None => {
                        info!("Refused {}: server full", addr);
                        self.send_packet(
                            Packet::Disconnected {
                                reason: "Server full".to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Heartbeat => {
                let mut sessions = self.sessions.write().await;
                if let Some(session) = sessions.session_for(addr) {
                    sessions.touch(session);
                }
            }

            Packet::Input {
                sequence,
                timestamp,
                move_x,
                move_z,
            } => {
                let mut sessions = self.sessions.write().await;
                if let Some(session) = sessions.session_for(addr) {
                    sessions.queue_input(
                        session,
                        InputState {
                            sequence,
                            timestamp,
                            move_x,
                            move_z,
                        },
                    );
                }
            }

            Packet::Command { issuer, command } => {
                let session = {
                    let mut sessions = self.sessions.write().await;
                    let session = sessions.session_for(addr);
                    if let Some(session) = session {
                        sessions.touch(session);
                    }
                    session
                };
                match session {
                    Some(session) => {
                        let _ = self.game.handle_command(session, issuer, &command);
                    }
                    None => warn!("Command {:?} from unknown address {}", command, addr),
                }
            }

            Packet::Disconnect => {
                let session = self.sessions.read().await.session_for(addr);
                if let Some(session) = session {
                    self.sessions.write().await.remove(session);
                    self.game.remove_participant(session);
                }
            }

            _ => {
                warn!("Unexpected packet from {}", addr);
            }
        }
    }

    /// Applies queued movement inputs oldest first.
    async fn process_inputs(&mut self) {
        let mut sessions = self.sessions.write().await;
        for (session, input) in sessions.inputs_in_arrival_order() {
            self.game.set_move_intent(session, &input);
            sessions.mark_processed(session, input.sequence);
        }
    }

    /// Routes this tick's broadcasts: untargeted ones to everyone, targeted
    /// ones to each listed session only.
    async fn flush_outbox(&mut self) {
        let broadcasts = self.game.drain_outbox();
        if broadcasts.is_empty() {
            return;
        }
        let sessions = self.sessions.read().await;
        for broadcast in broadcasts {
            let packet = Packet::Event(broadcast.event);
            match broadcast.targets {
                None => self.broadcast_packet(packet),
                Some(targets) => {
                    for session in targets {
                        if let Some(addr) = sessions.addr_of(session) {
                            self.send_packet(packet.clone(), addr);
                        }
                    }
                }
            }
        }
    }

    async fn send_snapshots(&mut self) {
        let sessions = self.sessions.read().await;
        if sessions.is_empty() {
            return;
        }
        let timestamp = timestamp_millis();
        for (session, addr) in sessions.addresses() {
            let packet =
                self.game
                    .snapshot_for(session, sessions.last_processed_input(session), timestamp);
            self.send_packet(packet, addr);
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        let mut last_tick = Instant::now();
        info!("Authority running at {:.0}Hz", 1.0 / self.tick_seconds);

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::SessionTimeout { session }) => {
                            info!("Session {} timed out", session);
                            self.game.remove_participant(session);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Authority shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let measured = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.process_inputs().await;
                    self.game.update(self.tick_seconds);
                    self.flush_outbox().await;
                    self.send_snapshots().await;

                    if self.game.tick % 60 == 0 && measured > 0.0 {
                        let connected = self.sessions.read().await.len();
                        debug!("Tick {}: {} sessions, {:.1}Hz", self.game.tick, connected, 1.0 / measured);
                    }
                },
            }
        }

        Ok(())
    }
}

async fn send_datagram(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
