use crate::game::ObserverState;
use crate::input::{parse_line, ClientAction, InputManager, HELP};
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{Command, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::interval;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    state: ObserverState,
    inputs: InputManager,
}

impl Client {
    pub async fn new(server_addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;
        Ok(Client {
            socket,
            server_addr,
            state: ObserverState::new(),
            inputs: InputManager::new(),
        })
    }

    pub fn state(&self) -> &ObserverState {
        &self.state
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn send_command(&self, command: Command) -> Result<(), Box<dyn std::error::Error>> {
        let Some(issuer) = self.state.session_id else {
            warn!("Not connected yet, dropping {:?}", command);
            return Ok(());
        };
        self.send_packet(&Packet::Command { issuer, command }).await
    }

    async fn send_move(&mut self, x: f32, z: f32) -> Result<(), Box<dyn std::error::Error>> {
        if !self.state.is_connected() {
            return Ok(());
        }
        if !self.state.can_move && (x != 0.0 || z != 0.0) {
            info!("You cannot move right now");
        }
        let input = self.inputs.next_input(x, z);
        self.send_packet(&Packet::Input {
            sequence: input.sequence,
            timestamp: input.timestamp,
            move_x: input.move_x,
            move_z: input.move_z,
        })
        .await?;
        self.state.record_input(input);
        Ok(())
    }

    /// Handles one console line. Returns false when the user asked to quit.
    async fn handle_line(&mut self, line: &str) -> Result<bool, Box<dyn std::error::Error>> {
        match parse_line(line) {
            Ok(ClientAction::Command(command)) => self.send_command(command).await?,
            Ok(ClientAction::Move { x, z }) => self.send_move(x, z).await?,
            Ok(ClientAction::Quit) => return Ok(false),
            Err(crate::input::ParseError::Empty) => {}
            Err(e) => {
                warn!("{}", e);
                info!("{}", HELP);
            }
        }
        Ok(true)
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}", self.server_addr);
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await?;
        info!("{}", HELP);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        let mut buffer = [0u8; 8192];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => match deserialize::<Packet>(&buffer[..len]) {
                            Ok(packet) => {
                                self.state.apply_packet(packet);
                            }
                            Err(e) => warn!("Undecodable packet: {}", e),
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if !self.handle_line(&line).await? {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!("Failed to read console: {}", e);
                            break;
                        }
                    }
                },

                _ = heartbeat.tick() => {
                    if self.state.is_connected() {
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Failed to send heartbeat: {}", e);
                        }
                    }
                },
            }
        }

        if self.state.is_connected() {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }
        info!("Bye");
        Ok(())
    }
}
