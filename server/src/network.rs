//! Server network layer: UDP tasks around the authoritative tick loop

use crate::client_manager::ClientManager;
use crate::game::{GameState, TickOutcome};
use log::{debug, error, info, warn};
use shared::codec;
use shared::config::GameConfig;
use shared::{Packet, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the game loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastPacket { packet: Packet, exclude: Option<u32> },
}

/// Main server coordinating networking and the authoritative simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    tick_duration: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: Arc<GameConfig>,
        max_clients: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {} at {} Hz", addr, config.tick_rate);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let tick_duration = Duration::from_secs_f64(1.0 / config.tick_rate.max(1) as f64);

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            game_state: GameState::new(config),
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Packet::from_bytes(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) = server_tx.send(ServerMessage::PacketReceived { packet, addr }) {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping malformed packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = packet.to_bytes()?;
        if data.len() > MAX_PACKET_SIZE {
            return Err(format!("packet of {} bytes exceeds datagram limit", data.len()).into());
        }
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<u32>) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket { packet, exclude }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Ends a session: tells the client why, then forgets it everywhere.
    async fn disconnect_client(&mut self, client_id: u32, reason: &str) {
        let addr = {
            let mut clients = self.clients.write().await;
            let addr = clients.addr_of(client_id);
            clients.remove_client(client_id);
            addr
        };
        if let Some(addr) = addr {
            self.send_packet(
                Packet::Disconnected {
                    reason: reason.to_string(),
                },
                addr,
            );
        }
        self.game_state.remove_player(client_id);
    }

    /// Routes one incoming packet. Commands are only decoded and buffered
    /// here; they take effect on the next tick.
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!("Client connecting from {} (version: {})", addr, client_version);

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                let existing_client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };
                if let Some(existing_id) = existing_client_id {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.clients.write().await.remove_client(existing_id);
                    self.game_state.remove_player(existing_id);
                }

                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr)
                };

                match client_id {
                    Some(client_id) => {
                        self.game_state.add_player(client_id);
                        self.send_packet(
                            Packet::Connected {
                                client_id,
                                tick: self.game_state.tick(),
                                tick_rate: self.game_state.config().tick_rate,
                            },
                            addr,
                        );
                        self.send_packet(self.game_state.full_state(), addr);
                    }
                    None => self.send_packet(
                        Packet::Disconnected {
                            reason: "Server full".to_string(),
                        },
                        addr,
                    ),
                }
            }

            Packet::Commands { frames } => {
                let client_id = {
                    let mut clients = self.clients.write().await;
                    let id = clients.find_client_by_addr(addr);
                    if let Some(id) = id {
                        clients.touch(id, frames.len());
                    }
                    id
                };
                let Some(client_id) = client_id else {
                    debug!("Commands from unknown address {}", addr);
                    return;
                };

                for frame in frames {
                    match codec::decode(&frame) {
                        Ok(command) => self.game_state.enqueue(client_id, command),
                        Err(e) if e.is_fatal() => {
                            warn!("Client {} sent an undecodable command: {}", client_id, e);
                            self.disconnect_client(client_id, "Corrupt command stream").await;
                            return;
                        }
                        Err(e) => warn!("Dropping malformed command from client {}: {}", client_id, e),
                    }
                }
            }

            Packet::Disconnect => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };
                if let Some(client_id) = client_id {
                    self.clients.write().await.remove_client(client_id);
                    self.game_state.remove_player(client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Hands one tick's output to the sender task.
    async fn publish(&mut self, outcome: TickOutcome) {
        if let Some(packet) = outcome.broadcast {
            self.broadcast_packet(packet, None);
        }

        let addrs = {
            let clients = self.clients.read().await;
            outcome
                .packets
                .iter()
                .map(|(client_id, _)| clients.addr_of(*client_id))
                .collect::<Vec<_>>()
        };
        for ((client_id, packet), addr) in outcome.packets.into_iter().zip(addrs) {
            if outcome.fatal.contains(&client_id) {
                continue;
            }
            match addr {
                Some(addr) => self.send_packet(packet, addr),
                None => debug!("No address for client {}, skipping tick {}", client_id, outcome.tick),
            }
        }

        for client_id in outcome.fatal {
            self.disconnect_client(client_id, "Command stream out of order").await;
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.game_state.remove_player(client_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let outcome = self.game_state.step();
                    if outcome.tick % 60 == 0 {
                        let client_count = self.clients.read().await.len();
                        if client_count > 0 {
                            debug!("Tick {}: {} clients", outcome.tick, client_count);
                        }
                    }
                    self.publish(outcome).await;
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::command::{CommandPayload, NetworkCommand, ShopRefreshCommand};
    use std::net::{IpAddr, Ipv4Addr};

    async fn test_server() -> Server {
        Server::new("127.0.0.1:0", Arc::new(GameConfig::default()), 4)
            .await
            .expect("bind ephemeral port")
    }

    fn client_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn drain(server: &mut Server) -> Vec<GameMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = server.game_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let addr = client_addr(8080);

        tx.send(ServerMessage::PacketReceived {
            packet: Packet::Connect { client_version: 1 },
            addr,
        })
        .unwrap();

        match rx.try_recv().unwrap() {
            ServerMessage::PacketReceived { packet, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(packet, Packet::Connect { client_version: 1 });
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_connect_sends_handshake_and_full_state() {
        let mut server = test_server().await;
        server
            .handle_packet(Packet::Connect { client_version: PROTOCOL_VERSION }, client_addr(9000))
            .await;

        let messages = drain(&mut server);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            GameMessage::SendPacket {
                packet: Packet::Connected { client_id, tick_rate, .. },
                ..
            } => {
                assert_eq!(*client_id, 1);
                assert_eq!(*tick_rate, GameConfig::default().tick_rate);
            }
            other => panic!("expected Connected, got {:?}", other),
        }
        match &messages[1] {
            GameMessage::SendPacket {
                packet: Packet::FullState { players, .. },
                ..
            } => assert_eq!(players.len(), 1),
            other => panic!("expected FullState, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_version_mismatch_is_refused() {
        let mut server = test_server().await;
        server
            .handle_packet(Packet::Connect { client_version: 999 }, client_addr(9001))
            .await;

        assert_eq!(server.game_state.player_count(), 0);
        match drain(&mut server).as_slice() {
            [GameMessage::SendPacket {
                packet: Packet::Disconnected { reason },
                ..
            }] => assert_eq!(reason, "Protocol version mismatch"),
            other => panic!("expected refusal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commands_are_buffered_until_tick() {
        let mut server = test_server().await;
        let addr = client_addr(9002);
        server
            .handle_packet(Packet::Connect { client_version: PROTOCOL_VERSION }, addr)
            .await;
        drain(&mut server);

        let refresh = NetworkCommand::request(1, 1, CommandPayload::ShopRefresh(ShopRefreshCommand { seed: 5 }));
        let packet = Packet::commands(&[refresh]).unwrap();
        server.handle_packet(packet, addr).await;

        assert_eq!(server.game_state.inbox_len(), 1);
        assert_eq!(server.game_state.player(1).unwrap().shop.refresh_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_command_tag_disconnects_sender() {
        let mut server = test_server().await;
        let addr = client_addr(9003);
        server
            .handle_packet(Packet::Connect { client_version: PROTOCOL_VERSION }, addr)
            .await;
        drain(&mut server);

        let mut frame = vec![0u8; codec::HEADER_LEN];
        frame[4] = 0xEE;
        server.handle_packet(Packet::Commands { frames: vec![frame] }, addr).await;

        assert_eq!(server.game_state.player_count(), 0);
        assert!(server.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_commands_from_unknown_address_are_ignored() {
        let mut server = test_server().await;
        server
            .handle_packet(Packet::Commands { frames: vec![vec![1, 2, 3]] }, client_addr(9004))
            .await;
        assert_eq!(server.game_state.inbox_len(), 0);
        assert!(drain(&mut server).is_empty());
    }
}
