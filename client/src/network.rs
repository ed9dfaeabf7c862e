use crate::game::ClientGameState;
use crate::input::ScriptedInput;
use log::{debug, error, info, warn};
use shared::command::NetworkCommand;
use shared::config::GameConfig;
use shared::{Packet, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, Interval, MissedTickBehavior};

/// Headless network client
///
/// Owns the UDP socket and drives the local prediction loop: every tick it
/// samples scripted input, predicts the result and sends the produced
/// commands to the server. Server packets feed reconciliation.
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    config: Arc<GameConfig>,
    game_state: Option<ClientGameState>,
    input: ScriptedInput,

    /// Artificial round-trip latency, split between send and receive
    fake_ping_ms: u64,
    /// Stop after this many predicted ticks
    max_ticks: Option<u64>,
}

impl Client {
    /// Creates a client bound to an ephemeral local port
    ///
    /// `seed` drives the scripted input so runs are reproducible. The
    /// simulation state is created once the server completes the handshake.
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        seed: u64,
        max_ticks: Option<u64>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            config: Arc::new(GameConfig::default()),
            game_state: None,
            input: ScriptedInput::new(seed),
            fake_ping_ms,
            max_ticks,
        })
    }

    /// Prediction state, available after the handshake
    pub fn game_state(&self) -> Option<&ClientGameState> {
        self.game_state.as_ref()
    }

    /// Sends the connect request carrying our protocol version
    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}...", self.server_addr);
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await
    }

    /// Serializes and sends a packet to the server
    ///
    /// Applies half of the simulated ping before sending.
    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = packet.to_bytes()?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Ships one tick's commands as a single frame; empty ticks send nothing
    async fn send_commands(&self, commands: &[NetworkCommand]) -> Result<(), Box<dyn std::error::Error>> {
        if commands.is_empty() {
            return Ok(());
        }
        self.send_packet(&Packet::commands(commands)?).await
    }

    /// Processes one packet from the server
    ///
    /// Handshake replies create the prediction state, full states and tick
    /// deltas feed reconciliation. Returns the server's tick rate when the
    /// packet completes the handshake, and `Err` with the reason when the
    /// server ends the session.
    fn handle_packet(&mut self, packet: Packet) -> Result<Option<u32>, String> {
        match packet {
            Packet::Connected {
                client_id,
                tick,
                tick_rate,
            } => {
                info!("Connected! Client ID: {} (server tick {}, {} Hz)", client_id, tick, tick_rate);
                self.config = Arc::new(GameConfig::default().with_tick_rate(tick_rate));
                self.game_state = Some(ClientGameState::new(Arc::clone(&self.config), client_id, tick));
                return Ok(Some(tick_rate));
            }

            Packet::FullState { tick, players } => match self.game_state.as_mut() {
                Some(game) => game.apply_full_state(tick, players),
                None => debug!("Full state before handshake, ignoring"),
            },

            Packet::TickDelta {
                tick,
                acknowledged,
                rejected,
                deltas,
            } => {
                if let Some(game) = self.game_state.as_mut() {
                    if let Some(correction) = game.apply_tick_delta(tick, acknowledged, &rejected, &deltas) {
                        if !rejected.is_empty() {
                            info!(
                                "Server rejected tick(s) {:?}; refreshed {:?}",
                                rejected, correction.refreshed
                            );
                        }
                    }
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                return Err(reason);
            }

            _ => warn!("Unexpected packet type from server"),
        }
        Ok(None)
    }

    /// Fixed-rate timer that skips missed ticks instead of bursting
    fn tick_interval(tick_rate: u32) -> Interval {
        let mut ticks = interval(Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticks
    }

    /// Predicts one tick locally and ships the commands it produced.
    async fn step(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(game) = self.game_state.as_mut() else {
            return Ok(());
        };
        let Some(predicted) = game.predicted() else {
            return Ok(());
        };
        let frame = self.input.next_frame(predicted, &self.config);
        let commands = game.predict(&frame);
        self.send_commands(&commands).await
    }

    /// Logs prediction and reconciliation counters
    fn log_stats(&self) {
        if let Some(game) = &self.game_state {
            let stats = game.stats();
            info!(
                "Predicted {} tick(s), {} reconciliation(s), {} replayed, {} rejected; ack {:?} at server tick {}",
                stats.predicted_ticks,
                stats.reconciliations,
                stats.replayed_ticks,
                stats.rejected_ticks,
                game.last_ack(),
                game.server_tick()
            );
        }
    }

    /// Main client loop
    ///
    /// Connects, then alternates between receiving server packets and
    /// predicting on the tick timer. The timer is retuned to the server's
    /// tick rate once connected. Returns when `max_ticks` is reached or the
    /// server disconnects us.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut tick_interval = Self::tick_interval(self.config.tick_rate);
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];
        let mut ticks_run: u64 = 0;

        loop {
            let mut retune = None;
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match Packet::from_bytes(&buffer[..len]) {
                                Ok(packet) => match self.handle_packet(packet) {
                                    Ok(tick_rate) => retune = tick_rate,
                                    Err(_) => break,
                                },
                                Err(e) => warn!("Dropping malformed packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    if self.game_state.is_some() {
                        if let Err(e) = self.step().await {
                            error!("Error sending commands: {}", e);
                        }
                        ticks_run += 1;
                        if ticks_run % 300 == 0 {
                            self.log_stats();
                        }
                        if self.max_ticks.map_or(false, |max| ticks_run >= max) {
                            break;
                        }
                    }
                },
            }

            if let Some(tick_rate) = retune {
                tick_interval = Self::tick_interval(tick_rate);
            }
        }

        self.log_stats();
        if self.game_state.is_some() {
            if let Err(e) = self.send_packet(&Packet::Disconnect).await {
                warn!("Failed to send disconnect: {}", e);
            }
        }

        Ok(())
    }
}
