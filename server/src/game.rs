//! Authoritative simulation driven by the network loop
//!
//! Commands decoded from client packets wait in an inbox and are only handed
//! to the [`GameSyncManager`] on the tick boundary, so every state change the
//! server makes happens inside [`GameState::step`].

use log::{debug, info, warn};
use shared::command::{CommandPayload, NetworkCommand, PropertyAutoRecoverCommand};
use shared::config::GameConfig;
use shared::dispatch::{CommandOrigin, ProcessRole, Route};
use shared::error::CommandError;
use shared::state::{PlayerDelta, PlayerState};
use shared::sync::GameSyncManager;
use shared::Packet;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Everything one server tick produced for the network layer
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub tick: u32,
    /// Packets addressed to individual clients
    pub packets: Vec<(u32, Packet)>,
    /// Packet for every connected client, sent before the per-client ones
    pub broadcast: Option<Packet>,
    /// Clients whose session ended with a fatal error
    pub fatal: BTreeSet<u32>,
}

pub struct GameState {
    sync: GameSyncManager,
    inbox: Vec<(u32, NetworkCommand)>,
    last_broadcast: BTreeMap<u32, PlayerState>,
    ticks_since_keyframe: u32,
    roster_changed: bool,
}

impl GameState {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            sync: GameSyncManager::new(config, ProcessRole::Server),
            inbox: Vec::new(),
            last_broadcast: BTreeMap::new(),
            ticks_since_keyframe: 0,
            roster_changed: false,
        }
    }

    pub fn config(&self) -> &Arc<GameConfig> {
        self.sync.config()
    }

    pub fn tick(&self) -> u32 {
        self.sync.current_tick()
    }

    pub fn sync(&self) -> &GameSyncManager {
        &self.sync
    }

    pub fn player(&self, client_id: u32) -> Option<&PlayerState> {
        self.sync.player(client_id)
    }

    pub fn player_count(&self) -> usize {
        self.sync.arena().len()
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    pub fn add_player(&mut self, client_id: u32) -> PlayerState {
        let state = self.sync.spawn_player(client_id);
        info!(
            "Added player {} at ({:.1}, {:.1}, {:.1})",
            client_id, state.movement.position.x, state.movement.position.y, state.movement.position.z
        );
        self.roster_changed = true;
        state
    }

    pub fn remove_player(&mut self, client_id: u32) {
        self.inbox.retain(|(sender, _)| *sender != client_id);
        self.last_broadcast.remove(&client_id);
        if self.sync.remove_player(client_id).is_some() {
            info!("Removed player {}", client_id);
            self.roster_changed = true;
        }
    }

    /// Buffers a decoded command from `client_id` until the next tick.
    pub fn enqueue(&mut self, client_id: u32, command: NetworkCommand) {
        self.inbox.push((client_id, command));
    }

    /// Applies a server-authored command now, e.g. a gameplay event such
    /// as a buff or a reward.
    pub fn submit_authoritative(&mut self, command: NetworkCommand) -> Result<Route, CommandError> {
        self.sync.submit(command, CommandOrigin::Local)
    }

    /// Every player as of the current tick
    pub fn full_state(&self) -> Packet {
        Packet::FullState {
            tick: self.sync.current_tick(),
            players: self.sync.arena().iter().cloned().collect(),
        }
    }

    /// Admits the inbox, runs one tick and builds what must be sent.
    pub fn step(&mut self) -> TickOutcome {
        let mut fatal = BTreeSet::new();
        let mut request_rejections: BTreeMap<u32, Vec<u32>> = BTreeMap::new();

        for (sender, command) in std::mem::take(&mut self.inbox) {
            let tick = command.header.tick;
            if let Err(err) = self.sync.submit(command, CommandOrigin::Remote(sender)) {
                if GameSyncManager::is_fatal(&err) {
                    warn!("Client {} sent a fatal command: {}", sender, err);
                    fatal.insert(sender);
                } else {
                    request_rejections.entry(sender).or_default().push(tick);
                }
            }
        }

        self.auto_recover();

        let report = self.sync.tick();
        fatal.extend(report.fatal.iter().copied());

        let broadcast = if std::mem::take(&mut self.roster_changed) {
            Some(self.full_state())
        } else {
            None
        };
        let deltas = self.collect_deltas(broadcast.is_some());

        let mut packets = Vec::new();
        for client_id in self.sync.arena().connection_ids() {
            let mut rejected = report.rejected.get(&client_id).cloned().unwrap_or_default();
            if let Some(requests) = request_rejections.remove(&client_id) {
                rejected.extend(requests);
            }
            rejected.sort_unstable();
            rejected.dedup();
            packets.push((
                client_id,
                Packet::TickDelta {
                    tick: report.tick,
                    acknowledged: self.sync.last_applied(client_id),
                    rejected,
                    deltas: deltas.clone(),
                },
            ));
        }
        self.sync.finish_broadcast();

        if report.tick % 60 == 0 && !packets.is_empty() {
            debug!(
                "Tick {}: {} player(s), {} delta(s), {} fatal",
                report.tick,
                packets.len(),
                deltas.len(),
                fatal.len()
            );
        }

        TickOutcome {
            tick: report.tick,
            packets,
            broadcast,
            fatal,
        }
    }

    /// Regenerates resources once per simulated second.
    fn auto_recover(&mut self) {
        let tick_rate = self.config().tick_rate.max(1);
        let next = self.sync.current_tick().wrapping_add(1);
        if next % tick_rate != 0 {
            return;
        }
        for client_id in self.sync.arena().connection_ids() {
            let recover = NetworkCommand::server(
                client_id,
                self.sync.current_tick(),
                CommandPayload::PropertyAutoRecover(PropertyAutoRecoverCommand {
                    elapsed_ticks: tick_rate,
                }),
            );
            if let Err(err) = self.submit_authoritative(recover) {
                debug!("Auto recovery for {} skipped: {}", client_id, err);
            }
        }
    }

    /// Per-slice deltas against what was last broadcast. Keyframes resend
    /// every slice of every player.
    fn collect_deltas(&mut self, force_keyframe: bool) -> Vec<PlayerDelta> {
        self.ticks_since_keyframe += 1;
        let keyframe = force_keyframe || self.ticks_since_keyframe >= self.config().sync.resync_after_ticks;
        if keyframe {
            self.ticks_since_keyframe = 0;
        }

        let mut deltas = Vec::new();
        for state in self.sync.arena().iter() {
            let delta = match (keyframe, self.last_broadcast.get(&state.connection_id)) {
                (false, Some(previous)) => PlayerDelta::diff(previous, state),
                _ => Some(PlayerDelta::full(state)),
            };
            if let Some(delta) = delta {
                deltas.push(delta);
            }
            self.last_broadcast.insert(state.connection_id, state.clone());
        }
        deltas
    }
}
