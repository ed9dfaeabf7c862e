use crate::input::InputFrame;
use log::{debug, info};
use shared::calculators::battle::DefenderView;
use shared::command::{CommandPayload, NetworkCommand};
use shared::config::GameConfig;
use shared::dispatch::{CommandOrigin, ProcessRole, Route};
use shared::reconciliation::{Reconciliation, SnapshotBuffer};
use shared::state::{PlayerDelta, PlayerState, SliceKind};
use shared::sync::GameSyncManager;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Running totals for the prediction loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PredictionStats {
    pub predicted_ticks: u64,
    pub reconciliations: u64,
    pub replayed_ticks: u64,
    pub rejected_ticks: u64,
}

/// Client view of the world.
///
/// The local player exists twice: the predicted copy inside the sync
/// manager, advanced every tick from local input, and the authoritative copy
/// patched only by server deltas. Other players are read-only mirrors.
pub struct ClientGameState {
    client_id: u32,
    sync: GameSyncManager,
    snapshots: SnapshotBuffer,
    authoritative: Option<PlayerState>,
    mirrors: BTreeMap<u32, PlayerState>,
    last_ack: Option<u32>,
    server_tick: u32,
    stats: PredictionStats,
}

impl ClientGameState {
    pub fn new(config: Arc<GameConfig>, client_id: u32, server_tick: u32) -> Self {
        let history = config.sync.snapshot_history;
        let mut sync = GameSyncManager::new(
            config,
            ProcessRole::Client {
                local_connection_id: client_id,
            },
        );
        sync.set_current_tick(server_tick);
        Self {
            client_id,
            sync,
            snapshots: SnapshotBuffer::new(history),
            authoritative: None,
            mirrors: BTreeMap::new(),
            last_ack: None,
            server_tick,
            stats: PredictionStats::default(),
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn config(&self) -> &Arc<GameConfig> {
        self.sync.config()
    }

    pub fn current_tick(&self) -> u32 {
        self.sync.current_tick()
    }

    pub fn server_tick(&self) -> u32 {
        self.server_tick
    }

    pub fn last_ack(&self) -> Option<u32> {
        self.last_ack
    }

    pub fn stats(&self) -> PredictionStats {
        self.stats
    }

    pub fn snapshots(&self) -> &SnapshotBuffer {
        &self.snapshots
    }

    pub fn predicted(&self) -> Option<&PlayerState> {
        self.sync.player(self.client_id)
    }

    pub fn authoritative(&self) -> Option<&PlayerState> {
        self.authoritative.as_ref()
    }

    pub fn mirror(&self, connection_id: u32) -> Option<&PlayerState> {
        self.mirrors.get(&connection_id)
    }

    pub fn mirror_count(&self) -> usize {
        self.mirrors.len()
    }

    /// What the player sees: the predicted self plus every mirror
    pub fn players(&self) -> Vec<&PlayerState> {
        self.predicted().into_iter().chain(self.mirrors.values()).collect()
    }

    fn defender_views(&self) -> Vec<DefenderView> {
        self.mirrors
            .values()
            .map(|state| DefenderView::of(state, self.sync.config()))
            .collect()
    }

    /// Replaces every mirror and the authoritative copy; seeds the predicted
    /// copy the first time the local player shows up.
    pub fn apply_full_state(&mut self, tick: u32, players: Vec<PlayerState>) {
        self.server_tick = self.server_tick.max(tick);
        self.mirrors.clear();
        for state in players {
            if state.connection_id == self.client_id {
                if self.predicted().is_none() {
                    info!("Local player {} spawned at server tick {}", self.client_id, tick);
                    self.sync.insert_player(state.clone());
                }
                self.authoritative = Some(state);
            } else {
                self.mirrors.insert(state.connection_id, state);
            }
        }
    }

    /// Applies a server broadcast, then reconciles if it confirms a newer tick.
    pub fn apply_tick_delta(
        &mut self,
        tick: u32,
        acknowledged: Option<u32>,
        rejected: &[u32],
        deltas: &[PlayerDelta],
    ) -> Option<Reconciliation> {
        self.server_tick = self.server_tick.max(tick);
        let config = Arc::clone(self.sync.config());
        for delta in deltas {
            if delta.connection_id == self.client_id {
                match self.authoritative.as_mut() {
                    Some(state) => delta.apply_to(state),
                    None => self.authoritative = from_full(delta, &config),
                }
                continue;
            }
            match self.mirrors.entry(delta.connection_id) {
                Entry::Occupied(mut mirror) => delta.apply_to(mirror.get_mut()),
                Entry::Vacant(slot) => match from_full(delta, &config) {
                    Some(state) => {
                        slot.insert(state);
                    }
                    None => debug!("Partial delta for unknown player {}", delta.connection_id),
                },
            }
        }

        if self.predicted().is_none() {
            if let Some(state) = &self.authoritative {
                self.sync.insert_player(state.clone());
            }
        }

        match acknowledged {
            Some(acknowledged) if self.last_ack.map_or(true, |last| acknowledged > last) => {
                self.stats.rejected_ticks += rejected.len() as u64;
                self.reconcile(acknowledged, rejected)
            }
            _ => None,
        }
    }

    fn reconcile(&mut self, acknowledged: u32, rejected: &[u32]) -> Option<Reconciliation> {
        self.last_ack = Some(acknowledged);
        let defenders = self.defender_views();
        let authoritative = self.authoritative.as_ref()?;
        let dispatcher = self.sync.dispatcher();
        let result = self
            .snapshots
            .reconcile(acknowledged, rejected, authoritative, |state, tick, commands| {
                dispatcher.replay(state, tick, commands, &defenders)
            })?;

        self.stats.reconciliations += 1;
        self.stats.replayed_ticks += result.replayed as u64;
        debug!(
            "Corrected {:?} after ack {}, replayed {} tick(s)",
            result.refreshed, acknowledged, result.replayed
        );
        self.sync.insert_player(result.state.clone());
        Some(result)
    }

    /// Predicts one tick from `frame` and returns the commands to send.
    ///
    /// An `Input` is submitted every tick so the local player advances in
    /// step with the server's simulation of the same tick group.
    pub fn predict(&mut self, frame: &InputFrame) -> Vec<NetworkCommand> {
        if self.predicted().is_none() {
            return Vec::new();
        }
        let tick = self.sync.current_tick().wrapping_add(1);
        let predicted = std::iter::once(CommandPayload::Input(frame.input.clone()))
            .chain(frame.actions.iter().cloned())
            .map(|payload| NetworkCommand::predicted(self.client_id, tick, payload));

        let mut roots = Vec::new();
        for command in predicted.collect::<Vec<_>>() {
            match self.sync.submit(command.clone(), CommandOrigin::Local) {
                Ok(Route::Queue) => roots.push(command),
                Ok(route) => debug!("Predicted command routed to {:?}", route),
                Err(err) => debug!("Local command refused at tick {}: {}", tick, err),
            }
        }
        for payload in &frame.requests {
            let request = NetworkCommand::request(self.client_id, tick, payload.clone());
            if let Err(err) = self.sync.submit(request, CommandOrigin::Local) {
                debug!("Request refused at tick {}: {}", tick, err);
            }
        }

        let defenders = self.defender_views();
        self.sync.tick_with_defenders(&defenders);
        self.sync.finish_broadcast();
        self.stats.predicted_ticks += 1;

        if let Some(state) = self.sync.player(self.client_id) {
            self.snapshots.record(tick, roots.clone(), state.clone());
        }

        let mut outbound = roots;
        outbound.extend(self.sync.drain_outbound());
        outbound
    }
}

/// Rebuilds a player from a delta carrying every slice.
fn from_full(delta: &PlayerDelta, config: &GameConfig) -> Option<PlayerState> {
    if delta.slices.len() < SliceKind::ALL.len() {
        return None;
    }
    let mut state = PlayerState::spawn(delta.connection_id, config);
    delta.apply_to(&mut state);
    Some(state)
}
