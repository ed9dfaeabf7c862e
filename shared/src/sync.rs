//! Fixed-rate tick scheduler
//!
//! Commands are accumulated between ticks and applied only inside
//! [`GameSyncManager::tick`] (predicted commands) or at the tick boundary in
//! [`GameSyncManager::submit`] (immediate commands). Each connection moves
//! through `Idle -> Accumulating -> Applying -> Broadcasting -> Idle`.

use crate::calculators::battle::DefenderView;
use crate::command::NetworkCommand;
use crate::config::GameConfig;
use crate::dispatch::{log_failure, CommandDispatcher, CommandOrigin, ProcessRole, Route};
use crate::error::{CommandError, ErrorSeverity};
use crate::state::{PlayerArena, PlayerState};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Accumulating,
    Applying,
    Broadcasting,
}

/// What one call to [`GameSyncManager::tick`] did
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
    pub tick: u32,
    /// Commands applied, follow-ups included
    pub applied: usize,
    /// Last tick group applied per connection this tick
    pub acknowledged: BTreeMap<u32, u32>,
    /// Tick groups with at least one refused or aborted command
    pub rejected: BTreeMap<u32, Vec<u32>>,
    /// Connections whose session must end
    pub fatal: BTreeSet<u32>,
}

#[derive(Debug)]
pub struct GameSyncManager {
    dispatcher: CommandDispatcher,
    arena: PlayerArena,
    current_tick: u32,
    /// Prediction queue, FIFO per `(connection, tick)`
    pending: BTreeMap<(u32, u32), Vec<NetworkCommand>>,
    last_applied: BTreeMap<u32, u32>,
    /// Last tick each player was simulated for, groups and idle advances alike
    simulated: BTreeMap<u32, u32>,
    phases: BTreeMap<u32, SyncPhase>,
    outbound: Vec<NetworkCommand>,
}

impl GameSyncManager {
    pub fn new(config: Arc<GameConfig>, role: ProcessRole) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(config, role),
            arena: PlayerArena::new(),
            current_tick: 0,
            pending: BTreeMap::new(),
            last_applied: BTreeMap::new(),
            simulated: BTreeMap::new(),
            phases: BTreeMap::new(),
            outbound: Vec::new(),
        }
    }

    pub fn config(&self) -> &Arc<GameConfig> {
        self.dispatcher.config()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick
    }

    /// Aligns the local clock with the server's, e.g. after the connect handshake.
    pub fn set_current_tick(&mut self, tick: u32) {
        self.current_tick = tick;
    }

    pub fn arena(&self) -> &PlayerArena {
        &self.arena
    }

    pub fn player(&self, connection_id: u32) -> Option<&PlayerState> {
        self.arena.get(connection_id)
    }

    pub fn phase(&self, connection_id: u32) -> Option<SyncPhase> {
        self.phases.get(&connection_id).copied()
    }

    pub fn last_applied(&self, connection_id: u32) -> Option<u32> {
        self.last_applied.get(&connection_id).copied()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Spawns a fresh player from config defaults.
    pub fn spawn_player(&mut self, connection_id: u32) -> PlayerState {
        let state = PlayerState::spawn(connection_id, self.config());
        self.insert_player(state.clone());
        self.phases.insert(connection_id, SyncPhase::Idle);
        info!("Spawned player for connection {} at tick {}", connection_id, self.current_tick);
        state
    }

    /// Replaces a player's state wholesale (reconciliation, full-state sync).
    pub fn insert_player(&mut self, state: PlayerState) {
        self.phases.entry(state.connection_id).or_insert(SyncPhase::Idle);
        self.simulated.entry(state.connection_id).or_insert(self.current_tick);
        self.arena.insert(state);
    }

    pub fn remove_player(&mut self, connection_id: u32) -> Option<PlayerState> {
        self.pending.retain(|(connection, _), _| *connection != connection_id);
        self.last_applied.remove(&connection_id);
        self.simulated.remove(&connection_id);
        self.phases.remove(&connection_id);
        self.arena.remove(connection_id)
    }

    /// Client requests waiting to be sent to the server
    pub fn drain_outbound(&mut self) -> Vec<NetworkCommand> {
        std::mem::take(&mut self.outbound)
    }

    /// Rejects predicted commands that are stale or impossibly far from the
    /// simulation clock.
    fn check_tick(&self, command: &NetworkCommand) -> Result<(), CommandError> {
        let header = &command.header;
        if let Some(applied) = self.last_applied(header.connection_id) {
            if header.tick <= applied {
                return Err(CommandError::StaleTick {
                    tick: header.tick,
                    applied,
                });
            }
        }
        let sync = &self.config().sync;
        if header.tick > self.current_tick.saturating_add(sync.max_tick_lead)
            || header.tick.saturating_add(sync.max_tick_lag) < self.current_tick
        {
            return Err(CommandError::TickOrdering {
                tick: header.tick,
                current: self.current_tick,
            });
        }
        Ok(())
    }

    /// Admits one command. Immediate commands are applied on the spot; call
    /// this only between ticks.
    pub fn submit(&mut self, command: NetworkCommand, origin: CommandOrigin) -> Result<Route, CommandError> {
        let route = self.dispatcher.admit(&command, origin).map_err(|err| {
            log_failure(&command.header, &err);
            err
        })?;

        match route {
            Route::Apply => {
                self.dispatcher.apply(&mut self.arena, &command)?;
            }
            Route::Queue => {
                if let Err(err) = self.check_tick(&command) {
                    log_failure(&command.header, &err);
                    return Err(err);
                }
                let connection_id = command.header.connection_id;
                self.pending
                    .entry((connection_id, command.header.tick))
                    .or_default()
                    .push(command);
                self.phases.insert(connection_id, SyncPhase::Accumulating);
            }
            Route::Forward => self.outbound.push(command),
        }
        Ok(route)
    }

    /// Server tick: every player's queued groups, with defenders taken from the arena.
    pub fn tick(&mut self) -> TickReport {
        self.run_tick(None)
    }

    /// Client tick: defenders are the read-only mirrors of other players.
    pub fn tick_with_defenders(&mut self, defenders: &[DefenderView]) -> TickReport {
        self.run_tick(Some(defenders))
    }

    fn run_tick(&mut self, defenders: Option<&[DefenderView]>) -> TickReport {
        self.current_tick = self.current_tick.wrapping_add(1);
        let mut report = TickReport {
            tick: self.current_tick,
            ..TickReport::default()
        };

        let groups = std::mem::take(&mut self.pending);
        for ((connection_id, tick), commands) in groups {
            if !self.arena.contains(connection_id) {
                debug!("Dropping {} command(s) for departed connection {}", commands.len(), connection_id);
                continue;
            }
            self.phases.insert(connection_id, SyncPhase::Applying);
            let views = match defenders {
                Some(views) => views.to_vec(),
                None => self.arena.defender_views(self.config(), Some(connection_id)),
            };
            let outcome = self
                .dispatcher
                .simulate_group(&mut self.arena, connection_id, tick, &commands, &views);

            report.applied += outcome.applied;
            if outcome.failed > 0 {
                report.rejected.entry(connection_id).or_default().push(tick);
            }
            if outcome.fatal {
                report.fatal.insert(connection_id);
            }
            self.last_applied.insert(connection_id, tick);
            self.simulated.insert(connection_id, tick);
            report.acknowledged.insert(connection_id, tick);
            self.phases.insert(connection_id, SyncPhase::Broadcasting);
        }

        if defenders.is_none() && self.dispatcher.role() == ProcessRole::Server {
            self.advance_idle_players(&mut report);
        }

        if self.current_tick % 60 == 0 {
            debug!(
                "Tick {}: {} player(s), {} command(s) applied, {} group(s) rejected",
                self.current_tick,
                self.arena.len(),
                report.applied,
                report.rejected.values().map(Vec::len).sum::<usize>()
            );
        }
        report
    }

    /// Advances timers, skills and buffs of players whose input has gone
    /// silent. Only ticks that late commands can no longer claim are
    /// advanced, so a player never runs the same tick twice.
    fn advance_idle_players(&mut self, report: &mut TickReport) {
        let closed = match self.current_tick.checked_sub(self.config().sync.max_tick_lag + 1) {
            Some(closed) => closed,
            None => return,
        };
        let idle: Vec<u32> = self
            .simulated
            .iter()
            .filter(|(_, simulated)| **simulated < closed)
            .map(|(connection_id, _)| *connection_id)
            .collect();
        for connection_id in idle {
            if !self.arena.contains(connection_id) {
                continue;
            }
            let views = self.arena.defender_views(self.config(), Some(connection_id));
            if let Err(err) = self.dispatcher.advance_player(&mut self.arena, connection_id, closed, &views) {
                if err.severity() == ErrorSeverity::Fatal {
                    report.fatal.insert(connection_id);
                }
            }
            self.simulated.insert(connection_id, closed);
        }
    }

    /// Ends the broadcast phase for every connection.
    pub fn finish_broadcast(&mut self) {
        for phase in self.phases.values_mut() {
            if *phase == SyncPhase::Broadcasting {
                *phase = SyncPhase::Idle;
            }
        }
    }

    /// Whether an error from [`GameSyncManager::submit`] ends the sender's session.
    pub fn is_fatal(err: &CommandError) -> bool {
        err.severity() == ErrorSeverity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculators::movement::ProbeResult;
    use crate::command::{CommandPayload, GoldChangedCommand, InputCommand, PropertyBuffCommand, ShopRefreshCommand};
    use crate::math::Vec3;
    use crate::property::SubjectedStateType;

    fn manager() -> GameSyncManager {
        let mut sync = GameSyncManager::new(Arc::new(GameConfig::default()), ProcessRole::Server);
        sync.spawn_player(1);
        sync.spawn_player(2);
        sync
    }

    fn walk(connection_id: u32, tick: u32) -> NetworkCommand {
        NetworkCommand::predicted(
            connection_id,
            tick,
            CommandPayload::Input(InputCommand {
                movement: Vec3::new(0.0, 0.0, 1.0),
                sprint: false,
                jump: false,
                roll: false,
                attack: false,
                probe: ProbeResult::grounded(),
            }),
        )
    }

    #[test]
    fn test_predicted_commands_wait_for_tick() {
        let mut sync = manager();
        let start = sync.player(1).unwrap().movement.position;
        assert_eq!(sync.submit(walk(1, 1), CommandOrigin::Remote(1)).unwrap(), Route::Queue);
        assert_eq!(sync.phase(1), Some(SyncPhase::Accumulating));
        assert_eq!(sync.player(1).unwrap().movement.position, start);

        let report = sync.tick();
        assert_eq!(report.acknowledged.get(&1), Some(&1));
        assert!(report.rejected.is_empty());
        assert_ne!(sync.player(1).unwrap().movement.position, start);
        assert_eq!(sync.phase(1), Some(SyncPhase::Broadcasting));

        sync.finish_broadcast();
        assert_eq!(sync.phase(1), Some(SyncPhase::Idle));
    }

    #[test]
    fn test_immediate_commands_apply_on_submit() {
        let mut sync = manager();
        let grant = NetworkCommand::server(1, 0, CommandPayload::GoldChanged(GoldChangedCommand { delta: 25 }));
        assert_eq!(sync.submit(grant, CommandOrigin::Local).unwrap(), Route::Apply);
        assert_eq!(sync.player(1).unwrap().inventory.gold, 125);
    }

    #[test]
    fn test_stale_and_corrupt_ticks() {
        let mut sync = manager();
        sync.submit(walk(1, 1), CommandOrigin::Remote(1)).unwrap();
        sync.tick();

        let stale = sync.submit(walk(1, 1), CommandOrigin::Remote(1)).unwrap_err();
        assert_eq!(stale.severity(), ErrorSeverity::Rejected);

        let far = sync.submit(walk(1, 10_000), CommandOrigin::Remote(1)).unwrap_err();
        assert!(GameSyncManager::is_fatal(&far));
    }

    #[test]
    fn test_groups_apply_in_tick_order_per_connection() {
        let mut sync = manager();
        sync.submit(walk(2, 3), CommandOrigin::Remote(2)).unwrap();
        sync.submit(walk(2, 2), CommandOrigin::Remote(2)).unwrap();
        sync.submit(walk(1, 1), CommandOrigin::Remote(1)).unwrap();

        let report = sync.tick();
        assert_eq!(report.acknowledged.get(&1), Some(&1));
        assert_eq!(report.acknowledged.get(&2), Some(&3));
        assert_eq!(sync.last_applied(2), Some(3));
        assert_eq!(sync.pending_len(), 0);
    }

    #[test]
    fn test_rejected_group_is_reported() {
        let mut sync = manager();
        sync.submit(walk(1, 1), CommandOrigin::Remote(1)).unwrap();
        let refresh = NetworkCommand::predicted(1, 1, CommandPayload::ShopRefresh(ShopRefreshCommand { seed: 3 }));
        sync.submit(refresh, CommandOrigin::Remote(1)).unwrap();
        let costly = NetworkCommand::predicted(1, 1, CommandPayload::ShopRefresh(ShopRefreshCommand { seed: 4 }));
        sync.submit(costly.clone(), CommandOrigin::Remote(1)).unwrap();
        // drain gold so the second (paid) refresh fails
        let broke = NetworkCommand::server(1, 0, CommandPayload::GoldChanged(GoldChangedCommand { delta: -100 }));
        sync.submit(broke, CommandOrigin::Local).unwrap();

        let report = sync.tick();
        assert_eq!(report.rejected.get(&1), Some(&vec![1]));
        assert_eq!(report.acknowledged.get(&1), Some(&1));
    }

    #[test]
    fn test_client_forwards_requests() {
        let mut sync = GameSyncManager::new(
            Arc::new(GameConfig::default()),
            ProcessRole::Client { local_connection_id: 1 },
        );
        sync.spawn_player(1);
        let refresh = NetworkCommand::request(1, 1, CommandPayload::ShopRefresh(ShopRefreshCommand { seed: 9 }));
        assert_eq!(sync.submit(refresh, CommandOrigin::Local).unwrap(), Route::Forward);
        assert_eq!(sync.drain_outbound().len(), 1);
        assert!(sync.drain_outbound().is_empty());
    }

    #[test]
    fn test_silent_player_keeps_advancing_on_server() {
        let mut sync = manager();
        let lag = sync.config().sync.max_tick_lag;
        let stun = NetworkCommand::server(
            1,
            0,
            CommandPayload::PropertyBuff(PropertyBuffCommand {
                buff_id: sync.config().element.stun_buff_id,
                source_connection_id: 0,
            }),
        );
        sync.submit(stun, CommandOrigin::Local).unwrap();
        assert!(sync.player(1).unwrap().property.subjected.contains(SubjectedStateType::STUNNED));

        // Still within the late-command window
        for _ in 0..lag {
            sync.tick();
        }
        assert!(sync.player(1).unwrap().property.subjected.contains(SubjectedStateType::STUNNED));

        for _ in 0..100 {
            let report = sync.tick();
            assert!(report.acknowledged.is_empty());
        }
        assert!(!sync.player(1).unwrap().property.subjected.contains(SubjectedStateType::STUNNED));
        assert_eq!(sync.last_applied(1), None);
    }

    #[test]
    fn test_active_player_is_not_advanced_twice() {
        let mut sync = manager();
        let lag = sync.config().sync.max_tick_lag;
        let mut expected = sync.player(1).unwrap().clone();
        for _ in 0..lag + 10 {
            let tick = sync.current_tick() + 1;
            expected = sync.dispatcher().replay(&expected, tick, &[walk(1, tick)], &[]);
            sync.submit(walk(1, tick), CommandOrigin::Remote(1)).unwrap();
            sync.tick();
        }
        assert_eq!(sync.player(1), Some(&expected));

        let late = sync.current_tick() - lag;
        let stale = sync.submit(walk(1, late), CommandOrigin::Remote(1)).unwrap_err();
        assert_eq!(stale.severity(), ErrorSeverity::Rejected);
    }

    #[test]
    fn test_removed_player_drops_pending() {
        let mut sync = manager();
        sync.submit(walk(2, 1), CommandOrigin::Remote(2)).unwrap();
        assert!(sync.remove_player(2).is_some());
        assert_eq!(sync.pending_len(), 0);
        let report = sync.tick();
        assert!(report.acknowledged.is_empty());
    }
}
